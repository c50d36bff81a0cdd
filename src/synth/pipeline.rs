//! Instrument pipelines.
//!
//! A [Pipeline] is one instrument instance: an ordered chain of operator
//! bindings run per voice, a chain of effects run once per block, the scratch
//! buffers they are routed through and the voice pool. What happens inside a
//! block is decided by the instrument's [Algorithm] hooks:
//!
//! 1. `pre_voice` once, with the instrument-wide voice context;
//! 2. `operate` once per playing voice that is not done;
//! 3. finished voices go back to the free list;
//! 4. `post_voice` once, typically to run the effects.
//!
//! All buffers and locals are allocated by [PipelineBuilder::finish].

use super::buffer::{BufId, Scratch};
use super::dispatch::ParameterSelect;
use super::flags::MixFlags;
use super::instruments::InstrumentKind;
use super::operator::{Direction, DynOperator, LocalBlock, OperateStatus, OperatorSpec, ParamBlock, Ports, MAX_PORTS};
use super::ops::{OperatorKind, Palette};
use super::tables::{curves, KeyTable, Tuning, VelocityCurve};
use super::voice::{Allocation, Strike, Voice, VoicePool};
use crate::config::{InstrumentConfig, MAX_TRANSPOSE};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Vendor operator indices from here up address the effects chain.
pub const EFFECTS_BASE: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(pub u16);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    /// Run per voice.
    Sound,
    /// Run once per block.
    Effects,
}

/// Handle to a binding in one of a pipeline's chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId {
    chain: Chain,
    index: usize,
}

impl OpId {
    pub fn chain(self) -> Chain {
        self.chain
    }

    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Route {
    inputs: [Option<BufId>; MAX_PORTS],
    outputs: [Option<BufId>; MAX_PORTS],
}

/// One operator bound into a chain: its parameter block and its routing.
struct Binding {
    label: &'static str,
    kind: OperatorKind,
    operator: Arc<dyn DynOperator>,
    params: ParamBlock,
    route: Route,
}

fn chain_get(bindings: &[Binding], op: OpId) -> Option<&Binding> {
    bindings.get(op.index)
}

/// Instrument-defined block logic.
pub trait Algorithm: Send {
    /// Instrument-wide controls addressed by the global controller channel.
    /// Runs at a block boundary, outside rendering.
    fn global_controller(&mut self, controls: &mut Controls<'_>, controller: u8, operator: u8, value: f32) {
        let _ = (controls, controller, operator, value);
    }

    fn pre_voice(&mut self, block: &mut Block<'_>, shared: &mut Voice) {
        let _ = (block, shared);
    }

    fn operate(&mut self, block: &mut Block<'_>, voice: &mut Voice);

    fn post_voice(&mut self, block: &mut Block<'_>, shared: &mut Voice) {
        let _ = (block, shared);
    }
}

/// Parameter access for [Algorithm::global_controller].
pub struct Controls<'a> {
    sound: &'a mut [Binding],
    effects: &'a mut [Binding],
    mix_flags: &'a mut MixFlags,
}

impl Controls<'_> {
    pub fn set_param(&mut self, op: OpId, index: usize, value: f32) {
        let bindings = match op.chain {
            Chain::Sound => &mut *self.sound,
            Chain::Effects => &mut *self.effects,
        };
        if let Some(binding) = bindings.get_mut(op.index) {
            binding.operator.set_param(&mut binding.params, index, value);
        }
    }

    pub fn param(&self, op: OpId, index: usize) -> Option<f32> {
        let bindings = match op.chain {
            Chain::Sound => &*self.sound,
            Chain::Effects => &*self.effects,
        };
        let binding = chain_get(bindings, op)?;
        binding.operator.param_value(&binding.params, index)
    }

    pub fn mix_flags(&self) -> MixFlags {
        *self.mix_flags
    }

    pub fn set_mix_flag(&mut self, flag: MixFlags, on: bool) {
        self.mix_flags.set(flag, on);
    }
}

/// What an [Algorithm] hook can touch while a block renders.
pub struct Block<'a> {
    sound: &'a [Binding],
    effects: &'a [Binding],
    sound_locals: &'a mut [Vec<LocalBlock>],
    effect_locals: &'a mut [LocalBlock],
    scratch: &'a mut Scratch,
    mix_flags: MixFlags,
    controllers: &'a [f32; 128],
}

impl Block<'_> {
    /// Runs one binding for `voice`. Sound chain bindings use the voice's own
    /// locals; effects always use the single instrument-wide row.
    pub fn run(&mut self, op: OpId, voice: &mut Voice) -> OperateStatus {
        let (binding, local) = match op.chain {
            Chain::Sound => {
                let sound = self.sound;
                let local = self
                    .sound_locals
                    .get_mut(voice.index())
                    .and_then(|row| row.get_mut(op.index));
                (chain_get(sound, op), local)
            }
            Chain::Effects => {
                let effects = self.effects;
                (chain_get(effects, op), self.effect_locals.get_mut(op.index))
            }
        };
        match (binding, local) {
            (Some(binding), Some(local)) => run_binding(binding, local, self.scratch, voice),
            _ => OperateStatus::Ok,
        }
    }

    /// Zeroes the state `op` keeps for `voice`, e.g. an effect's delay
    /// lines when it comes back into the signal path.
    pub fn clear(&mut self, op: OpId, voice: &Voice) {
        let (sound, effects) = (self.sound, self.effects);
        let (binding, local) = match op.chain {
            Chain::Sound => (
                chain_get(sound, op),
                self.sound_locals
                    .get_mut(voice.index())
                    .and_then(|row| row.get_mut(op.index)),
            ),
            Chain::Effects => (chain_get(effects, op), self.effect_locals.get_mut(op.index)),
        };
        if let (Some(binding), Some(local)) = (binding, local) {
            binding.operator.clear_local(local);
        }
    }

    pub fn frames(&self) -> usize {
        self.scratch.frames()
    }

    pub fn buffer(&self, id: BufId) -> &[f32] {
        self.scratch.get(id)
    }

    /// None for the silence and device input buffers.
    pub fn buffer_mut(&mut self, id: BufId) -> Option<&mut [f32]> {
        self.scratch.get_mut(id)
    }

    /// `dst = dst * dst_gain + src * src_gain`.
    pub fn merge(&mut self, dst: BufId, dst_gain: f32, src: BufId, src_gain: f32) {
        self.scratch.merge(dst, dst_gain, src, src_gain);
    }

    pub fn copy(&mut self, dst: BufId, src: BufId) {
        self.scratch.copy(dst, src);
    }

    pub fn fill(&mut self, dst: BufId, value: f32) {
        self.scratch.fill(dst, value);
    }

    pub fn mix_flags(&self) -> MixFlags {
        self.mix_flags
    }

    /// Last value of a MIDI controller, 0.0-1.0.
    pub fn controller(&self, index: u8) -> f32 {
        self.controllers[(index & 0x7f) as usize]
    }
}

fn run_binding(binding: &Binding, local: &mut LocalBlock, scratch: &mut Scratch, voice: &mut Voice) -> OperateStatus {
    let frames = scratch.frames();
    let route = &binding.route;

    // outputs are moved out of the arena so inputs can be borrowed alongside
    let mut taken: [Vec<f32>; MAX_PORTS] = Default::default();
    for (slot, id) in route.outputs.iter().enumerate() {
        if let Some(id) = id {
            taken[slot] = scratch.take(*id);
        }
    }
    let status = {
        let arena: &Scratch = scratch;
        let inputs: [&[f32]; MAX_PORTS] =
            std::array::from_fn(|slot| arena.get(route.inputs[slot].unwrap_or(BufId::SILENCE)));
        let mut held = taken.iter_mut();
        let outputs: [&mut [f32]; MAX_PORTS] = std::array::from_fn(|_| match held.next() {
            Some(buffer) => buffer.as_mut_slice(),
            None => &mut [],
        });
        let mut ports = Ports::new(inputs, outputs, frames);
        binding.operator.operate(voice, &binding.params, local, &mut ports)
    };
    for (slot, id) in route.outputs.iter().enumerate() {
        if let Some(id) = id {
            scratch.restore(*id, std::mem::take(&mut taken[slot]));
        }
    }
    status
}

/// One running instrument instance.
pub struct Pipeline {
    id: InstrumentId,
    kind: InstrumentKind,
    channel: u8,
    sound: Vec<Binding>,
    effects: Vec<Binding>,
    // one row per voice, then the instrument-wide row
    sound_locals: Vec<Vec<LocalBlock>>,
    effect_locals: Vec<LocalBlock>,
    scratch: Scratch,
    voices: VoicePool,
    algorithm: Box<dyn Algorithm>,
    mix_flags: MixFlags,
    keys: KeyTable,
    tuning: Tuning,
    fine_tune: f32,
    coarse_tune: f32,
    transpose: i8,
    velocity_curve: VelocityCurve,
    glide: f32,
    detune: f32,
    bend: f32,
    bend_range: f32,
    volume: f32,
    pan: f32,
    controllers: [f32; 128],
    pub(crate) select: ParameterSelect,
}

impl Pipeline {
    pub fn id(&self) -> InstrumentId {
        self.id
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel & 0x0f;
    }

    pub fn voices(&self) -> &VoicePool {
        &self.voices
    }

    pub fn mix_flags(&self) -> MixFlags {
        self.mix_flags
    }

    pub fn frames(&self) -> usize {
        self.scratch.frames()
    }

    pub fn sample_rate(&self) -> f32 {
        self.keys.sample_rate()
    }

    pub fn keys(&self) -> &KeyTable {
        &self.keys
    }

    /// Instrument output for the last rendered block.
    pub fn left(&self) -> &[f32] {
        self.scratch.get(BufId::LEFT)
    }

    pub fn right(&self) -> &[f32] {
        self.scratch.get(BufId::RIGHT)
    }

    pub fn buffer(&self, id: BufId) -> &[f32] {
        self.scratch.get(id)
    }

    /// Bound operators in chain order.
    pub fn operators(&self) -> impl Iterator<Item = (OpId, &'static str, &OperatorSpec)> {
        let sound = self.sound.iter().enumerate().map(|(index, b)| {
            (OpId { chain: Chain::Sound, index }, b.label, b.operator.spec())
        });
        let effects = self.effects.iter().enumerate().map(|(index, b)| {
            (OpId { chain: Chain::Effects, index }, b.label, b.operator.spec())
        });
        sound.chain(effects)
    }

    pub fn find(&self, label: &str) -> Option<OpId> {
        self.operators().find(|(_, l, _)| *l == label).map(|(op, _, _)| op)
    }

    pub fn operator_kind(&self, op: OpId) -> Option<OperatorKind> {
        self.binding(op).map(|b| b.kind)
    }

    /// Maps a vendor message operator index onto a binding.
    pub fn op_at(&self, operator: u8) -> Option<OpId> {
        let (chain, index, len) = if operator >= EFFECTS_BASE {
            (Chain::Effects, (operator - EFFECTS_BASE) as usize, self.effects.len())
        } else {
            (Chain::Sound, operator as usize, self.sound.len())
        };
        (index < len).then_some(OpId { chain, index })
    }

    fn binding(&self, op: OpId) -> Option<&Binding> {
        match op.chain {
            Chain::Sound => self.sound.get(op.index),
            Chain::Effects => self.effects.get(op.index),
        }
    }

    fn binding_mut(&mut self, op: OpId) -> Option<&mut Binding> {
        match op.chain {
            Chain::Sound => self.sound.get_mut(op.index),
            Chain::Effects => self.effects.get_mut(op.index),
        }
    }

    /// Stores a normalized parameter value. Returns false when `op` or
    /// `index` do not exist.
    pub fn set_param(&mut self, op: OpId, index: usize, value: f32) -> bool {
        let Some(binding) = self.binding_mut(op) else {
            return false;
        };
        if index >= binding.operator.spec().params.len() {
            return false;
        }
        binding.operator.set_param(&mut binding.params, index, value);
        true
    }

    pub fn param(&self, op: OpId, index: usize) -> Option<f32> {
        let binding = self.binding(op)?;
        binding.operator.param_value(&binding.params, index)
    }

    /// Per-voice state of a sound binding. `row` is a voice index, or the
    /// pool capacity for the instrument-wide row.
    pub fn local<L: 'static>(&self, row: usize, op: OpId) -> Option<&L> {
        let local = match op.chain {
            Chain::Sound => self.sound_locals.get(row)?.get(op.index)?,
            Chain::Effects => self.effect_locals.get(op.index)?,
        };
        local.downcast_ref::<L>()
    }

    pub fn global_controller(&mut self, controller: u8, operator: u8, value: f32) {
        let mut controls = Controls {
            sound: &mut self.sound,
            effects: &mut self.effects,
            mix_flags: &mut self.mix_flags,
        };
        self.algorithm
            .global_controller(&mut controls, controller, operator, value.clamp(0.0, 1.0));
    }

    pub fn note_on(&mut self, key: u8, velocity: u8, offset: usize) -> Allocation {
        let sounding = (key as i16 + self.transpose as i16).clamp(0, 127) as u8;
        let strike = Strike {
            key,
            channel: self.channel,
            velocity: curves().velocity(self.velocity_curve, velocity),
            step: self.keys.key(sounding).step,
            offset: offset.min(self.frames().saturating_sub(1)),
        };
        let glide_samples = self.glide * self.sample_rate();
        let allocation = self.voices.note_on(strike, glide_samples);
        if let Some(index) = allocation.needs_clear() {
            self.clear_locals(index);
        }
        allocation
    }

    pub fn note_off(&mut self, key: u8) {
        self.voices.note_off(key, self.channel);
    }

    fn clear_locals(&mut self, voice: usize) {
        if let Some(row) = self.sound_locals.get_mut(voice) {
            for (binding, local) in self.sound.iter().zip(row.iter_mut()) {
                binding.operator.clear_local(local);
            }
        }
    }

    pub fn set_sustain(&mut self, on: bool) {
        self.voices.set_sustain(on);
    }

    pub fn set_pressure(&mut self, key: Option<u8>, pressure: f32) {
        self.voices.set_pressure(key, pressure);
    }

    pub fn all_notes_off(&mut self) {
        self.voices.all_notes_off();
    }

    pub fn all_sound_off(&mut self) {
        self.voices.all_sound_off();
    }

    pub fn set_voices(&mut self, count: usize) {
        self.voices.set_active(count);
    }

    /// Pitch bend position in [-1, 1].
    pub fn set_bend(&mut self, position: f32) {
        let semitones = position.clamp(-1.0, 1.0) * self.bend_range;
        self.bend = 2f32.powf(semitones / 12.0);
    }

    pub fn bend(&self) -> f32 {
        self.bend
    }

    pub fn set_bend_range(&mut self, semitones: f32) {
        self.bend_range = semitones.clamp(0.0, 48.0);
    }

    pub fn set_fine_tune(&mut self, cents: f32) {
        self.fine_tune = cents.clamp(-100.0, 100.0);
        self.retune();
    }

    pub fn set_coarse_tune(&mut self, semitones: f32) {
        self.coarse_tune = semitones.clamp(-64.0, 63.0);
        self.retune();
    }

    fn retune(&mut self) {
        let cents = self.coarse_tune * 100.0 + self.fine_tune;
        self.keys.retune(&self.tuning, 2f32.powf(cents / 1200.0));
    }

    pub fn set_transpose(&mut self, semitones: i8) {
        self.transpose = semitones.clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE);
    }

    pub fn transpose(&self) -> i8 {
        self.transpose
    }

    /// Portamento time in seconds.
    pub fn set_glide(&mut self, seconds: f32) {
        self.glide = seconds.max(0.0);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(0.0, 1.0);
    }

    pub fn set_controller(&mut self, index: u8, value: f32) {
        self.controllers[(index & 0x7f) as usize] = value;
    }

    pub fn controller(&self, index: u8) -> f32 {
        self.controllers[(index & 0x7f) as usize]
    }

    /// Renders one block into the instrument's left and right buffers.
    pub fn render(&mut self, input_left: &[f32], input_right: &[f32]) {
        let frames = self.scratch.frames();
        self.scratch.fill(BufId::LEFT, 0.0);
        self.scratch.fill(BufId::RIGHT, 0.0);
        self.scratch.load_input(input_left, input_right);

        let (bend, detune) = (self.bend, self.detune);
        let mut block = Block {
            sound: &self.sound,
            effects: &self.effects,
            sound_locals: &mut self.sound_locals,
            effect_locals: &mut self.effect_locals,
            scratch: &mut self.scratch,
            mix_flags: self.mix_flags,
            controllers: &self.controllers,
        };
        let algorithm = &mut self.algorithm;
        let voices = &mut self.voices;

        let shared = voices.shared_mut();
        shared.begin_block(frames, 1.0, 0.0);
        algorithm.pre_voice(&mut block, shared);

        voices.for_each_playing(|voice| {
            voice.begin_block(frames, bend, detune);
            algorithm.operate(&mut block, voice);
            voice.end_block();
        });
        voices.reclaim();

        let shared = voices.shared_mut();
        algorithm.post_voice(&mut block, shared);
        shared.end_block();

        // balance law: the centre leaves both sides at unity
        let left = self.volume * (2.0 * (1.0 - self.pan)).min(1.0);
        let right = self.volume * (2.0 * self.pan).min(1.0);
        self.scratch.merge(BufId::LEFT, left, BufId::LEFT, 0.0);
        self.scratch.merge(BufId::RIGHT, right, BufId::RIGHT, 0.0);
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("channel", &self.channel)
            .field("sound", &self.sound.iter().map(|b| b.label).collect::<Vec<_>>())
            .field("effects", &self.effects.iter().map(|b| b.label).collect::<Vec<_>>())
            .field("voices", &self.voices.active())
            .finish()
    }
}

/// Assembles and validates a [Pipeline]. Every allocation the instrument
/// will ever need happens here or in `finish`.
pub struct PipelineBuilder<'p> {
    palette: &'p Palette,
    id: InstrumentId,
    config: InstrumentConfig,
    sound: Vec<Binding>,
    effects: Vec<Binding>,
    scratch: Scratch,
    mix_flags: MixFlags,
}

impl<'p> PipelineBuilder<'p> {
    pub fn new(palette: &'p Palette, id: InstrumentId, config: &InstrumentConfig) -> Self {
        Self {
            palette,
            id,
            config: config.clone(),
            sound: Vec::new(),
            effects: Vec::new(),
            scratch: Scratch::new(palette.block_size()),
            mix_flags: MixFlags::empty(),
        }
    }

    fn bind(&self, kind: OperatorKind, label: &'static str) -> Binding {
        let operator = self.palette.get(kind);
        let params = operator.create_params();
        Binding {
            label,
            kind,
            operator,
            params,
            route: Route::default(),
        }
    }

    /// Appends an operator to the per-voice chain.
    pub fn operator(&mut self, kind: OperatorKind, label: &'static str) -> OpId {
        let binding = self.bind(kind, label);
        self.sound.push(binding);
        OpId {
            chain: Chain::Sound,
            index: self.sound.len() - 1,
        }
    }

    /// Appends an operator to the effects chain.
    pub fn effect(&mut self, kind: OperatorKind, label: &'static str) -> OpId {
        let binding = self.bind(kind, label);
        self.effects.push(binding);
        OpId {
            chain: Chain::Effects,
            index: self.effects.len() - 1,
        }
    }

    pub fn buffer(&mut self, name: &'static str) -> BufId {
        self.scratch.add(name)
    }

    pub fn spec(&self, op: OpId) -> Option<&OperatorSpec> {
        self.binding(op).map(|b| b.operator.spec())
    }

    fn binding(&self, op: OpId) -> Option<&Binding> {
        match op.chain {
            Chain::Sound => self.sound.get(op.index),
            Chain::Effects => self.effects.get(op.index),
        }
    }

    fn binding_mut(&mut self, op: OpId) -> Result<&mut Binding, EngineError> {
        let found = match op.chain {
            Chain::Sound => self.sound.get_mut(op.index),
            Chain::Effects => self.effects.get_mut(op.index),
        };
        found.ok_or_else(|| EngineError::Wiring(format!("no operator at {op:?}")))
    }

    pub fn input(&mut self, op: OpId, port: &str, buffer: BufId) -> Result<&mut Self, EngineError> {
        self.route(op, Direction::Input, port, buffer)
    }

    pub fn output(&mut self, op: OpId, port: &str, buffer: BufId) -> Result<&mut Self, EngineError> {
        self.route(op, Direction::Output, port, buffer)
    }

    fn route(&mut self, op: OpId, direction: Direction, port: &str, buffer: BufId) -> Result<&mut Self, EngineError> {
        if !self.scratch.contains(buffer) {
            return Err(EngineError::Wiring(format!("unknown buffer {buffer:?}")));
        }
        let buffer_name = self.scratch.name(buffer);
        let binding = self.binding_mut(op)?;
        let spec = binding.operator.spec();
        let slot = spec
            .port_index(direction, port)
            .ok_or_else(|| EngineError::UnknownPort {
                operator: binding.label.to_string(),
                port: port.to_string(),
            })?;
        if slot >= MAX_PORTS {
            return Err(EngineError::Wiring(format!("{} declares too many ports", spec.name)));
        }
        match direction {
            Direction::Input => binding.route.inputs[slot] = Some(buffer),
            Direction::Output => {
                if buffer.is_read_only() {
                    return Err(EngineError::ReadOnlyBuffer {
                        operator: binding.label.to_string(),
                        port: port.to_string(),
                        buffer: buffer_name.to_string(),
                    });
                }
                binding.route.outputs[slot] = Some(buffer);
            }
        }
        Ok(self)
    }

    /// Sets the initial normalized value of a parameter by name.
    pub fn param(&mut self, op: OpId, name: &str, value: f32) -> Result<&mut Self, EngineError> {
        let binding = self.binding_mut(op)?;
        let index = binding
            .operator
            .spec()
            .param_index(name)
            .ok_or_else(|| EngineError::UnknownParam {
                operator: binding.label.to_string(),
                param: name.to_string(),
            })?;
        binding.operator.set_param(&mut binding.params, index, value);
        Ok(self)
    }

    /// Selects `position` of a stepped or toggle parameter.
    pub fn step(&mut self, op: OpId, name: &str, position: usize) -> Result<&mut Self, EngineError> {
        let value = self
            .spec(op)
            .and_then(|spec| spec.params.iter().find(|p| p.name == name))
            .map(|param| param.at(position));
        match value {
            Some(value) => self.param(op, name, value),
            None => self.param(op, name, 0.0),
        }
    }

    pub fn mix_flags(&mut self, flags: MixFlags) -> &mut Self {
        self.mix_flags = flags;
        self
    }

    fn validate(&self, binding: &Binding) -> Result<(), EngineError> {
        let spec = binding.operator.spec();
        let operator = || binding.label.to_string();
        for (direction, slots) in [
            (Direction::Input, &binding.route.inputs),
            (Direction::Output, &binding.route.outputs),
        ] {
            let ports = spec.ports.iter().filter(|p| p.direction == direction);
            for (slot, port) in ports.enumerate() {
                if slots.get(slot).copied().flatten().is_none() {
                    return Err(EngineError::UnroutedPort {
                        operator: operator(),
                        port: port.name.to_string(),
                        direction: direction.as_str(),
                    });
                }
            }
        }
        let outputs = binding.route.outputs.iter().flatten();
        for (i, out) in outputs.clone().enumerate() {
            let doubled = outputs.clone().skip(i + 1).any(|other| other == out);
            let read_back = binding.route.inputs.iter().flatten().any(|input| input == out);
            if doubled || read_back {
                return Err(EngineError::AliasedBuffer {
                    operator: operator(),
                    buffer: self.scratch.name(*out).to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn finish(self, algorithm: impl Algorithm + 'static) -> Result<Pipeline, EngineError> {
        for binding in self.sound.iter().chain(&self.effects) {
            self.validate(binding)?;
        }
        let config = self.config;
        let sample_rate = self.palette.sample_rate();
        let voices = VoicePool::new(config.max_voices, config.voices, config.steal, self.id.0 as u64);
        let rows = voices.capacity() + 1;
        let sound_locals = (0..rows)
            .map(|_| self.sound.iter().map(|b| b.operator.create_local()).collect())
            .collect();
        let effect_locals = self.effects.iter().map(|b| b.operator.create_local()).collect();
        log::debug!(
            "instrument {} ({:?}): {} operators, {} effects, {} buffers, {} voices",
            self.id,
            config.kind,
            self.sound.len(),
            self.effects.len(),
            self.scratch.len(),
            voices.capacity()
        );
        Ok(Pipeline {
            id: self.id,
            kind: config.kind,
            channel: config.channel,
            sound: self.sound,
            effects: self.effects,
            sound_locals,
            effect_locals,
            scratch: self.scratch,
            voices,
            algorithm: Box::new(algorithm),
            mix_flags: self.mix_flags,
            keys: KeyTable::new(sample_rate, &config.tuning),
            tuning: config.tuning,
            fine_tune: 0.0,
            coarse_tune: 0.0,
            transpose: config.transpose.clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE),
            velocity_curve: config.velocity_curve,
            glide: config.glide,
            detune: config.detune,
            bend: 1.0,
            bend_range: config.bend_range,
            volume: config.volume,
            pan: config.pan,
            controllers: [0.0; 128],
            select: ParameterSelect::default(),
        })
    }
}
