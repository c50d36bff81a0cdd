//! Two oscillators and a noise source through an enveloped resonant filter.
//!
//! One LFO runs on the instrument row in `pre_voice` and every voice reads
//! its buffer for vibrato and filter sweep. The chorus runs once per block
//! on the summed output.

use super::mix_flag_controller;
use crate::config::InstrumentConfig;
use crate::error::EngineError;
use crate::synth::buffer::BufId;
use crate::synth::dispatch::CC_MOD_WHEEL;
use crate::synth::flags::MixFlags;
use crate::synth::ops::OperatorKind;
use crate::synth::ops::Palette;
use crate::synth::pipeline::{Algorithm, Block, Controls, InstrumentId, OpId, Pipeline, PipelineBuilder};
use crate::synth::voice::Voice;

pub const VIBRATO: MixFlags = MixFlags::bit(0);
pub const LFO_FILTER: MixFlags = MixFlags::bit(1);
pub const CHORUS: MixFlags = MixFlags::bit(2);

/// Global controllers 0-2 set the oscillator, oscillator and noise levels.
pub const CONTROLLER_MIX: u8 = 0;

/// Vibrato depth as a fraction of the frequency: fixed part, then the wheel.
const VIBRATO_DEPTH: f32 = 0.004;
const WHEEL_DEPTH: f32 = 0.02;
const LFO_SWEEP: f32 = 0.5;

struct Subtractive {
    lfo: OpId,
    oscillators: [OpId; 2],
    noise: OpId,
    filter_envelope: OpId,
    filter: OpId,
    amp_envelope: OpId,
    amp: OpId,
    chorus: OpId,
    chorus_on: bool,
    levels: [f32; 3],
    buffers: Buffers,
}

#[derive(Clone, Copy)]
struct Buffers {
    lfo: BufId,
    vibrato: BufId,
    sources: [BufId; 3],
    mix: BufId,
    filter_envelope: BufId,
    filter_mod: BufId,
    filtered: BufId,
    amp_envelope: BufId,
    voice: BufId,
    wet: [BufId; 2],
}

impl Algorithm for Subtractive {
    fn global_controller(&mut self, controls: &mut Controls<'_>, controller: u8, operator: u8, value: f32) {
        if mix_flag_controller(controls, controller, operator, value) {
            return;
        }
        if let Some(level) = self.levels.get_mut(controller.wrapping_sub(CONTROLLER_MIX) as usize) {
            *level = value;
        }
    }

    fn pre_voice(&mut self, block: &mut Block<'_>, shared: &mut Voice) {
        block.run(self.lfo, shared);
    }

    fn operate(&mut self, block: &mut Block<'_>, voice: &mut Voice) {
        let b = self.buffers;
        let flags = block.mix_flags();
        let wheel = block.controller(CC_MOD_WHEEL) * WHEEL_DEPTH;
        let depth = if flags.contains(VIBRATO) { VIBRATO_DEPTH + wheel } else { wheel };
        block.merge(b.vibrato, 0.0, b.lfo, depth);

        for op in self.oscillators {
            block.run(op, voice);
        }
        block.run(self.noise, voice);
        block.fill(b.mix, 0.0);
        for (source, level) in b.sources.into_iter().zip(self.levels) {
            block.merge(b.mix, 1.0, source, level);
        }

        block.run(self.filter_envelope, voice);
        block.copy(b.filter_mod, b.filter_envelope);
        if flags.contains(LFO_FILTER) {
            block.merge(b.filter_mod, 1.0, b.lfo, LFO_SWEEP);
        }
        block.run(self.filter, voice);

        block.run(self.amp_envelope, voice);
        block.run(self.amp, voice);
        block.merge(BufId::LEFT, 1.0, b.voice, 1.0);
        block.merge(BufId::RIGHT, 1.0, b.voice, 1.0);
    }

    fn post_voice(&mut self, block: &mut Block<'_>, shared: &mut Voice) {
        let on = block.mix_flags().contains(CHORUS);
        if on && !self.chorus_on {
            block.clear(self.chorus, shared);
        }
        self.chorus_on = on;
        if !on {
            return;
        }
        block.run(self.chorus, shared);
        block.copy(BufId::LEFT, self.buffers.wet[0]);
        block.copy(BufId::RIGHT, self.buffers.wet[1]);
    }
}

pub fn build(palette: &Palette, id: InstrumentId, config: &InstrumentConfig) -> Result<Pipeline, EngineError> {
    let mut p = PipelineBuilder::new(palette, id, config);
    let buffers = Buffers {
        lfo: p.buffer("lfo"),
        vibrato: p.buffer("vibrato"),
        sources: [p.buffer("osc-1"), p.buffer("osc-2"), p.buffer("noise")],
        mix: p.buffer("mix"),
        filter_envelope: p.buffer("filter-env"),
        filter_mod: p.buffer("filter-mod"),
        filtered: p.buffer("filtered"),
        amp_envelope: p.buffer("amp-env"),
        voice: p.buffer("voice"),
        wet: [p.buffer("wet-left"), p.buffer("wet-right")],
    };
    let b = buffers;

    let lfo = p.operator(OperatorKind::Lfo, "lfo");
    p.output(lfo, "out", b.lfo)?.param(lfo, "rate", 0.45)?;

    let osc1 = p.operator(OperatorKind::Oscillator, "osc-1");
    p.input(osc1, "fm", b.vibrato)?
        .output(osc1, "out", b.sources[0])?
        .step(osc1, "waveform", 2)?;
    let osc2 = p.operator(OperatorKind::Oscillator, "osc-2");
    p.input(osc2, "fm", b.vibrato)?
        .output(osc2, "out", b.sources[1])?
        .step(osc2, "waveform", 5)?
        .param(osc2, "tune", 0.52)?;
    let noise = p.operator(OperatorKind::Noise, "noise");
    p.output(noise, "out", b.sources[2])?.step(noise, "pink", 1)?;

    let filter_envelope = p.operator(OperatorKind::Envelope, "filter-env");
    p.output(filter_envelope, "out", b.filter_envelope)?
        .param(filter_envelope, "sustain", 0.3)?
        .step(filter_envelope, "terminates", 0)?;
    let filter = p.operator(OperatorKind::Filter, "filter");
    p.input(filter, "in", b.mix)?
        .input(filter, "mod", b.filter_mod)?
        .output(filter, "out", b.filtered)?
        .param(filter, "cutoff", 0.45)?
        .param(filter, "resonance", 0.35)?;

    let amp_envelope = p.operator(OperatorKind::Envelope, "amp-env");
    p.output(amp_envelope, "out", b.amp_envelope)?;
    let amp = p.operator(OperatorKind::Amplifier, "amp");
    p.input(amp, "in", b.filtered)?
        .input(amp, "gain", b.amp_envelope)?
        .output(amp, "out", b.voice)?;

    let chorus = p.effect(OperatorKind::Chorus, "chorus");
    p.input(chorus, "left", BufId::LEFT)?
        .input(chorus, "right", BufId::RIGHT)?
        .output(chorus, "left", b.wet[0])?
        .output(chorus, "right", b.wet[1])?;

    p.mix_flags(VIBRATO.union(CHORUS));
    p.finish(Subtractive {
        lfo,
        oscillators: [osc1, osc2],
        noise,
        filter_envelope,
        filter,
        amp_envelope,
        amp,
        chorus,
        chorus_on: false,
        levels: [0.5, 0.35, 0.05],
        buffers,
    })
}
