//! Drawbar organ through a rotating speaker.
//!
//! Each voice sums four sine drawbars into the organ bus and its percussion
//! tone into a separate percussion bus. Both buses are shared by all voices
//! and are mixed once per block in `post_voice`, ahead of the rotary effect.

use super::mix_flag_controller;
use crate::config::InstrumentConfig;
use crate::error::EngineError;
use crate::synth::buffer::BufId;
use crate::synth::flags::MixFlags;
use crate::synth::ops::{rotary, OperatorKind, Palette};
use crate::synth::pipeline::{Algorithm, Block, Controls, InstrumentId, OpId, Pipeline, PipelineBuilder};
use crate::synth::voice::Voice;

pub const PERCUSSION: MixFlags = MixFlags::bit(0);
pub const ROTARY: MixFlags = MixFlags::bit(1);

/// Global controllers 0-3 set the drawbars.
pub const CONTROLLER_DRAWBAR: u8 = 0;
pub const CONTROLLER_PERCUSSION: u8 = 4;
/// Chorale below 0.5, tremolo above.
pub const CONTROLLER_ROTOR: u8 = 5;

const DRAWBARS: usize = 4;
/// 16', 8', 4' and 2' on the footage selector.
const FOOTAGES: [usize; DRAWBARS] = [1, 2, 3, 4];

struct Organ {
    drawbars: [OpId; DRAWBARS],
    click: OpId,
    amp: OpId,
    percussion_osc: OpId,
    percussion_envelope: OpId,
    percussion_amp: OpId,
    rotary: OpId,
    rotary_on: bool,
    levels: [f32; DRAWBARS],
    percussion_level: f32,
    buffers: Buffers,
}

#[derive(Clone, Copy)]
struct Buffers {
    drawbar: BufId,
    tone: BufId,
    click: BufId,
    voice: BufId,
    bus: BufId,
    percussion_tone: BufId,
    percussion_envelope: BufId,
    percussion_voice: BufId,
    percussion_bus: BufId,
    rotor: [BufId; 2],
}

impl Algorithm for Organ {
    fn global_controller(&mut self, controls: &mut Controls<'_>, controller: u8, operator: u8, value: f32) {
        if mix_flag_controller(controls, controller, operator, value) {
            return;
        }
        match controller {
            CONTROLLER_PERCUSSION => self.percussion_level = value,
            CONTROLLER_ROTOR => controls.set_param(self.rotary, rotary::SPEED, value),
            _ => {
                let index = controller.wrapping_sub(CONTROLLER_DRAWBAR) as usize;
                if let Some(level) = self.levels.get_mut(index) {
                    *level = value;
                }
            }
        }
    }

    fn pre_voice(&mut self, block: &mut Block<'_>, _shared: &mut Voice) {
        block.fill(self.buffers.bus, 0.0);
        block.fill(self.buffers.percussion_bus, 0.0);
    }

    fn operate(&mut self, block: &mut Block<'_>, voice: &mut Voice) {
        let b = self.buffers;
        block.fill(b.tone, 0.0);
        for (op, level) in self.drawbars.into_iter().zip(self.levels) {
            block.run(op, voice);
            block.merge(b.tone, 1.0, b.drawbar, level / DRAWBARS as f32);
        }
        block.run(self.click, voice);
        block.run(self.amp, voice);
        block.merge(b.bus, 1.0, b.voice, 1.0);

        if block.mix_flags().contains(PERCUSSION) {
            block.run(self.percussion_osc, voice);
            block.run(self.percussion_envelope, voice);
            block.run(self.percussion_amp, voice);
            block.merge(b.percussion_bus, 1.0, b.percussion_voice, 1.0);
        }
    }

    fn post_voice(&mut self, block: &mut Block<'_>, shared: &mut Voice) {
        let b = self.buffers;
        if block.mix_flags().contains(PERCUSSION) {
            block.merge(b.bus, 1.0, b.percussion_bus, self.percussion_level);
        }
        let rotary = block.mix_flags().contains(ROTARY);
        if rotary && !self.rotary_on {
            block.clear(self.rotary, shared);
        }
        self.rotary_on = rotary;
        if rotary {
            block.run(self.rotary, shared);
            block.copy(BufId::LEFT, b.rotor[0]);
            block.copy(BufId::RIGHT, b.rotor[1]);
        } else {
            block.copy(BufId::LEFT, b.bus);
            block.copy(BufId::RIGHT, b.bus);
        }
    }
}

pub fn build(palette: &Palette, id: InstrumentId, config: &InstrumentConfig) -> Result<Pipeline, EngineError> {
    let mut p = PipelineBuilder::new(palette, id, config);
    let b = Buffers {
        drawbar: p.buffer("drawbar"),
        tone: p.buffer("tone"),
        click: p.buffer("click"),
        voice: p.buffer("voice"),
        bus: p.buffer("organ-bus"),
        percussion_tone: p.buffer("percussion-tone"),
        percussion_envelope: p.buffer("percussion-env"),
        percussion_voice: p.buffer("percussion-voice"),
        percussion_bus: p.buffer("percussion-bus"),
        rotor: [p.buffer("rotor-left"), p.buffer("rotor-right")],
    };

    const LABELS: [&str; DRAWBARS] = ["drawbar-16", "drawbar-8", "drawbar-4", "drawbar-2"];
    let mut drawbars = Vec::with_capacity(DRAWBARS);
    for (label, footage) in LABELS.into_iter().zip(FOOTAGES) {
        let op = p.operator(OperatorKind::Oscillator, label);
        // every drawbar writes the same buffer; operate sums them in turn
        p.input(op, "fm", BufId::SILENCE)?
            .output(op, "out", b.drawbar)?
            .step(op, "transpose", footage)?;
        drawbars.push(op);
    }

    // key click: near-instant attack and release, full sustain
    let click = p.operator(OperatorKind::Envelope, "click");
    p.output(click, "out", b.click)?
        .param(click, "attack", 0.02)?
        .param(click, "decay", 0.1)?
        .param(click, "sustain", 1.0)?
        .param(click, "release", 0.08)?
        .param(click, "touch", 0.0)?;
    let amp = p.operator(OperatorKind::Amplifier, "amp");
    p.input(amp, "in", b.tone)?
        .input(amp, "gain", b.click)?
        .output(amp, "out", b.voice)?
        .param(amp, "gain", 1.0)?;

    let percussion_osc = p.operator(OperatorKind::Oscillator, "percussion");
    p.input(percussion_osc, "fm", BufId::SILENCE)?
        .output(percussion_osc, "out", b.percussion_tone)?
        .step(percussion_osc, "transpose", 3)?;
    let percussion_envelope = p.operator(OperatorKind::Envelope, "percussion-env");
    p.output(percussion_envelope, "out", b.percussion_envelope)?
        .param(percussion_envelope, "attack", 0.0)?
        .param(percussion_envelope, "decay", 0.3)?
        .param(percussion_envelope, "sustain", 0.0)?
        .step(percussion_envelope, "terminates", 0)?;
    let percussion_amp = p.operator(OperatorKind::Amplifier, "percussion-amp");
    p.input(percussion_amp, "in", b.percussion_tone)?
        .input(percussion_amp, "gain", b.percussion_envelope)?
        .output(percussion_amp, "out", b.percussion_voice)?;

    let rotary = p.effect(OperatorKind::Rotary, "rotary");
    p.input(rotary, "in", b.bus)?
        .output(rotary, "left", b.rotor[0])?
        .output(rotary, "right", b.rotor[1])?;

    let drawbars: [OpId; DRAWBARS] = drawbars
        .try_into()
        .map_err(|_| EngineError::Wiring("organ drawbar count".into()))?;
    p.mix_flags(PERCUSSION.union(ROTARY));
    p.finish(Organ {
        drawbars,
        click,
        amp,
        percussion_osc,
        percussion_envelope,
        percussion_amp,
        rotary,
        rotary_on: false,
        levels: [0.8, 1.0, 0.6, 0.4],
        percussion_level: 0.5,
        buffers: b,
    })
}
