//! Four-operator phase modulation.
//!
//! Routing is described by a 4x5 matrix: row `i` is the source operator,
//! columns 0-3 the operators it modulates (the diagonal is self feedback)
//! and column 4 sends it to the output. The evaluation order is worked out
//! from the matrix whenever a preset is selected, so modulators always run
//! before the operators they drive.

use super::mix_flag_controller;
use crate::config::InstrumentConfig;
use crate::error::EngineError;
use crate::synth::buffer::BufId;
use crate::synth::flags::VoiceFlags;
use crate::synth::operator::OperateStatus;
use crate::synth::ops::{phase_mod, OperatorKind, Palette};
use crate::synth::pipeline::{Algorithm, Block, Controls, InstrumentId, OpId, Pipeline, PipelineBuilder};
use crate::synth::voice::Voice;
use strum::EnumCount;
use strum_macros::{EnumCount as EnumCountMacro, EnumIter, FromRepr};

pub const OPERATORS: usize = 4;
/// Column of the routing matrix that feeds the output.
pub const OUT: usize = OPERATORS;

/// Global controller 0 selects the preset.
pub const CONTROLLER_PRESET: u8 = 0;

/// Feedback amount applied where the matrix diagonal is set.
const FEEDBACK: f32 = 0.35;
const MODULATOR_LEVEL: f32 = 0.45;

pub type Matrix = [[u8; OPERATORS + 1]; OPERATORS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumCountMacro, EnumIter, FromRepr)]
pub enum FmPreset {
    /// 3 -> 2 -> 1 -> 0 -> out, feedback on 3.
    #[default]
    Stack,
    /// Two modulator/carrier pairs.
    Pairs,
    /// Operator 3 drives three carriers.
    Fanout,
    /// Every operator straight to the output.
    Additive,
    /// One self-modulating carrier.
    Feedback,
}

impl FmPreset {
    /// Preset for a normalized controller value.
    pub fn at(value: f32) -> Self {
        let index = (value.clamp(0.0, 1.0) * (Self::COUNT - 1) as f32).round() as usize;
        Self::from_repr(index.min(Self::COUNT - 1)).unwrap_or_default()
    }

    pub fn matrix(self) -> Matrix {
        match self {
            FmPreset::Stack => [
                // modulated 0  1  2  3  OUT
                [0, 0, 0, 0, 1],
                [1, 0, 0, 0, 0],
                [0, 1, 0, 0, 0],
                [0, 0, 1, 1, 0],
            ],
            FmPreset::Pairs => [
                [0, 0, 0, 0, 1],
                [1, 0, 0, 0, 0],
                [0, 0, 0, 0, 1],
                [0, 0, 1, 0, 0],
            ],
            FmPreset::Fanout => [
                [0, 0, 0, 0, 1],
                [0, 0, 0, 0, 1],
                [0, 0, 0, 0, 1],
                [1, 1, 1, 1, 0],
            ],
            FmPreset::Additive => [
                [0, 0, 0, 0, 1],
                [0, 0, 0, 0, 1],
                [0, 0, 0, 0, 1],
                [0, 0, 0, 0, 1],
            ],
            FmPreset::Feedback => [
                [1, 0, 0, 0, 1],
                [0, 0, 0, 0, 0],
                [0, 0, 0, 0, 0],
                [0, 0, 0, 0, 0],
            ],
        }
    }
}

/// Evaluation plan derived from a routing matrix. Fixed size so a new plan
/// can be made at a block boundary without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Plan {
    order: [usize; OPERATORS],
    len: usize,
    carriers: [bool; OPERATORS],
    feedback: [bool; OPERATORS],
    // modulates[j][i]: operator j feeds operator i
    modulates: [[bool; OPERATORS]; OPERATORS],
}

impl Plan {
    /// Orders every operator that reaches the output after all of its
    /// modulators. A modulation cycle other than self feedback is rejected.
    pub fn new(matrix: &Matrix) -> Result<Self, EngineError> {
        let mut plan = Plan::default();
        for (from, row) in matrix.iter().enumerate() {
            plan.carriers[from] = row[OUT] != 0;
            plan.feedback[from] = row[from] != 0;
            for to in 0..OPERATORS {
                plan.modulates[from][to] = to != from && row[to] != 0;
            }
        }
        if !plan.carriers.iter().any(|c| *c) {
            return Err(EngineError::Wiring("no operator reaches the output".into()));
        }
        let mut state = [Visit::New; OPERATORS];
        for carrier in 0..OPERATORS {
            if plan.carriers[carrier] {
                plan.visit(carrier, &mut state)?;
            }
        }
        Ok(plan)
    }

    fn visit(&mut self, op: usize, state: &mut [Visit; OPERATORS]) -> Result<(), EngineError> {
        match state[op] {
            Visit::Done => return Ok(()),
            Visit::Open => {
                return Err(EngineError::Wiring(format!("modulation cycle through operator {op}")))
            }
            Visit::New => {}
        }
        state[op] = Visit::Open;
        for source in 0..OPERATORS {
            if self.modulates[source][op] {
                self.visit(source, state)?;
            }
        }
        state[op] = Visit::Done;
        self.order[self.len] = op;
        self.len += 1;
        Ok(())
    }

    /// Operators in evaluation order.
    pub fn order(&self) -> &[usize] {
        &self.order[..self.len]
    }

    pub fn is_carrier(&self, op: usize) -> bool {
        self.carriers[op]
    }

    pub fn carriers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..OPERATORS).filter(|op| self.carriers[*op])
    }

    pub fn has_feedback(&self, op: usize) -> bool {
        self.feedback[op]
    }

    pub fn modulators(&self, op: usize) -> impl Iterator<Item = usize> + '_ {
        (0..OPERATORS).filter(move |source| self.modulates[*source][op])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Open,
    Done,
}

#[derive(Clone, Copy)]
struct Slot {
    envelope: OpId,
    operator: OpId,
    modulation: BufId,
    out: BufId,
}

struct Fm {
    slots: [Slot; OPERATORS],
    plan: Plan,
    voice: BufId,
}

impl Fm {
    fn apply(&mut self, controls: &mut Controls<'_>, plan: Plan) {
        for (index, slot) in self.slots.iter().enumerate() {
            let feedback = if plan.has_feedback(index) { FEEDBACK } else { 0.0 };
            let level = if plan.is_carrier(index) { 1.0 } else { MODULATOR_LEVEL };
            controls.set_param(slot.operator, phase_mod::FEEDBACK, feedback);
            controls.set_param(slot.operator, phase_mod::LEVEL, level);
        }
        self.plan = plan;
    }
}

impl Algorithm for Fm {
    fn global_controller(&mut self, controls: &mut Controls<'_>, controller: u8, operator: u8, value: f32) {
        if mix_flag_controller(controls, controller, operator, value) {
            return;
        }
        if controller == CONTROLLER_PRESET {
            // every preset is acyclic
            if let Ok(plan) = Plan::new(&FmPreset::at(value).matrix()) {
                self.apply(controls, plan);
            }
        }
    }

    fn operate(&mut self, block: &mut Block<'_>, voice: &mut Voice) {
        let plan = self.plan;
        // Envelopes off the current plan still follow the note, so a preset
        // change mid-note picks up every operator at the right stage.
        let mut sounding = false;
        for (index, slot) in self.slots.iter().enumerate() {
            let status = block.run(slot.envelope, voice);
            if plan.is_carrier(index) && status == OperateStatus::Ok {
                sounding = true;
            }
        }
        for &index in plan.order() {
            let slot = self.slots[index];
            block.fill(slot.modulation, 0.0);
            for source in plan.modulators(index) {
                block.merge(slot.modulation, 1.0, self.slots[source].out, 1.0);
            }
            block.run(slot.operator, voice);
        }

        let carriers = plan.carriers().count().max(1) as f32;
        block.fill(self.voice, 0.0);
        for carrier in plan.carriers() {
            block.merge(self.voice, 1.0, self.slots[carrier].out, carriers.recip());
        }
        block.merge(BufId::LEFT, 1.0, self.voice, 1.0);
        block.merge(BufId::RIGHT, 1.0, self.voice, 1.0);

        // the voice lasts as long as its longest carrier
        if !sounding {
            voice.raise(VoiceFlags::KEY_DONE);
        }
    }
}

pub fn build(
    palette: &Palette,
    id: InstrumentId,
    config: &InstrumentConfig,
    preset: FmPreset,
) -> Result<Pipeline, EngineError> {
    let plan = Plan::new(&preset.matrix())?;
    let mut p = PipelineBuilder::new(palette, id, config);
    let voice = p.buffer("voice");

    const LABELS: [[&str; 5]; OPERATORS] = [
        ["env-1", "op-1", "pm-1", "level-1", "out-1"],
        ["env-2", "op-2", "pm-2", "level-2", "out-2"],
        ["env-3", "op-3", "pm-3", "level-3", "out-3"],
        ["env-4", "op-4", "pm-4", "level-4", "out-4"],
    ];
    let mut slots = Vec::with_capacity(OPERATORS);
    for (index, [envelope_label, operator_label, pm, level, out]) in LABELS.into_iter().enumerate() {
        let modulation = p.buffer(pm);
        let level = p.buffer(level);
        let out = p.buffer(out);

        let envelope = p.operator(OperatorKind::Envelope, envelope_label);
        p.output(envelope, "out", level)?
            .step(envelope, "terminates", 0)?
            .param(envelope, "decay", 0.45 - 0.05 * index as f32)?;
        let operator = p.operator(OperatorKind::PhaseMod, operator_label);
        let ratio = if plan.is_carrier(index) { 1 } else { 1 + index };
        p.input(operator, "pm", modulation)?
            .input(operator, "env", level)?
            .output(operator, "out", out)?
            .step(operator, "coarse", ratio)?;
        let feedback = if plan.has_feedback(index) { FEEDBACK } else { 0.0 };
        let gain = if plan.is_carrier(index) { 1.0 } else { MODULATOR_LEVEL };
        p.param(operator, "feedback", feedback)?.param(operator, "level", gain)?;

        slots.push(Slot {
            envelope,
            operator,
            modulation,
            out,
        });
    }
    let slots: [Slot; OPERATORS] = slots
        .try_into()
        .map_err(|_| EngineError::Wiring("fm operator count".into()))?;
    log::debug!("fm instrument {id}: {preset:?}, order {:?}", plan.order());
    p.finish(Fm { slots, plan, voice })
}
