use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::prelude::TAU;
use crate::synth::tables::{curves, exp_scale, WAVE_SIZE};
use crate::synth::voice::Voice;

pub const COARSE: usize = 0;
pub const FINE: usize = 1;
pub const LEVEL: usize = 2;
pub const FEEDBACK: usize = 3;
pub const FIXED: usize = 4;
pub const FIXED_HZ: usize = 5;

pub const IN_PM: usize = 0;
pub const IN_ENV: usize = 1;
pub const OUT: usize = 0;

/// Coarse ratio positions: 0.5 then 1 to 16.
const COARSE_STEPS: u16 = 17;
/// Modulation depth, in cycles, of a full-scale input.
const MOD_CYCLES: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseModParams {
    pub ratio: f32,
    pub level: f32,
    pub feedback: f32,
    pub fixed: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseModLocal {
    phase: f32, // cycles, [0, 1)
    fb1: f32,
    fb2: f32,
}

/// Sine operator for phase-modulation stacks: frequency is a ratio of the
/// voice pitch (or fixed), phase is offset by the `pm` input and by its own
/// averaged output, amplitude follows the `env` input.
pub struct PhaseMod {
    spec: OperatorSpec,
    sample_rate: f32,
    sine: Vec<f32>,
}

impl PhaseMod {
    #[inline]
    fn sine(&self, cycles: f32) -> f32 {
        let position = cycles.rem_euclid(1.0) * WAVE_SIZE as f32;
        let index = (position as usize).min(WAVE_SIZE - 1);
        let fraction = position - index as f32;
        self.sine[index] + fraction * (self.sine[index + 1] - self.sine[index])
    }

    fn ratio(&self, params: &OperatorParams<PhaseModParams>) -> f32 {
        let coarse = match self.spec.params[COARSE].position(params.value(COARSE)) {
            0 => 0.5,
            n => n as f32,
        };
        coarse * (1.0 + params.value(FINE))
    }

    fn fixed(&self, params: &OperatorParams<PhaseModParams>) -> Option<f32> {
        (params.value(FIXED) > 0.5).then(|| exp_scale(params.value(FIXED_HZ), 1.0, 4000.0))
    }
}

impl Operator for PhaseMod {
    type Params = PhaseModParams;
    type Local = PhaseModLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let coarse = ParamSpec::stepped("coarse", "Frequency ratio, 0.5 then 1-16", COARSE_STEPS, 0.0);
        let unity = coarse.at(1);
        let spec = OperatorSpec::new("phase-mod", "Phase modulation operator", index, sample_rate, block_size)
            .param(ParamSpec { default: unity, ..coarse })
            .param(ParamSpec::continuous("fine", "Ratio fine tune", 0.0, 1.0, 0.0))
            .param(ParamSpec::continuous("level", "Output level", 0.0, 1.0, 1.0))
            .param(ParamSpec::continuous("feedback", "Self modulation", 0.0, 1.0, 0.0))
            .param(ParamSpec::toggle("fixed", "Ignore the voice pitch", false))
            .param(ParamSpec::continuous("fixed-hz", "Fixed frequency", 1.0, 4000.0, 0.5))
            .input("pm", "Phase modulation", Coupling::Ac)
            .input("env", "Amplitude", Coupling::Dc)
            .output("out", "Audio output", Coupling::Ac)
            .local::<PhaseModLocal>();
        let sine = (0..=WAVE_SIZE)
            .map(|i| (TAU * i as f32 / WAVE_SIZE as f32).sin())
            .collect();
        Self {
            spec,
            sample_rate,
            sine,
        }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<PhaseModParams>) {
        params.derived = PhaseModParams::default();
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<PhaseModParams>, index: usize, value: f32) {
        match index {
            COARSE | FINE => params.derived.ratio = self.ratio(params),
            LEVEL => params.derived.level = curves().gain(value),
            FEEDBACK => params.derived.feedback = value * 0.5,
            FIXED | FIXED_HZ => params.derived.fixed = self.fixed(params),
            _ => {}
        }
    }

    fn operate(
        &self,
        voice: &mut Voice,
        params: &OperatorParams<PhaseModParams>,
        local: &mut PhaseModLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let p = &params.derived;
        let frames = ports.frames();
        let (start, end) = match p.fixed {
            Some(hz) => {
                let rate = hz / self.sample_rate;
                (rate, rate)
            }
            None => {
                let (start, end) = voice.step_range();
                let to_rate = p.ratio / WAVE_SIZE as f32;
                (start * to_rate, end * to_rate)
            }
        };
        let increment = (end - start) / frames as f32;

        let envelope = ports.input(IN_ENV);
        let (pm, out) = ports.io(IN_PM, OUT);
        let mut rate = start;
        let mut phase = local.phase;
        let (mut fb1, mut fb2) = (local.fb1, local.fb2);
        for ((sample, m), env) in out.iter_mut().zip(pm).zip(envelope) {
            let feedback = p.feedback * (fb1 + fb2);
            let y = self.sine(phase + m * MOD_CYCLES + feedback) * env * p.level;
            fb2 = fb1;
            fb1 = y;
            *sample = y;
            phase += rate;
            if phase >= 1.0 {
                phase -= phase.floor();
            }
            rate += increment;
        }
        local.phase = phase;
        local.fb1 = fb1;
        local.fb2 = fb2;
        OperateStatus::Ok
    }
}
