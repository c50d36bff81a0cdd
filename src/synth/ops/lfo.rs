use crate::synth::flags::VoiceFlags;
use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::prelude::{fill_random, TAU};
use crate::synth::tables::{curves, exp_scale};
use crate::synth::voice::Voice;

pub const RATE: usize = 0;
pub const WAVEFORM: usize = 1;
pub const DEPTH: usize = 2;
pub const SYNC: usize = 3;

pub const OUT: usize = 0;

const MIN_RATE: f32 = 0.05;
const MAX_RATE: f32 = 40.0;
const HOLD_VALUES: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    Square,
    Ramp,
    SampleHold,
}

#[derive(Debug, Clone, Default)]
pub struct LfoParams {
    pub increment: f32,
    pub shape: LfoShape,
    pub depth: f32,
    pub sync: bool,
    /// Random steps for sample and hold, drawn when the binding is reset.
    pub holds: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LfoLocal {
    phase: f32, // [0, 1)
    cycle: usize,
}

/// Bipolar low-frequency oscillator. Usually bound once per instrument and
/// run from the pre-voice hook, or per voice with key sync.
pub struct Lfo {
    spec: OperatorSpec,
    sample_rate: f32,
}

impl Operator for Lfo {
    type Params = LfoParams;
    type Local = LfoLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new("lfo", "Low-frequency oscillator", index, sample_rate, block_size)
            .param(ParamSpec::continuous("rate", "Frequency", MIN_RATE, MAX_RATE, 0.5))
            .param(ParamSpec::stepped("waveform", "Sine, triangle, square, ramp, sample and hold", 5, 0.0))
            .param(ParamSpec::continuous("depth", "Output level", 0.0, 1.0, 1.0))
            .param(ParamSpec::toggle("sync", "Restart on each note", false))
            .output("out", "Modulation output", Coupling::Dc)
            .local::<LfoLocal>();
        Self { spec, sample_rate }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<LfoParams>) {
        params.derived = LfoParams {
            holds: vec![0.0; HOLD_VALUES],
            ..LfoParams::default()
        };
        fill_random(&mut params.derived.holds, self.spec.index as u64);
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<LfoParams>, index: usize, value: f32) {
        let derived = &mut params.derived;
        match index {
            RATE => derived.increment = exp_scale(value, MIN_RATE, MAX_RATE) / self.sample_rate,
            WAVEFORM => {
                derived.shape = match self.spec.params[WAVEFORM].position(value) {
                    0 => LfoShape::Sine,
                    1 => LfoShape::Triangle,
                    2 => LfoShape::Square,
                    3 => LfoShape::Ramp,
                    _ => LfoShape::SampleHold,
                }
            }
            DEPTH => derived.depth = curves().gain(value),
            SYNC => derived.sync = value > 0.5,
            _ => {}
        }
    }

    fn operate(
        &self,
        voice: &mut Voice,
        params: &OperatorParams<LfoParams>,
        local: &mut LfoLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let p = &params.derived;
        if p.sync && voice.observed().contains(VoiceFlags::KEY_ON) {
            local.phase = 0.0;
        }
        let hold_count = p.holds.len().max(1);
        let mut phase = local.phase;
        let mut cycle = local.cycle % hold_count;
        for sample in ports.output(OUT).iter_mut() {
            let value = match p.shape {
                LfoShape::Sine => (phase * TAU).sin(),
                LfoShape::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
                LfoShape::Square => {
                    if phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                LfoShape::Ramp => 2.0 * phase - 1.0,
                LfoShape::SampleHold => p.holds.get(cycle).copied().unwrap_or(0.0),
            };
            *sample = value * p.depth;
            phase += p.increment;
            if phase >= 1.0 {
                phase -= 1.0; // wrap [0.0, 1.0)
                cycle = (cycle + 1) % hold_count;
            }
        }
        local.phase = phase;
        local.cycle = cycle;
        OperateStatus::Ok
    }
}
