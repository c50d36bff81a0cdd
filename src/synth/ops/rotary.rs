use super::filter::{BiquadCoefficients, BiquadState};
use crate::synth::delayline::ModulatedDelayLine;
use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::prelude::TAU;
use crate::synth::tables::{curves, exp_scale};
use crate::synth::voice::Voice;

pub const SPEED: usize = 0;
pub const ACCELERATION: usize = 1;
pub const HORN_DEPTH: usize = 2;
pub const DRUM_DEPTH: usize = 3;
pub const CROSSOVER: usize = 4;
pub const GAIN: usize = 5;

pub const IN: usize = 0;
pub const OUT_LEFT: usize = 0;
pub const OUT_RIGHT: usize = 1;

/// Rotor speeds in Hz, (horn, drum), for chorale and tremolo.
const SLOW: (f32, f32) = (0.8, 0.67);
const FAST: (f32, f32) = (6.7, 5.8);
/// Horn doppler excursion at full depth.
const HORN_DELAY_MS: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct RotaryParams {
    pub horn_hz: f32,
    pub drum_hz: f32,
    /// Per-sample approach toward the target rotor speed.
    pub inertia: f32,
    pub horn_depth: f32,
    pub drum_depth: f32,
    pub crossover: BiquadCoefficients,
    pub gain: f32,
}

#[derive(Debug, Clone, Default)]
pub struct RotaryLocal {
    horn_angle: f32,
    drum_angle: f32,
    horn_hz: f32,
    drum_hz: f32,
    split: BiquadState,
    horns: Option<[ModulatedDelayLine; 2]>,
}

/// Rotating speaker: the signal is split at the crossover, the top goes
/// through a doppler-shifted horn and the bottom through an amplitude
/// modulated drum. The rotors spin up and down with inertia.
pub struct Rotary {
    spec: OperatorSpec,
    sample_rate: f32,
}

impl Rotary {
    fn horns(&self) -> [ModulatedDelayLine; 2] {
        let depth = HORN_DELAY_MS * self.sample_rate / 1000.0;
        [0.0, 0.5].map(|phase| {
            ModulatedDelayLine::new(depth + 2.0, 2.0 * depth + 4.0, 0.0, phase, depth, self.sample_rate)
        })
    }
}

impl Operator for Rotary {
    type Params = RotaryParams;
    type Local = RotaryLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new("rotary", "Rotating speaker", index, sample_rate, block_size)
            .param(ParamSpec::toggle("speed", "Chorale or tremolo", false))
            .param(ParamSpec::continuous("acceleration", "Spin up time", 0.2, 5.0, 0.4))
            .param(ParamSpec::continuous("horn-depth", "Horn doppler depth", 0.0, 1.0, 0.7))
            .param(ParamSpec::continuous("drum-depth", "Drum tremolo depth", 0.0, 1.0, 0.5))
            .param(ParamSpec::continuous("crossover", "Horn/drum split", 200.0, 2000.0, 0.6))
            .param(ParamSpec::continuous("gain", "Output level", 0.0, 1.0, 1.0))
            .input("in", "Mono input", Coupling::Ac)
            .output("left", "Left output", Coupling::Ac)
            .output("right", "Right output", Coupling::Ac)
            .local::<RotaryLocal>();
        Self { spec, sample_rate }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<RotaryParams>) {
        params.derived = RotaryParams::default();
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<RotaryParams>, index: usize, value: f32) {
        let derived = &mut params.derived;
        match index {
            SPEED => {
                let (horn, drum) = if value > 0.5 { FAST } else { SLOW };
                derived.horn_hz = horn;
                derived.drum_hz = drum;
            }
            ACCELERATION => {
                let samples = exp_scale(value, 0.2, 5.0) * self.sample_rate;
                derived.inertia = 1.0 - (-5.0 / samples).exp();
            }
            HORN_DEPTH => derived.horn_depth = value,
            DRUM_DEPTH => derived.drum_depth = value,
            CROSSOVER => {
                let hz = exp_scale(value, 200.0, 2000.0);
                derived.crossover = BiquadCoefficients::lowpass(hz, self.sample_rate);
            }
            GAIN => derived.gain = curves().gain(value),
            _ => {}
        }
    }

    fn local(&self) -> RotaryLocal {
        RotaryLocal {
            horns: Some(self.horns()),
            ..RotaryLocal::default()
        }
    }

    fn clear(&self, local: &mut RotaryLocal) {
        let horns = local.horns.take();
        *local = RotaryLocal {
            horns: horns.or_else(|| Some(self.horns())),
            ..RotaryLocal::default()
        };
        if let Some(horns) = local.horns.as_mut() {
            horns.iter_mut().for_each(ModulatedDelayLine::reset);
        }
    }

    fn operate(
        &self,
        _voice: &mut Voice,
        params: &OperatorParams<RotaryParams>,
        local: &mut RotaryLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let p = &params.derived;
        let input = ports.input(IN);
        let (left, right) = ports.outputs2(OUT_LEFT, OUT_RIGHT);
        let Some([horn_l, horn_r]) = local.horns.as_mut() else {
            left.fill(0.0);
            right.fill(0.0);
            return OperateStatus::Ok;
        };
        let step = self.sample_rate.recip();
        for ((x, l), r) in input.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            local.horn_hz += (p.horn_hz - local.horn_hz) * p.inertia;
            local.drum_hz += (p.drum_hz - local.drum_hz) * p.inertia;
            local.horn_angle = (local.horn_angle + local.horn_hz * step).fract();
            local.drum_angle = (local.drum_angle + local.drum_hz * step).fract();

            let low = local.split.process(&p.crossover, *x);
            let high = x - low;
            let horn = (local.horn_angle * TAU).sin();
            let drum = (local.drum_angle * TAU).sin();

            let doppler = horn * p.horn_depth;
            let horn_left = horn_l.process_modulated(high, doppler) * (1.0 + 0.3 * doppler);
            let horn_right = horn_r.process_modulated(high, -doppler) * (1.0 - 0.3 * doppler);
            let tremolo = 0.5 * p.drum_depth * drum;
            *l = (horn_left + low * (1.0 + tremolo)) * p.gain;
            *r = (horn_right + low * (1.0 - tremolo)) * p.gain;
        }
        OperateStatus::Ok
    }
}
