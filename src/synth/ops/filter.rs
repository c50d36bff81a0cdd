use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::prelude::PI;
use crate::synth::tables::{curves, exp_scale};
use crate::synth::voice::Voice;
use core::f32::consts::FRAC_1_SQRT_2;

pub const CUTOFF: usize = 0;
pub const RESONANCE: usize = 1;
pub const MODE: usize = 2;
pub const TRACKING: usize = 3;
pub const DEPTH: usize = 4;
pub const GAIN: usize = 5;

pub const IN: usize = 0;
pub const IN_MOD: usize = 1;
pub const OUT: usize = 0;

const MIN_CUTOFF: f32 = 20.0;
const MAX_CUTOFF: f32 = 18000.0;
const MAX_DEPTH_OCTAVES: f32 = 6.0;
/// Key tracking is relative to middle C.
const TRACKING_HZ: f32 = 261.63;

/// Normalized RBJ biquad coefficients.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadCoefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoefficients {
    pub fn lowpass(cutoff: f32, sample_rate: f32) -> Self {
        let (cos_omega, alpha) = Self::prepare(cutoff, sample_rate);
        let b1 = 1.0 - cos_omega;
        Self::normalize(b1 / 2.0, b1, b1 / 2.0, alpha, cos_omega)
    }

    pub fn highpass(cutoff: f32, sample_rate: f32) -> Self {
        let (cos_omega, alpha) = Self::prepare(cutoff, sample_rate);
        let b1 = -(1.0 + cos_omega);
        Self::normalize(-b1 / 2.0, b1, -b1 / 2.0, alpha, cos_omega)
    }

    fn prepare(cutoff: f32, sample_rate: f32) -> (f32, f32) {
        // keep the cutoff below Nyquist
        let sample_rate = sample_rate.max(1.0);
        let cutoff = cutoff.max(1.0).min(sample_rate * 0.49);
        let omega = 2.0 * PI * cutoff / sample_rate;
        (omega.cos(), omega.sin() / (2.0 * FRAC_1_SQRT_2))
    }

    fn normalize(b0: f32, b1: f32, b2: f32, alpha: f32, cos_omega: f32) -> Self {
        let a0 = 1.0 + alpha;
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Direct form I history for one biquad.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, c: &BiquadCoefficients, input: f32) -> f32 {
        // y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMode {
    #[default]
    LowPass,
    BandPass,
    HighPass,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterParams {
    pub cutoff: f32,
    pub damping: f32,
    pub mode: FilterMode,
    pub tracking: f32,
    pub depth: f32,
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterLocal {
    low: f32,
    band: f32,
}

/// Chamberlin state-variable filter with modulated cutoff and key tracking.
pub struct ResonantFilter {
    spec: OperatorSpec,
    sample_rate: f32,
}

impl Operator for ResonantFilter {
    type Params = FilterParams;
    type Local = FilterLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new("filter", "Resonant filter", index, sample_rate, block_size)
            .param(ParamSpec::continuous("cutoff", "Cutoff frequency", MIN_CUTOFF, MAX_CUTOFF, 0.7))
            .param(ParamSpec::continuous("resonance", "Emphasis", 0.0, 1.0, 0.2))
            .param(ParamSpec::stepped("mode", "Low, band or high pass", 3, 0.0))
            .param(ParamSpec::continuous("tracking", "Keyboard tracking", 0.0, 1.0, 0.5))
            .param(ParamSpec::continuous("depth", "Modulation depth in octaves", 0.0, MAX_DEPTH_OCTAVES, 0.5))
            .param(ParamSpec::continuous("gain", "Output level", 0.0, 1.0, 1.0))
            .input("in", "Audio input", Coupling::Ac)
            .input("mod", "Cutoff modulation", Coupling::Dc)
            .output("out", "Audio output", Coupling::Ac)
            .local::<FilterLocal>();
        Self { spec, sample_rate }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<FilterParams>) {
        params.derived = FilterParams::default();
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<FilterParams>, index: usize, value: f32) {
        let derived = &mut params.derived;
        match index {
            CUTOFF => derived.cutoff = exp_scale(value, MIN_CUTOFF, MAX_CUTOFF),
            // stays above zero so full resonance does not self-destruct
            RESONANCE => derived.damping = 2.0 * (1.0 - 0.97 * value),
            MODE => {
                derived.mode = match self.spec.params[MODE].position(value) {
                    0 => FilterMode::LowPass,
                    1 => FilterMode::BandPass,
                    _ => FilterMode::HighPass,
                }
            }
            TRACKING => derived.tracking = value,
            DEPTH => derived.depth = value * MAX_DEPTH_OCTAVES,
            GAIN => derived.gain = curves().gain(value),
            _ => {}
        }
    }

    fn operate(
        &self,
        voice: &mut Voice,
        params: &OperatorParams<FilterParams>,
        local: &mut FilterLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let p = &params.derived;
        let hz = voice.hz(self.sample_rate);
        let track = if hz > 0.0 && p.tracking > 0.0 {
            (hz / TRACKING_HZ).powf(p.tracking)
        } else {
            1.0
        };
        let base = p.cutoff * track;
        // Chamberlin is only stable while f stays below ~1
        let max_cutoff = self.sample_rate / 6.0;

        let modulation = ports.input(IN_MOD);
        let (input, out) = ports.io(IN, OUT);
        let (mut low, mut band) = (local.low, local.band);
        for ((sample, x), m) in out.iter_mut().zip(input).zip(modulation) {
            let cutoff = (base * (m * p.depth).exp2()).clamp(MIN_CUTOFF, max_cutoff);
            let f = 2.0 * (PI * cutoff / self.sample_rate).sin();
            low += f * band;
            let high = x - low - p.damping * band;
            band += f * high;
            let y = match p.mode {
                FilterMode::LowPass => low,
                FilterMode::BandPass => band,
                FilterMode::HighPass => high,
            };
            *sample = y * p.gain;
        }
        // flush denormals between notes
        local.low = if low.abs() < 1.0e-20 { 0.0 } else { low };
        local.band = if band.abs() < 1.0e-20 { 0.0 } else { band };
        OperateStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_passes_dc() {
        let c = BiquadCoefficients::lowpass(1000.0, 48000.0);
        let mut state = BiquadState::default();
        let mut y = 0.0;
        for _ in 0..4800 {
            y = state.process(&c, 1.0);
        }
        assert!((y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn highpass_blocks_dc() {
        let c = BiquadCoefficients::highpass(1000.0, 48000.0);
        let mut state = BiquadState::default();
        let mut y = 1.0;
        for _ in 0..4800 {
            y = state.process(&c, 1.0);
        }
        assert!(y.abs() < 1e-3);
    }
}
