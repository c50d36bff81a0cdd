use crate::synth::delayline::ModulatedDelayLine;
use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::tables::exp_scale;
use crate::synth::voice::Voice;

pub const RATE: usize = 0;
pub const DEPTH: usize = 1;
pub const MIX: usize = 2;
pub const DELAY: usize = 3;

pub const IN_LEFT: usize = 0;
pub const IN_RIGHT: usize = 1;
pub const OUT_LEFT: usize = 0;
pub const OUT_RIGHT: usize = 1;

const MIN_DELAY_MS: f32 = 5.0;
const MAX_DELAY_MS: f32 = 25.0;
const MAX_DEPTH_MS: f32 = 3.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChorusParams {
    pub rate: f32,
    pub depth: f32,
    pub mix: f32,
    pub delay: f32,
}

/// Delay lines for both channels, sized for the longest setting.
#[derive(Debug, Clone, Default)]
pub struct ChorusLocal {
    lines: Option<[ModulatedDelayLine; 2]>,
}

/// Stereo chorus: two modulated delays swept in quadrature.
pub struct Chorus {
    spec: OperatorSpec,
    sample_rate: f32,
}

impl Chorus {
    fn ms(&self, ms: f32) -> f32 {
        ms * self.sample_rate / 1000.0
    }

    fn lines(&self) -> [ModulatedDelayLine; 2] {
        let capacity = self.ms(MAX_DELAY_MS + MAX_DEPTH_MS) + 2.0;
        let base = self.ms(MIN_DELAY_MS);
        [0.0, 0.25].map(|phase| ModulatedDelayLine::new(base, capacity, 0.5, phase, 0.0, self.sample_rate))
    }
}

impl Operator for Chorus {
    type Params = ChorusParams;
    type Local = ChorusLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new("chorus", "Stereo chorus", index, sample_rate, block_size)
            .param(ParamSpec::continuous("rate", "Sweep rate in Hz", 0.1, 5.0, 0.4))
            .param(ParamSpec::continuous("depth", "Sweep depth", 0.0, 1.0, 0.5))
            .param(ParamSpec::continuous("mix", "Wet level", 0.0, 1.0, 0.5))
            .param(ParamSpec::continuous("delay", "Centre delay", MIN_DELAY_MS, MAX_DELAY_MS, 0.3))
            .input("left", "Left input", Coupling::Ac)
            .input("right", "Right input", Coupling::Ac)
            .output("left", "Left output", Coupling::Ac)
            .output("right", "Right output", Coupling::Ac)
            .local::<ChorusLocal>();
        Self { spec, sample_rate }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<ChorusParams>) {
        params.derived = ChorusParams::default();
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<ChorusParams>, index: usize, value: f32) {
        let derived = &mut params.derived;
        match index {
            RATE => derived.rate = exp_scale(value, 0.1, 5.0),
            DEPTH => derived.depth = self.ms(value * MAX_DEPTH_MS),
            MIX => derived.mix = value,
            DELAY => derived.delay = self.ms(MIN_DELAY_MS + value * (MAX_DELAY_MS - MIN_DELAY_MS)),
            _ => {}
        }
    }

    fn local(&self) -> ChorusLocal {
        ChorusLocal {
            lines: Some(self.lines()),
        }
    }

    fn clear(&self, local: &mut ChorusLocal) {
        match local.lines.as_mut() {
            Some(lines) => lines.iter_mut().for_each(ModulatedDelayLine::reset),
            None => local.lines = Some(self.lines()),
        }
    }

    fn operate(
        &self,
        _voice: &mut Voice,
        params: &OperatorParams<ChorusParams>,
        local: &mut ChorusLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let p = &params.derived;
        let inputs = [ports.input(IN_LEFT), ports.input(IN_RIGHT)];
        let (left, right) = ports.outputs2(OUT_LEFT, OUT_RIGHT);
        let Some(lines) = local.lines.as_mut() else {
            left.copy_from_slice(&inputs[0][..left.len()]);
            right.copy_from_slice(&inputs[1][..right.len()]);
            return OperateStatus::Ok;
        };
        let dry = 1.0 - p.mix;
        for ((line, input), output) in lines.iter_mut().zip(inputs).zip([left, right]) {
            line.set_lfo_freq(p.rate);
            line.set_depth_samples(p.depth);
            line.set_base_delay_samples(p.delay);
            for (sample, x) in output.iter_mut().zip(input) {
                *sample = x * dry + line.process(*x) * p.mix;
            }
        }
        OperateStatus::Ok
    }
}
