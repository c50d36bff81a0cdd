use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::tables::curves;
use crate::synth::voice::Voice;

pub const GAIN: usize = 0;

pub const IN: usize = 0;
pub const IN_GAIN: usize = 1;
pub const OUT: usize = 0;

/// Voltage-controlled amplifier: `out = in * gain_in * gain`.
pub struct Amplifier {
    spec: OperatorSpec,
}

impl Operator for Amplifier {
    type Params = f32;
    type Local = ();

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new("amplifier", "Controlled amplifier", index, sample_rate, block_size)
            .param(ParamSpec::continuous("gain", "Output level", 0.0, 1.0, 0.8))
            .input("in", "Audio input", Coupling::Ac)
            .input("gain", "Gain control", Coupling::Dc)
            .output("out", "Audio output", Coupling::Ac);
        Self { spec }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<f32>) {
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<f32>, index: usize, value: f32) {
        if index == GAIN {
            params.derived = curves().gain(value);
        }
    }

    fn operate(
        &self,
        _voice: &mut Voice,
        params: &OperatorParams<f32>,
        _local: &mut (),
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let gain = params.derived;
        let control = ports.input(IN_GAIN);
        let (input, out) = ports.io(IN, OUT);
        for ((sample, x), g) in out.iter_mut().zip(input).zip(control) {
            *sample = x * g * gain;
        }
        OperateStatus::Ok
    }
}
