use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::prelude::fill_random;
use crate::synth::tables::curves;
use crate::synth::voice::Voice;

pub const GAIN: usize = 0;
pub const PINK: usize = 1;

pub const OUT: usize = 0;

const TABLE_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, Default)]
pub struct NoiseParams {
    pub table: Vec<f32>,
    pub gain: f32,
    pub pink: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseLocal {
    cursor: usize,
    started: bool,
    b0: f32,
    b1: f32,
    b2: f32,
}

/// White or pink noise read from a prerendered table so `operate` never
/// touches a random generator.
pub struct Noise {
    spec: OperatorSpec,
}

impl Operator for Noise {
    type Params = NoiseParams;
    type Local = NoiseLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new("noise", "Noise source", index, sample_rate, block_size)
            .param(ParamSpec::continuous("gain", "Output level", 0.0, 1.0, 1.0))
            .param(ParamSpec::toggle("pink", "Pink rather than white", false))
            .output("out", "Audio output", Coupling::Ac)
            .local::<NoiseLocal>();
        Self { spec }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<NoiseParams>) {
        params.derived.table = vec![0.0; TABLE_SIZE];
        fill_random(&mut params.derived.table, 0x6e6f_6973_65);
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<NoiseParams>, index: usize, value: f32) {
        match index {
            GAIN => params.derived.gain = curves().gain(value),
            PINK => params.derived.pink = value > 0.5,
            _ => {}
        }
    }

    fn operate(
        &self,
        voice: &mut Voice,
        params: &OperatorParams<NoiseParams>,
        local: &mut NoiseLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let p = &params.derived;
        if p.table.is_empty() {
            ports.output(OUT).fill(0.0);
            return OperateStatus::Ok;
        }
        if !local.started {
            // spread voices across the table so they decorrelate
            local.cursor = voice.index().wrapping_mul(7919) % p.table.len();
            local.started = true;
        }
        let mut cursor = local.cursor;
        for sample in ports.output(OUT).iter_mut() {
            let white = p.table[cursor];
            cursor += 1;
            if cursor == p.table.len() {
                cursor = 0;
            }
            let value = if p.pink {
                // Paul Kellet's economy pink filter
                local.b0 = 0.99765 * local.b0 + white * 0.0990460;
                local.b1 = 0.96300 * local.b1 + white * 0.2965164;
                local.b2 = 0.57000 * local.b2 + white * 1.0526913;
                (local.b0 + local.b1 + local.b2 + white * 0.1848) * 0.25
            } else {
                white
            };
            *sample = value * p.gain;
        }
        local.cursor = cursor;
        OperateStatus::Ok
    }
}
