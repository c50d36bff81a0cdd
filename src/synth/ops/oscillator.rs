use crate::synth::flags::VoiceFlags;
use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::prelude::{PI, TAU};
use crate::synth::tables::{curves, WAVE_SIZE};
use crate::synth::voice::Voice;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount as EnumCountMacro, EnumIter, FromRepr};

pub const WAVEFORM: usize = 0;
pub const DUTY: usize = 1;
pub const TRANSPOSE: usize = 2;
pub const TUNE: usize = 3;
pub const GAIN: usize = 4;

pub const IN_FM: usize = 0;
pub const OUT: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCountMacro, EnumIter, FromRepr)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    SawtoothSmooth,
    Triangle,
    Pulse,
}

impl Waveform {
    /// One cycle evaluated at `phase` radians.
    fn evaluate(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => phase.sin(),
            Waveform::Square => {
                if phase.sin() >= 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => {
                let cycles = phase / TAU;
                2.0 * (cycles - (cycles + 0.5).floor())
            }
            Waveform::SawtoothSmooth => 0.75 * phase.sin() / (1.25 + phase.cos()),
            Waveform::Triangle => (2.0 / PI) * phase.sin().asin(),
            // rendered per binding from the duty parameter
            Waveform::Pulse => 0.0,
        }
    }
}

/// Footage of the transpose switch, lowest first.
const OCTAVES: [f32; 5] = [0.25, 0.5, 1.0, 2.0, 4.0];

/// Rendered wavetable with one guard sample for interpolation.
#[derive(Debug, Clone, Default)]
pub struct OscillatorParams {
    pub table: Vec<f32>,
    pub waveform: Option<Waveform>,
    pub ratio: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OscillatorLocal {
    phase: f32,
}

/// Band-unlimited wavetable oscillator following the voice's pitch.
pub struct Oscillator {
    spec: OperatorSpec,
    shapes: Vec<Vec<f32>>,
}

impl Oscillator {
    fn render(&self, params: &mut OperatorParams<OscillatorParams>) {
        let position = self.spec.params[WAVEFORM].position(params.value(WAVEFORM));
        let position = position.min(Waveform::COUNT - 1);
        let waveform = Waveform::from_repr(position).unwrap_or(Waveform::Sine);
        let gain = curves().gain(params.value(GAIN));
        let duty = 0.05 + 0.9 * params.value(DUTY);
        let table = &mut params.derived.table;
        if waveform == Waveform::Pulse {
            let high = (duty * WAVE_SIZE as f32) as usize;
            // centred so the pulse carries no DC
            let offset = 2.0 * duty - 1.0;
            for (i, sample) in table.iter_mut().enumerate() {
                let level = if i % WAVE_SIZE < high { 1.0 } else { -1.0 };
                *sample = (level - offset) * gain;
            }
        } else {
            let shape = &self.shapes[position];
            for (sample, base) in table.iter_mut().zip(shape) {
                *sample = base * gain;
            }
        }
        params.derived.waveform = Some(waveform);
    }

    fn retune(&self, params: &mut OperatorParams<OscillatorParams>) {
        let octave = self.spec.params[TRANSPOSE].position(params.value(TRANSPOSE));
        let semitones = (params.value(TUNE) - 0.5) * 2.0;
        params.derived.ratio = OCTAVES[octave.min(OCTAVES.len() - 1)] * 2f32.powf(semitones / 12.0);
    }
}

impl Operator for Oscillator {
    type Params = OscillatorParams;
    type Local = OscillatorLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new(
            "oscillator",
            "Wavetable oscillator",
            index,
            sample_rate,
            block_size,
        )
        .param(ParamSpec::stepped("waveform", "Sine, square, saw, smooth saw, triangle, pulse", Waveform::COUNT as u16, 0.0))
        .param(ParamSpec::continuous("duty", "Pulse width", 0.05, 0.95, 0.5))
        .param(ParamSpec::stepped("transpose", "Footage, 32' to 2'", 5, 0.5))
        .param(ParamSpec::continuous("tune", "Fine tune in semitones", -1.0, 1.0, 0.5))
        .param(ParamSpec::continuous("gain", "Output level", 0.0, 1.0, 1.0))
        .input("fm", "Linear frequency modulation", Coupling::Ac)
        .output("out", "Audio output", Coupling::Ac)
        .local::<OscillatorLocal>();

        let shapes = Waveform::iter()
            .map(|waveform| {
                (0..=WAVE_SIZE)
                    .map(|i| waveform.evaluate(TAU * i as f32 / WAVE_SIZE as f32))
                    .collect()
            })
            .collect();
        Self { spec, shapes }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<OscillatorParams>) {
        params.derived.table = vec![0.0; WAVE_SIZE + 1];
        params.derived.ratio = 1.0;
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<OscillatorParams>, index: usize, _value: f32) {
        match index {
            WAVEFORM | DUTY | GAIN => self.render(params),
            TRANSPOSE | TUNE => self.retune(params),
            _ => {}
        }
    }

    fn operate(
        &self,
        voice: &mut Voice,
        params: &OperatorParams<OscillatorParams>,
        local: &mut OscillatorLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let frames = ports.frames();
        let table = &params.derived.table;
        let ratio = params.derived.ratio;
        let (start, end) = voice.step_range();
        let increment = (end - start) / frames as f32;
        let offset = if voice.observed().contains(VoiceFlags::KEY_ON) {
            voice.offset().min(frames)
        } else {
            0
        };

        let (fm, out) = ports.io(IN_FM, OUT);
        out[..offset].fill(0.0);

        let size = WAVE_SIZE as f32;
        let mut phase = local.phase;
        let mut step = start + increment * offset as f32;
        for (sample, modulation) in out[offset..].iter_mut().zip(&fm[offset..]) {
            let index = phase as usize;
            let fraction = phase - index as f32;
            *sample = table[index] + fraction * (table[index + 1] - table[index]);

            phase += step * ratio * (1.0 + modulation);
            if !(0.0..size).contains(&phase) {
                phase = phase.rem_euclid(size);
                // rem_euclid can round up to `size` for tiny negative inputs
                if phase >= size {
                    phase = 0.0;
                }
            }
            step += increment;
        }
        local.phase = phase;
        OperateStatus::Ok
    }
}
