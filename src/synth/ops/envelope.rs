use crate::synth::flags::VoiceFlags;
use crate::synth::operator::{
    Coupling, OperateStatus, Operator, OperatorParams, OperatorSpec, ParamSpec, Ports,
};
use crate::synth::tables::{curves, exp_scale};
use crate::synth::voice::Voice;

pub const ATTACK: usize = 0;
pub const DECAY: usize = 1;
pub const SUSTAIN: usize = 2;
pub const RELEASE: usize = 3;
pub const GAIN: usize = 4;
pub const TOUCH: usize = 5;
pub const TERMINATES: usize = 6;

pub const OUT: usize = 0;

/// Level at which a decaying segment counts as finished (-80 dB).
pub const FLOOR: f32 = 1.0e-4;

const MIN_TIME: f32 = 0.001;
const MAX_TIME: f32 = 10.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeParams {
    pub attack_step: f32,
    pub decay_coeff: f32,
    pub sustain: f32,
    pub release_coeff: f32,
    pub gain: f32,
    pub touch: f32,
    pub terminates: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeLocal {
    pub stage: Stage,
    pub level: f32,
}

/// ADSR driven entirely by voice flags. Linear attack, exponential decay and
/// release. A terminating envelope marks its voice done when the release
/// completes; several may be layered and each consumes the flags it reacts to.
pub struct Envelope {
    spec: OperatorSpec,
    sample_rate: f32,
}

impl Envelope {
    fn samples(&self, value: f32) -> f32 {
        (exp_scale(value, MIN_TIME, MAX_TIME) * self.sample_rate).max(1.0)
    }

    /// Per-sample multiplier that decays to [FLOOR] in the given time.
    fn coefficient(&self, value: f32) -> f32 {
        (FLOOR.ln() / self.samples(value)).exp()
    }
}

impl Operator for Envelope {
    type Params = EnvelopeParams;
    type Local = EnvelopeLocal;

    fn init(index: usize, sample_rate: f32, block_size: usize) -> Self {
        let spec = OperatorSpec::new("envelope", "ADSR envelope", index, sample_rate, block_size)
            .param(ParamSpec::continuous("attack", "Attack time", MIN_TIME, MAX_TIME, 0.1))
            .param(ParamSpec::continuous("decay", "Decay time", MIN_TIME, MAX_TIME, 0.4))
            .param(ParamSpec::continuous("sustain", "Sustain level", 0.0, 1.0, 0.7))
            .param(ParamSpec::continuous("release", "Release time", MIN_TIME, MAX_TIME, 0.35))
            .param(ParamSpec::continuous("gain", "Output level", 0.0, 1.0, 1.0))
            .param(ParamSpec::continuous("touch", "Velocity sensitivity", 0.0, 1.0, 0.5))
            .param(ParamSpec::toggle("terminates", "Release end finishes the voice", true))
            .output("out", "Envelope level", Coupling::Dc)
            .local::<EnvelopeLocal>();
        Self { spec, sample_rate }
    }

    fn spec(&self) -> &OperatorSpec {
        &self.spec
    }

    fn reset(&self, params: &mut OperatorParams<EnvelopeParams>) {
        params.derived = EnvelopeParams::default();
        self.apply_defaults(params);
    }

    fn param(&self, params: &mut OperatorParams<EnvelopeParams>, index: usize, value: f32) {
        let derived = &mut params.derived;
        match index {
            ATTACK => derived.attack_step = self.samples(value).recip(),
            DECAY => derived.decay_coeff = self.coefficient(value),
            SUSTAIN => derived.sustain = value,
            RELEASE => derived.release_coeff = self.coefficient(value),
            GAIN => derived.gain = curves().gain(value),
            TOUCH => derived.touch = value,
            TERMINATES => derived.terminates = value > 0.5,
            _ => {}
        }
    }

    fn operate(
        &self,
        voice: &mut Voice,
        params: &OperatorParams<EnvelopeParams>,
        local: &mut EnvelopeLocal,
        ports: &mut Ports<'_>,
    ) -> OperateStatus {
        let p = &params.derived;
        let observed = voice.observed();
        let mut offset = 0;

        if observed.intersects(VoiceFlags::TRIGGER) {
            voice.consume(VoiceFlags::TRIGGER);
            local.stage = Stage::Attack;
            offset = voice.offset();
        }
        let mut released = false;
        if observed.contains(VoiceFlags::KEY_OFF) && !matches!(local.stage, Stage::Release | Stage::Idle) {
            voice.raise(VoiceFlags::KEY_OFFING);
            local.stage = Stage::Release;
        } else if observed.contains(VoiceFlags::KEY_OFF) && local.stage == Stage::Idle {
            released = true;
        }

        let scale = p.gain * (1.0 - p.touch + p.touch * voice.velocity());
        let out = ports.output(OUT);
        let offset = offset.min(out.len());
        let pending = local.level * scale;
        out[..offset].fill(pending);

        let mut level = local.level;
        let mut stage = local.stage;
        for sample in out[offset..].iter_mut() {
            match stage {
                Stage::Idle => level = 0.0,
                Stage::Attack => {
                    level += p.attack_step;
                    if level >= 1.0 {
                        level = 1.0;
                        stage = Stage::Decay;
                    }
                }
                Stage::Decay => {
                    level = p.sustain + (level - p.sustain) * p.decay_coeff;
                    if (level - p.sustain).abs() < FLOOR {
                        level = p.sustain;
                        stage = Stage::Sustain;
                    }
                }
                Stage::Sustain => level = p.sustain,
                Stage::Release => {
                    level *= p.release_coeff;
                    if level < FLOOR {
                        level = 0.0;
                        stage = Stage::Idle;
                        released = true;
                    }
                }
            }
            *sample = level * scale;
        }
        local.level = level;
        local.stage = stage;

        if released {
            voice.consume(VoiceFlags::KEY_OFF | VoiceFlags::KEY_OFFING);
            if p.terminates {
                voice.raise(VoiceFlags::KEY_DONE);
            }
            return OperateStatus::Done;
        }
        if stage == Stage::Idle {
            OperateStatus::Done
        } else {
            OperateStatus::Ok
        }
    }
}
