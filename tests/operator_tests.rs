use float_cmp::approx_eq;
use more_asserts::{assert_gt, assert_le, assert_lt};
use opsynth::synth::flags::VoiceFlags;
use opsynth::synth::operator::{DynOperator, LocalBlock, OperateStatus, ParamBlock, Ports};
use opsynth::synth::ops::{OperatorKind, Palette};
use opsynth::synth::voice::{Strike, Voice};
use strum::IntoEnumIterator;

const SAMPLE_RATE: f32 = 48000.0;
const FRAMES: usize = 128;

struct Rig {
    operator: std::sync::Arc<dyn DynOperator>,
    params: ParamBlock,
    local: LocalBlock,
    voice: Voice,
}

impl Rig {
    fn new(palette: &Palette, kind: OperatorKind, key: u8) -> Self {
        let operator = palette.get(kind);
        let params = operator.create_params();
        let local = operator.create_local();
        let mut voice = Voice::new(0);
        let step = opsynth::synth::tables::KeyTable::new(SAMPLE_RATE, &Default::default())
            .key(key)
            .step;
        voice.strike(Strike::new(key, 0.8, step));
        Self {
            operator,
            params,
            local,
            voice,
        }
    }

    fn set(&mut self, name: &str, value: f32) {
        let index = self.operator.spec().param_index(name).unwrap();
        self.operator.set_param(&mut self.params, index, value);
    }

    /// Runs one block and returns the first output.
    fn block(&mut self, inputs: &[&[f32]], frames: usize) -> (Vec<f32>, OperateStatus) {
        let outputs = self.operator.spec().outputs().count().max(1);
        let mut buffers = vec![vec![0.0; frames]; outputs];
        self.voice.begin_block(frames, 1.0, 0.0);
        let status = {
            let mut ports = Ports::from_buffers(inputs, &mut buffers, frames);
            self.operator
                .operate(&mut self.voice, &self.params, &mut self.local, &mut ports)
        };
        self.voice.end_block();
        (buffers.swap_remove(0), status)
    }
}

fn signal(frames: usize) -> Vec<f32> {
    (0..frames).map(|i| ((i * 7919) % 97) as f32 / 48.5 - 1.0).collect()
}

/// One long block and two half blocks must produce the same samples.
fn assert_continuous(kind: OperatorKind, inputs: &[f32]) {
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    let mut whole = Rig::new(&palette, kind, 60);
    let mut split = Rig::new(&palette, kind, 60);

    let (expected, _) = whole.block(&[inputs], FRAMES);
    let half = FRAMES / 2;
    let (mut actual, _) = split.block(&[&inputs[..half]], half);
    let (second, _) = split.block(&[&inputs[half..]], half);
    actual.extend(second);

    for (i, (a, e)) in actual.iter().zip(&expected).enumerate() {
        assert!(approx_eq!(f32, *a, *e, epsilon = 1e-4), "{kind:?} sample {i}: {a} != {e}");
    }
}

#[test]
fn oscillator_phase_carries_across_blocks() {
    assert_continuous(OperatorKind::Oscillator, &vec![0.0; FRAMES]);
}

#[test]
fn envelope_level_carries_across_blocks() {
    assert_continuous(OperatorKind::Envelope, &vec![0.0; FRAMES]);
}

#[test]
fn filter_history_carries_across_blocks() {
    assert_continuous(OperatorKind::Filter, &signal(FRAMES));
}

#[test]
fn envelopes_terminate_after_release() {
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    for (attack, decay, sustain, release) in [
        (0.0, 0.0, 0.0, 0.0),
        (0.1, 0.4, 0.7, 0.35),
        (0.5, 0.2, 1.0, 0.3),
        (0.0, 1.0, 0.5, 0.45),
    ] {
        let mut rig = Rig::new(&palette, OperatorKind::Envelope, 60);
        rig.set("attack", attack);
        rig.set("decay", decay);
        rig.set("sustain", sustain);
        rig.set("release", release);

        let (first, _) = rig.block(&[], FRAMES);
        assert!(!rig.voice.flags().intersects(VoiceFlags::TRIGGER));
        assert!(first.iter().all(|s| s.is_finite()));
        for _ in 0..20 {
            rig.block(&[], FRAMES);
        }
        rig.voice.release();

        let mut blocks = 0;
        while !rig.voice.is_done() {
            let (out, _) = rig.block(&[], FRAMES);
            assert!(out.iter().all(|s| s.is_finite()));
            blocks += 1;
            assert_lt!(blocks, 20_000, "release never finished for {release}");
        }
        let (out, status) = rig.block(&[], FRAMES);
        assert_eq!(status, OperateStatus::Done);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(!rig.voice.flags().contains(VoiceFlags::KEY_OFF));
    }
}

#[test]
fn non_terminating_envelope_leaves_voice_alone() {
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    let mut rig = Rig::new(&palette, OperatorKind::Envelope, 60);
    rig.set("terminates", 0.0);
    rig.set("release", 0.0);
    rig.block(&[], FRAMES);
    rig.voice.release();
    for _ in 0..50 {
        rig.block(&[], FRAMES);
    }
    assert!(!rig.voice.is_done());
}

#[test]
fn first_envelope_consumes_trigger_but_block_snapshot_keeps_it() {
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    let mut rig = Rig::new(&palette, OperatorKind::Envelope, 60);
    let second = palette.get(OperatorKind::Envelope);
    let params = second.create_params();
    let mut local = second.create_local();

    rig.voice.begin_block(FRAMES, 1.0, 0.0);
    let mut first_out = vec![vec![0.0; FRAMES]];
    let mut second_out = vec![vec![0.0; FRAMES]];
    {
        let mut ports = Ports::from_buffers(&[], &mut first_out, FRAMES);
        rig.operator
            .operate(&mut rig.voice, &rig.params, &mut rig.local, &mut ports);
    }
    assert!(!rig.voice.flags().contains(VoiceFlags::KEY_ON));
    assert!(rig.voice.observed().contains(VoiceFlags::KEY_ON));
    {
        let mut ports = Ports::from_buffers(&[], &mut second_out, FRAMES);
        second.operate(&mut rig.voice, &params, &mut local, &mut ports);
    }
    // both envelopes started their attack on the same block
    assert_gt!(first_out[0][FRAMES - 1], 0.0);
    assert_gt!(second_out[0][FRAMES - 1], 0.0);
}

#[test]
fn layered_envelopes_keep_the_voice_released_until_the_longest_finishes() {
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    let mut rig = Rig::new(&palette, OperatorKind::Envelope, 60);
    rig.set("release", 0.6);
    let short = palette.get(OperatorKind::Envelope);
    let mut short_params = short.create_params();
    let index = short.spec().param_index("release").unwrap();
    short.set_param(&mut short_params, index, 0.0);
    let index = short.spec().param_index("terminates").unwrap();
    short.set_param(&mut short_params, index, 0.0);
    let mut short_local = short.create_local();

    let mut run = |rig: &mut Rig| {
        rig.voice.begin_block(FRAMES, 1.0, 0.0);
        let mut out = vec![vec![0.0; FRAMES]];
        let short_status = {
            let mut ports = Ports::from_buffers(&[], &mut out, FRAMES);
            short.operate(&mut rig.voice, &short_params, &mut short_local, &mut ports)
        };
        let long_status = {
            let mut ports = Ports::from_buffers(&[], &mut out, FRAMES);
            rig.operator
                .operate(&mut rig.voice, &rig.params, &mut rig.local, &mut ports)
        };
        rig.voice.end_block();
        (short_status, long_status)
    };

    for _ in 0..20 {
        run(&mut rig);
    }
    rig.voice.release();
    let mut statuses = (OperateStatus::Ok, OperateStatus::Ok);
    for _ in 0..4 {
        statuses = run(&mut rig);
    }
    assert_eq!(statuses, (OperateStatus::Done, OperateStatus::Ok));
    assert!(!rig.voice.flags().contains(VoiceFlags::KEY_OFF));
    assert!(rig.voice.is_released());
    assert!(!rig.voice.is_done());

    let mut blocks = 0;
    while !rig.voice.is_done() {
        run(&mut rig);
        blocks += 1;
        assert_lt!(blocks, 20_000, "long release never finished");
    }
    assert!(rig.voice.is_released());
}

#[test]
fn reset_twice_equals_reset_once() {
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    for kind in OperatorKind::iter() {
        let operator = palette.get(kind);
        let count = operator.spec().params.len();
        let mut once = operator.create_params();
        let mut twice = operator.create_params();
        for index in 0..count {
            operator.set_param(&mut once, index, 0.9);
            operator.set_param(&mut twice, index, 0.1);
        }
        operator.reset_params(&mut once);
        operator.reset_params(&mut twice);
        operator.reset_params(&mut twice);
        for index in 0..count {
            assert_eq!(
                operator.param_value(&once, index),
                operator.param_value(&twice, index),
                "{kind:?} param {index}"
            );
            assert_eq!(
                operator.param_value(&once, index),
                Some(operator.spec().params[index].default),
                "{kind:?} param {index}"
            );
        }
    }
}

#[test]
fn params_are_history_independent() {
    // the same final values through different histories render the same block
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    for kind in [OperatorKind::Oscillator, OperatorKind::Filter, OperatorKind::PhaseMod] {
        let mut direct = Rig::new(&palette, kind, 57);
        let mut wandering = Rig::new(&palette, kind, 57);
        let count = direct.operator.spec().params.len();
        for index in 0..count {
            for value in [1.0, 0.0, 0.33] {
                wandering.operator.set_param(&mut wandering.params, index, value);
            }
        }
        for index in (0..count).rev() {
            wandering.operator.set_param(&mut wandering.params, index, 0.6);
        }
        for index in 0..count {
            direct.operator.set_param(&mut direct.params, index, 0.6);
        }
        let input = signal(FRAMES);
        let (a, _) = direct.block(&[&input], FRAMES);
        let (b, _) = wandering.block(&[&input], FRAMES);
        assert_eq!(a, b, "{kind:?}");
    }
}

#[test]
fn params_are_clamped_to_unit_range() {
    let palette = Palette::new(SAMPLE_RATE, FRAMES);
    let operator = palette.get(OperatorKind::Amplifier);
    let mut params = operator.create_params();
    operator.set_param(&mut params, 0, 7.0);
    assert_eq!(operator.param_value(&params, 0), Some(1.0));
    operator.set_param(&mut params, 0, -3.0);
    assert_eq!(operator.param_value(&params, 0), Some(0.0));
    // unknown indices are ignored
    operator.set_param(&mut params, 40, 0.5);
    assert_eq!(operator.param_value(&params, 40), None);
}

#[test]
fn oscillator_runs_at_key_frequency() {
    let palette = Palette::new(SAMPLE_RATE, 4096);
    let mut rig = Rig::new(&palette, OperatorKind::Oscillator, 69);
    let silence = vec![0.0; 4800];
    let (out, _) = rig.block(&[&silence], 4800);
    // 440 Hz over 0.1 s: 44 rising zero crossings, give or take one
    let crossings = out.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
    assert_le!(crossings.abs_diff(44), 1);
}

#[test]
fn pulse_width_follows_duty() {
    let palette = Palette::new(SAMPLE_RATE, 4096);
    for (duty, expected) in [(0.0, 0.05), (0.5, 0.5), (1.0, 0.95)] {
        let mut rig = Rig::new(&palette, OperatorKind::Oscillator, 69);
        rig.set("waveform", 1.0);
        rig.set("duty", duty);
        let silence = vec![0.0; 4800];
        let (out, _) = rig.block(&[&silence], 4800);
        let high = out.iter().filter(|s| **s > 0.0).count() as f32 / out.len() as f32;
        assert!(approx_eq!(f32, high, expected, epsilon = 0.02), "duty {duty}: {high}");
        let mean = out.iter().sum::<f32>() / out.len() as f32;
        assert_lt!(mean.abs(), 0.05);
    }
}
