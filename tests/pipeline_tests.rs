use float_cmp::approx_eq;
use more_asserts::{assert_gt, assert_lt};
use opsynth::synth::buffer::{energy, peak, BufId};
use opsynth::synth::flags::VoiceFlags;
use opsynth::synth::instruments::{self, subtractive, InstrumentKind};
use opsynth::synth::ops::envelope::{self, EnvelopeLocal, Stage};
use opsynth::synth::ops::{OperatorKind, Palette};
use opsynth::synth::pipeline::{Algorithm, Block, InstrumentId, OpId, Pipeline, PipelineBuilder};
use opsynth::synth::voice::{Allocation, StealPolicy, Voice};
use opsynth::{EngineError, InstrumentConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strum::IntoEnumIterator;

const SAMPLE_RATE: f32 = 48000.0;
const FRAMES: usize = 256;

fn palette() -> Palette {
    Palette::new(SAMPLE_RATE, FRAMES)
}

fn config(kind: InstrumentKind, voices: usize) -> InstrumentConfig {
    InstrumentConfig {
        kind,
        voices,
        max_voices: voices.max(4),
        detune: 0.0,
        ..Default::default()
    }
}

fn render(pipeline: &mut Pipeline) {
    let silence = vec![0.0; pipeline.frames()];
    pipeline.render(&silence, &silence);
}

#[test]
fn single_voice_note_decays_and_frees_its_voice() {
    let palette = palette();
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Subtractive, 1)).unwrap();
    assert!(matches!(pipeline.note_on(60, 100, 0), Allocation::Fresh(_)));

    let mut loudest: f32 = 0.0;
    for _ in 0..100 {
        render(&mut pipeline);
        loudest = loudest.max(peak(pipeline.left()));
    }
    assert_gt!(loudest, 0.01);
    assert_eq!(pipeline.voices().playing_count(), 1);

    pipeline.note_off(60);
    let mut blocks = 0;
    while pipeline.voices().playing_count() > 0 {
        render(&mut pipeline);
        blocks += 1;
        assert_lt!(blocks, 2000, "voice never finished");
    }
    // let the chorus tail drain
    for _ in 0..40 {
        render(&mut pipeline);
    }
    assert_lt!(energy(pipeline.left()), 1e-8);
    assert_lt!(energy(pipeline.right()), 1e-8);
    assert_eq!(pipeline.voices().free_count(), 1);
}

#[test]
fn distinct_keys_get_distinct_voices_and_state() {
    let palette = palette();
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Subtractive, 4)).unwrap();
    let first = pipeline.note_on(60, 100, 0).voice().unwrap();
    let second = pipeline.note_on(64, 100, 0).voice().unwrap();
    assert_ne!(first, second);

    let env = pipeline.find("amp-env").unwrap();
    let a: &EnvelopeLocal = pipeline.local(first, env).unwrap();
    let b: &EnvelopeLocal = pipeline.local(second, env).unwrap();
    assert!(!std::ptr::eq(a, b));

    for _ in 0..20 {
        render(&mut pipeline);
    }
    pipeline.note_off(60);
    render(&mut pipeline);

    let a: &EnvelopeLocal = pipeline.local(first, env).unwrap();
    let b: &EnvelopeLocal = pipeline.local(second, env).unwrap();
    assert_eq!(a.stage, Stage::Release);
    assert_ne!(b.stage, Stage::Release);
    assert!(!pipeline.voices().voice(second).flags().contains(VoiceFlags::KEY_OFF));
}

#[test]
fn same_key_retriggers_in_place() {
    let palette = palette();
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Organ, 4)).unwrap();
    let Allocation::Fresh(voice) = pipeline.note_on(60, 100, 0) else {
        panic!("expected a fresh voice");
    };
    render(&mut pipeline);
    assert_eq!(pipeline.note_on(60, 90, 0), Allocation::Retrigger(voice));
    assert!(pipeline.voices().voice(voice).flags().contains(VoiceFlags::KEY_REON));
    assert_eq!(pipeline.voices().playing_count(), 1);
}

#[test]
fn full_pool_steals_or_declines() {
    let palette = palette();
    let mut stealing = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Organ, 2)).unwrap();
    let oldest = stealing.note_on(60, 100, 0).voice().unwrap();
    stealing.note_on(62, 100, 0);
    assert_eq!(stealing.note_on(64, 100, 0), Allocation::Stolen(oldest));

    let declining = InstrumentConfig {
        steal: StealPolicy::Decline,
        ..config(InstrumentKind::Organ, 2)
    };
    let mut declining = instruments::build(&palette, InstrumentId(1), &declining).unwrap();
    declining.note_on(60, 100, 0);
    declining.note_on(62, 100, 0);
    assert_eq!(declining.note_on(64, 100, 0), Allocation::Declined);
    assert_eq!(declining.voices().playing_count(), 2);
}

#[test]
fn mono_instrument_plays_legato() {
    let palette = palette();
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Subtractive, 1)).unwrap();
    let Allocation::Fresh(voice) = pipeline.note_on(60, 100, 0) else {
        panic!("expected a fresh voice");
    };
    render(&mut pipeline);
    assert_eq!(pipeline.note_on(67, 100, 0), Allocation::Retrigger(voice));
    assert_eq!(pipeline.voices().voice(voice).key(), 67);
}

#[test]
fn mono_instrument_restarts_after_release_while_tail_rings() {
    let palette = palette();
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Subtractive, 1)).unwrap();
    let filter_env = pipeline.find("filter-env").unwrap();
    let amp_env = pipeline.find("amp-env").unwrap();
    assert!(pipeline.set_param(filter_env, envelope::RELEASE, 0.0));
    assert!(pipeline.set_param(amp_env, envelope::RELEASE, 1.0));

    let Allocation::Fresh(voice) = pipeline.note_on(60, 100, 0) else {
        panic!("expected a fresh voice");
    };
    for _ in 0..40 {
        render(&mut pipeline);
    }
    pipeline.note_off(60);
    for _ in 0..4 {
        render(&mut pipeline);
    }
    let filter: &EnvelopeLocal = pipeline.local(voice, filter_env).unwrap();
    let amp: &EnvelopeLocal = pipeline.local(voice, amp_env).unwrap();
    assert_eq!(filter.stage, Stage::Idle);
    assert_eq!(amp.stage, Stage::Release);
    assert!(pipeline.voices().voice(voice).is_released());

    assert_eq!(pipeline.note_on(64, 100, 0), Allocation::Stolen(voice));
    render(&mut pipeline);
    let amp: &EnvelopeLocal = pipeline.local(voice, amp_env).unwrap();
    assert!(matches!(amp.stage, Stage::Attack | Stage::Decay));
}

#[test]
fn every_instrument_kind_builds_and_sounds() {
    let palette = palette();
    for kind in InstrumentKind::iter() {
        let mut pipeline = instruments::build(&palette, InstrumentId(3), &config(kind, 4)).unwrap();
        assert_eq!(pipeline.kind(), kind);
        pipeline.note_on(57, 110, 0);
        let mut loudest: f32 = 0.0;
        for _ in 0..20 {
            render(&mut pipeline);
            assert!(pipeline.left().iter().chain(pipeline.right()).all(|s| s.is_finite()));
            loudest = loudest.max(peak(pipeline.left()));
        }
        assert_gt!(loudest, 0.001, "{kind:?} stayed silent");
    }
}

#[test]
fn pan_balances_channels() {
    let palette = palette();
    let hard_left = InstrumentConfig {
        pan: 0.0,
        ..config(InstrumentKind::Organ, 4)
    };
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &hard_left).unwrap();
    pipeline.note_on(60, 100, 0);
    for _ in 0..10 {
        render(&mut pipeline);
    }
    assert_gt!(energy(pipeline.left()), 0.0);
    assert_eq!(energy(pipeline.right()), 0.0);
}

#[test]
fn mix_flag_toggles_through_global_controller() {
    let palette = palette();
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Subtractive, 4)).unwrap();
    assert!(pipeline.mix_flags().contains(subtractive::CHORUS));
    pipeline.global_controller(instruments::CONTROLLER_MIX_FLAG, 2, 0.0);
    assert!(!pipeline.mix_flags().contains(subtractive::CHORUS));
    pipeline.global_controller(instruments::CONTROLLER_MIX_FLAG, 1, 1.0);
    assert!(pipeline.mix_flags().contains(subtractive::LFO_FILTER));
}

#[test]
fn reenabled_effect_starts_from_an_empty_delay_line() {
    let palette = palette();
    // (instrument, mix flag bit of its delay-line effect)
    for (kind, bit) in [(InstrumentKind::Subtractive, 2), (InstrumentKind::Organ, 1)] {
        let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(kind, 4)).unwrap();
        pipeline.note_on(60, 120, 0);
        for _ in 0..20 {
            render(&mut pipeline);
        }
        assert_gt!(energy(pipeline.left()), 0.0);

        pipeline.global_controller(instruments::CONTROLLER_MIX_FLAG, bit, 0.0);
        pipeline.note_off(60);
        let mut blocks = 0;
        while pipeline.voices().playing_count() > 0 {
            render(&mut pipeline);
            blocks += 1;
            assert_lt!(blocks, 2000, "{kind:?} voice never finished");
        }
        render(&mut pipeline);
        assert_eq!(energy(pipeline.left()), 0.0, "{kind:?}");

        pipeline.global_controller(instruments::CONTROLLER_MIX_FLAG, bit, 1.0);
        render(&mut pipeline);
        assert_eq!(energy(pipeline.left()), 0.0, "{kind:?} replayed a stale tail");
        assert_eq!(energy(pipeline.right()), 0.0, "{kind:?} replayed a stale tail");
    }
}

#[test]
fn transpose_keeps_the_struck_key() {
    let palette = palette();
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &config(InstrumentKind::Organ, 4)).unwrap();
    pipeline.set_transpose(12);
    let voice = pipeline.note_on(60, 100, 0).voice().unwrap();
    assert_eq!(pipeline.voices().voice(voice).key(), 60);
    pipeline.note_off(60);
    assert!(pipeline.voices().voice(voice).is_released());
}

#[test]
fn configured_transpose_shifts_the_key_table_lookup() {
    let palette = palette();
    let shifted = InstrumentConfig {
        transpose: 12,
        ..config(InstrumentKind::Organ, 4)
    };
    let mut pipeline = instruments::build(&palette, InstrumentId(0), &shifted).unwrap();
    assert_eq!(pipeline.transpose(), 12);
    let voice = pipeline.note_on(57, 100, 0).voice().unwrap();
    render(&mut pipeline);
    let hz = pipeline.voices().voice(voice).hz(SAMPLE_RATE);
    assert!(approx_eq!(f32, hz, pipeline.keys().key(69).hz, epsilon = 0.01));
    assert!(approx_eq!(f32, hz, 440.0, epsilon = 0.01));
}

struct Hooks {
    calls: Arc<[AtomicUsize; 3]>,
    osc: OpId,
    env: OpId,
    out: BufId,
}

impl Algorithm for Hooks {
    fn pre_voice(&mut self, _block: &mut Block<'_>, _shared: &mut Voice) {
        self.calls[0].fetch_add(1, Ordering::Relaxed);
    }

    fn operate(&mut self, block: &mut Block<'_>, voice: &mut Voice) {
        self.calls[1].fetch_add(1, Ordering::Relaxed);
        block.run(self.env, voice);
        block.run(self.osc, voice);
        block.merge(BufId::LEFT, 1.0, self.out, 1.0);
    }

    fn post_voice(&mut self, block: &mut Block<'_>, _shared: &mut Voice) {
        self.calls[2].fetch_add(1, Ordering::Relaxed);
        // device input stays as delivered
        assert!(block.buffer_mut(BufId::INPUT_LEFT).is_none());
        block.fill(BufId::INPUT_LEFT, 1.0);
        block.merge(BufId::INPUT_RIGHT, 0.0, BufId::LEFT, 1.0);
    }
}

fn hooks(palette: &Palette, calls: Arc<[AtomicUsize; 3]>) -> Result<Pipeline, EngineError> {
    let mut p = PipelineBuilder::new(palette, InstrumentId(9), &config(InstrumentKind::Subtractive, 4));
    let out = p.buffer("out");
    let level = p.buffer("level");
    let env = p.operator(OperatorKind::Envelope, "env");
    p.output(env, "out", level)?;
    let osc = p.operator(OperatorKind::Oscillator, "osc");
    p.input(osc, "fm", BufId::SILENCE)?.output(osc, "out", out)?;
    p.finish(Hooks { calls, osc, env, out })
}

#[test]
fn hooks_run_once_per_block_and_once_per_voice() {
    let palette = palette();
    let calls: Arc<[AtomicUsize; 3]> = Arc::new(Default::default());
    let mut pipeline = hooks(&palette, Arc::clone(&calls)).unwrap();
    render(&mut pipeline);
    pipeline.note_on(60, 100, 0);
    pipeline.note_on(67, 100, 0);
    render(&mut pipeline);
    render(&mut pipeline);
    let [pre, operate, post] = &*calls;
    assert_eq!(pre.load(Ordering::Relaxed), 3);
    assert_eq!(operate.load(Ordering::Relaxed), 4);
    assert_eq!(post.load(Ordering::Relaxed), 3);
    assert_gt!(energy(pipeline.left()), 0.0);

    let input = vec![0.25; pipeline.frames()];
    pipeline.render(&input, &input);
    assert!(pipeline.buffer(BufId::INPUT_LEFT).iter().all(|s| *s == 0.25));
    assert!(pipeline.buffer(BufId::INPUT_RIGHT).iter().all(|s| *s == 0.25));
}

#[test]
fn builder_rejects_bad_wiring() {
    let palette = palette();
    let config = config(InstrumentKind::Subtractive, 4);
    let calls: Arc<[AtomicUsize; 3]> = Arc::new(Default::default());

    // unknown port
    let mut p = PipelineBuilder::new(&palette, InstrumentId(0), &config);
    let osc = p.operator(OperatorKind::Oscillator, "osc");
    let buffer = p.buffer("b");
    assert!(matches!(p.output(osc, "left", buffer), Err(EngineError::UnknownPort { .. })));

    // unknown parameter
    assert!(matches!(p.param(osc, "wobble", 0.5), Err(EngineError::UnknownParam { .. })));

    // writing a read-only buffer
    assert!(matches!(
        p.output(osc, "out", BufId::SILENCE),
        Err(EngineError::ReadOnlyBuffer { .. })
    ));
    assert!(matches!(
        p.output(osc, "out", BufId::INPUT_LEFT),
        Err(EngineError::ReadOnlyBuffer { .. })
    ));

    // an unbound input
    let mut p = PipelineBuilder::new(&palette, InstrumentId(0), &config);
    let osc = p.operator(OperatorKind::Oscillator, "osc");
    let out = p.buffer("out");
    p.output(osc, "out", out).unwrap();
    let hooks = Hooks {
        calls: Arc::clone(&calls),
        osc,
        env: osc,
        out,
    };
    assert!(matches!(p.finish(hooks), Err(EngineError::UnroutedPort { .. })));

    // input and output on the same buffer
    let mut p = PipelineBuilder::new(&palette, InstrumentId(0), &config);
    let osc = p.operator(OperatorKind::Oscillator, "osc");
    let out = p.buffer("out");
    p.input(osc, "fm", out).unwrap().output(osc, "out", out).unwrap();
    let hooks = Hooks {
        calls: Arc::clone(&calls),
        osc,
        env: osc,
        out,
    };
    assert!(matches!(p.finish(hooks), Err(EngineError::AliasedBuffer { .. })));

    // two outputs of one operator on the same buffer
    let mut p = PipelineBuilder::new(&palette, InstrumentId(0), &config);
    let chorus = p.effect(OperatorKind::Chorus, "chorus");
    let wet = p.buffer("wet");
    p.input(chorus, "left", BufId::LEFT)
        .unwrap()
        .input(chorus, "right", BufId::RIGHT)
        .unwrap()
        .output(chorus, "left", wet)
        .unwrap()
        .output(chorus, "right", wet)
        .unwrap();
    let hooks = Hooks {
        calls,
        osc: chorus,
        env: chorus,
        out: wet,
    };
    assert!(matches!(p.finish(hooks), Err(EngineError::AliasedBuffer { .. })));
}
