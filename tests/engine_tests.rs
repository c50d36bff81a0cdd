use more_asserts::assert_gt;
use opsynth::audio::{spawn, AudioDevice, AudioThread, DeviceError, EngineStatus, NullDevice, StatusCell, StreamFormat};
use opsynth::runtime::Controller;
use opsynth::synth::instruments;
use opsynth::synth::ops::Palette;
use opsynth::synth::{ControlEvent, Engine, EngineEvent, EngineInput, InstrumentId};
use opsynth::{EngineConfig, EngineError, InstrumentConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Open,
    Write(Vec<f32>),
}

/// A device that records what it is asked to do and fails on cue.
struct Scripted {
    log: Arc<Mutex<Vec<Entry>>>,
    format: Option<StreamFormat>,
    writes: usize,
    opens: usize,
    // zero-based index among all write calls that reach the device
    fail_write: Option<usize>,
    max_opens: usize,
    offer_frames: Option<usize>,
    stall: bool,
    stalled: bool,
}

impl Scripted {
    fn new(log: Arc<Mutex<Vec<Entry>>>) -> Self {
        Self {
            log,
            format: None,
            writes: 0,
            opens: 0,
            fail_write: None,
            max_opens: usize::MAX,
            offer_frames: None,
            stall: false,
            stalled: false,
        }
    }
}

impl AudioDevice for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self, format: &StreamFormat) -> Result<StreamFormat, DeviceError> {
        if self.opens >= self.max_opens {
            return Err(DeviceError::Open("gone".into()));
        }
        self.opens += 1;
        self.log.lock().unwrap().push(Entry::Open);
        let offered = StreamFormat {
            frames: self.offer_frames.unwrap_or(format.frames),
            ..*format
        };
        self.format = Some(offered);
        Ok(offered)
    }

    fn read(&mut self, input: &mut [f32]) -> Result<(), DeviceError> {
        self.format.ok_or(DeviceError::NotOpen)?;
        input.fill(0.0);
        Ok(())
    }

    fn write(&mut self, output: &[f32]) -> Result<(), DeviceError> {
        self.format.ok_or(DeviceError::NotOpen)?;
        if self.stall {
            self.stalled = !self.stalled;
            if self.stalled {
                return Err(DeviceError::WouldBlock);
            }
        }
        let index = self.writes;
        self.writes += 1;
        if self.fail_write == Some(index) {
            return Err(DeviceError::Write("unplugged".into()));
        }
        self.log.lock().unwrap().push(Entry::Write(output.to_vec()));
        Ok(())
    }

    fn close(&mut self) {
        self.format = None;
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        preload_blocks: 2,
        instruments: vec![],
        ..Default::default()
    }
}

/// An engine holding one subtractive instrument with a chord queued.
fn playing_engine(config: &EngineConfig) -> Engine {
    let palette = Palette::new(config.sample_rate as f32, config.block_size);
    let (mut engine, inputs, _events) = Engine::with_channels(config);
    let pipeline = instruments::build(&palette, InstrumentId(0), &InstrumentConfig::default()).unwrap();
    engine.handle(EngineInput::Hello(Box::new(pipeline)));
    for key in [60, 64, 67] {
        inputs
            .send(EngineInput::Control(ControlEvent::NoteOn {
                channel: 0,
                key,
                velocity: 100,
                offset: 0,
            }))
            .unwrap();
    }
    engine
}

fn reference_blocks(config: &EngineConfig, count: usize) -> Vec<Vec<f32>> {
    let mut engine = playing_engine(config);
    let samples = config.block_size * 2;
    let input = vec![0.0; samples];
    (0..count)
        .map(|_| {
            let mut output = vec![0.0; samples];
            engine.process(&input, &mut output, 2);
            output
        })
        .collect()
}

fn audio_thread(config: &EngineConfig, device: Scripted) -> AudioThread<Scripted> {
    AudioThread::new(
        playing_engine(config),
        device,
        config,
        StatusCell::default(),
        Arc::new(AtomicBool::new(false)),
    )
}

/// Writes that carry rendered blocks, dropping the silence after each open.
fn rendered(log: &[Entry], preload: usize) -> Vec<Vec<f32>> {
    let mut priming = 0;
    let mut blocks = vec![];
    for entry in log {
        match entry {
            Entry::Open => priming = preload,
            Entry::Write(_) if priming > 0 => priming -= 1,
            Entry::Write(block) => blocks.push(block.clone()),
        }
    }
    blocks
}

#[test]
fn device_failure_loses_and_repeats_nothing() {
    const BLOCKS: usize = 12;
    const FAILED: usize = 5;
    let config = config();
    let log = Arc::new(Mutex::new(vec![]));
    let mut device = Scripted::new(Arc::clone(&log));
    device.fail_write = Some(config.preload_blocks + FAILED);

    let status = StatusCell::default();
    let mut audio = AudioThread::new(
        playing_engine(&config),
        device,
        &config,
        status.clone(),
        Arc::new(AtomicBool::new(false)),
    );
    audio.open().unwrap();
    let mut failures = 0;
    // one extra pass for the step that failed
    for _ in 0..=BLOCKS {
        match audio.step() {
            Ok(()) => {}
            Err(error) => {
                assert_eq!(error, DeviceError::Write("unplugged".into()));
                failures += 1;
                audio.recover(error).unwrap();
            }
        }
    }
    assert_eq!(failures, 1);
    assert_eq!(audio.engine().blocks(), BLOCKS as u64);
    assert_eq!(audio.recoveries(), 1);
    assert_eq!(status.get(), EngineStatus::Running);

    let log = log.lock().unwrap().clone();
    let expected = reference_blocks(&config, BLOCKS);
    assert!(expected.iter().any(|block| block.iter().any(|s| *s != 0.0)));
    assert_eq!(rendered(&log, config.preload_blocks), expected);

    // the failed block is the first thing written after the reopen primes
    let reopen = log.iter().rposition(|e| *e == Entry::Open).unwrap();
    let silence = vec![0.0; config.block_size * 2];
    assert_eq!(log[reopen - 1], Entry::Write(expected[FAILED - 1].clone()));
    assert_eq!(log[reopen + 1], Entry::Write(silence.clone()));
    assert_eq!(log[reopen + 2], Entry::Write(silence));
    assert_eq!(log[reopen + 3], Entry::Write(expected[FAILED].clone()));
}

#[test]
fn failed_reopen_is_fatal() {
    let config = config();
    let log = Arc::new(Mutex::new(vec![]));
    let mut device = Scripted::new(Arc::clone(&log));
    device.fail_write = Some(config.preload_blocks + 3);
    device.max_opens = 1;

    let mut audio = audio_thread(&config, device);
    audio.open().unwrap();
    for _ in 0..3 {
        audio.step().unwrap();
    }
    let error = audio.step().unwrap_err();
    match audio.recover(error) {
        Err(EngineError::DeviceLost(DeviceError::Open(_))) => {}
        other => panic!("expected a lost device, got {other:?}"),
    }
}

#[test]
fn run_reports_fatal_when_the_device_stays_gone() {
    let config = config();
    let mut device = Scripted::new(Arc::new(Mutex::new(vec![])));
    device.fail_write = Some(config.preload_blocks + 1);
    device.max_opens = 1;

    let status = StatusCell::default();
    let mut audio = AudioThread::new(
        playing_engine(&config),
        device,
        &config,
        status.clone(),
        Arc::new(AtomicBool::new(false)),
    );
    audio.open().unwrap();
    assert_eq!(audio.run(), EngineStatus::Fatal);
    assert_eq!(status.get(), EngineStatus::Fatal);
}

#[test]
fn busy_device_is_retried_not_skipped() {
    let config = config();
    let log = Arc::new(Mutex::new(vec![]));
    let mut device = Scripted::new(Arc::clone(&log));
    device.stall = true;

    let mut audio = audio_thread(&config, device);
    audio.open().unwrap();
    for _ in 0..6 {
        audio.step().unwrap();
    }
    let log = log.lock().unwrap().clone();
    assert_eq!(rendered(&log, config.preload_blocks), reference_blocks(&config, 6));
}

#[test]
fn mismatched_device_format_is_refused() {
    let config = config();
    let mut device = Scripted::new(Arc::new(Mutex::new(vec![])));
    device.offer_frames = Some(config.block_size * 2);
    let mut audio = audio_thread(&config, device);
    assert!(matches!(audio.open(), Err(DeviceError::Open(_))));
}

#[test]
fn engine_declines_duplicate_and_excess_instruments() {
    let config = EngineConfig {
        max_instruments: 2,
        ..config()
    };
    let palette = Palette::new(config.sample_rate as f32, config.block_size);
    let build = |id| instruments::build(&palette, InstrumentId(id), &InstrumentConfig::default()).unwrap();
    let (mut engine, _inputs, events) = Engine::with_channels(&config);

    engine.handle(EngineInput::Hello(Box::new(build(0))));
    engine.handle(EngineInput::Hello(Box::new(build(0))));
    engine.handle(EngineInput::Hello(Box::new(build(1))));
    engine.handle(EngineInput::Hello(Box::new(build(2))));
    let answers: Vec<_> = events.try_iter().collect();
    assert!(matches!(answers[0], EngineEvent::Ready(InstrumentId(0))));
    assert!(matches!(&answers[1], EngineEvent::Declined(p) if p.id() == InstrumentId(0)));
    assert!(matches!(answers[2], EngineEvent::Ready(InstrumentId(1))));
    assert!(matches!(&answers[3], EngineEvent::Declined(p) if p.id() == InstrumentId(2)));
    assert_eq!(engine.instruments().count(), 2);

    // a block size the engine does not run is declined as well
    let small = Palette::new(config.sample_rate as f32, config.block_size / 2);
    engine.handle(EngineInput::Exit(InstrumentId(1)));
    let odd = instruments::build(&small, InstrumentId(5), &InstrumentConfig::default()).unwrap();
    engine.handle(EngineInput::Hello(Box::new(odd)));
    let answers: Vec<_> = events.try_iter().collect();
    assert!(matches!(&answers[0], EngineEvent::Retired(p) if p.id() == InstrumentId(1)));
    assert!(matches!(&answers[1], EngineEvent::Declined(p) if p.id() == InstrumentId(5)));

    // exits for unknown ids are ignored
    engine.handle(EngineInput::Exit(InstrumentId(9)));
    assert!(events.try_recv().is_err());
}

#[test]
fn events_wait_for_the_control_thread_instead_of_being_dropped() {
    let config = EngineConfig {
        max_instruments: 1,
        ..config()
    };
    let palette = Palette::new(config.sample_rate as f32, config.block_size);
    let (mut engine, inputs, events) = Engine::with_channels(&config);
    for _ in 0..20 {
        let pipeline = instruments::build(&palette, InstrumentId(0), &InstrumentConfig::default()).unwrap();
        inputs.send(EngineInput::Hello(Box::new(pipeline))).unwrap();
    }

    engine.drain();
    assert_eq!(engine.pending_events(), 6);
    assert_eq!(inputs.len(), 8);

    let mut answers = Vec::new();
    for _ in 0..10 {
        answers.extend(events.try_iter());
        engine.drain();
    }
    answers.extend(events.try_iter());
    assert_eq!(answers.len(), 20);
    assert!(matches!(answers[0], EngineEvent::Ready(InstrumentId(0))));
    assert!(answers[1..].iter().all(|a| matches!(a, EngineEvent::Declined(_))));
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn retired_pipeline_is_parked_when_nobody_listens() {
    let config = config();
    let palette = Palette::new(config.sample_rate as f32, config.block_size);
    let (mut engine, _inputs, events) = Engine::with_channels(&config);
    drop(events);
    let pipeline = instruments::build(&palette, InstrumentId(3), &InstrumentConfig::default()).unwrap();
    engine.handle(EngineInput::Hello(Box::new(pipeline)));
    engine.handle(EngineInput::Exit(InstrumentId(3)));
    assert_eq!(engine.instruments().count(), 0);
    assert_eq!(engine.pending_events(), 2);

    engine.drain();
    assert_eq!(engine.pending_events(), 2);
}

#[test]
fn output_trim_fades_to_silence() {
    let config = config();
    let mut engine = playing_engine(&config);
    let samples = config.block_size * 2;
    let input = vec![0.0; samples];
    let mut output = vec![0.0; samples];
    for _ in 0..4 {
        engine.process(&input, &mut output, 2);
    }
    assert_gt!(output.iter().map(|s| s.abs()).sum::<f32>(), 0.0);

    engine.handle(EngineInput::OutputTrim(0.0));
    engine.process(&input, &mut output, 2);
    engine.process(&input, &mut output, 2);
    assert!(output.iter().all(|s| *s == 0.0));
}

#[test]
fn mono_output_sums_both_sides() {
    let config = config();
    let mut engine = playing_engine(&config);
    let mut reference = playing_engine(&config);
    let frames = config.block_size;
    let mut mono = vec![0.0; frames];
    let mut stereo = vec![0.0; frames * 2];
    for _ in 0..3 {
        engine.process(&[], &mut mono, 1);
        reference.process(&[], &mut stereo, 2);
    }
    for (m, pair) in mono.iter().zip(stereo.chunks(2)) {
        assert_eq!(*m, 0.5 * (pair[0] + pair[1]));
    }
}

#[test]
fn controller_handshake_over_a_running_engine() {
    let config = EngineConfig {
        max_instruments: 2,
        ..config()
    };
    let (engine, inputs, events) = Engine::with_channels(&config);
    let device = NullDevice::new(true);
    let written = device.counter();
    let mut audio = spawn(engine, move || Ok(device), &config).unwrap();
    let mut controller = Controller::new(&config, inputs, events);
    controller.observe(audio.status_cell());

    let first = controller.hello(&InstrumentConfig::default()).unwrap();
    let second = controller
        .hello(&InstrumentConfig {
            channel: 1,
            ..Default::default()
        })
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(controller.instruments(), &[first, second]);
    assert!(matches!(
        controller.hello(&InstrumentConfig::default()),
        Err(EngineError::TooManyInstruments(2))
    ));

    controller
        .send(ControlEvent::NoteOn {
            channel: 0,
            key: 60,
            velocity: 90,
            offset: 0,
        })
        .unwrap();
    controller.exit(first).unwrap();
    assert_eq!(controller.instruments(), &[second]);
    assert!(matches!(
        controller.exit(first),
        Err(EngineError::UnknownInstrument(_))
    ));
    assert_eq!(controller.status(), EngineStatus::Running);

    assert_eq!(audio.stop(), EngineStatus::Stopped);
    assert_eq!(controller.status(), EngineStatus::Stopped);
    assert_gt!(written.load(Ordering::Relaxed), config.preload_blocks as u64);
}

#[test]
fn controller_times_out_and_notices_a_dead_engine() {
    let config = EngineConfig {
        handshake_timeout_ms: 50,
        ..config()
    };
    let (engine, inputs, events) = Engine::with_channels(&config);
    let mut controller = Controller::new(&config, inputs, events);
    // nobody drives the engine, so nothing answers
    assert!(matches!(
        controller.hello(&InstrumentConfig::default()),
        Err(EngineError::Timeout)
    ));
    assert!(controller.instruments().is_empty());

    drop(engine);
    assert!(matches!(
        controller.hello(&InstrumentConfig::default()),
        Err(EngineError::Disconnected)
    ));
}
