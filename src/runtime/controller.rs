use crate::audio::{EngineStatus, StatusCell};
use crate::config::{EngineConfig, InstrumentConfig, MAX_INSTRUMENTS};
use crate::error::EngineError;
use crate::synth::dispatch::ControlEvent;
use crate::synth::engine::{EngineEvent, EngineInput};
use crate::synth::instruments;
use crate::synth::ops::Palette;
use crate::synth::pipeline::InstrumentId;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::time::{Duration, Instant};

/// The control thread's handle on a running engine. Instruments are built
/// and dropped here; the audio thread only ever moves them in and out of its
/// block loop.
pub struct Controller {
    palette: Palette,
    max_instruments: usize,
    timeout: Duration,
    inputs: Sender<EngineInput>,
    events: Receiver<EngineEvent>,
    status: StatusCell,
    live: Vec<InstrumentId>,
    next_id: u16,
}

impl Controller {
    pub fn new(config: &EngineConfig, inputs: Sender<EngineInput>, events: Receiver<EngineEvent>) -> Self {
        Self {
            palette: Palette::new(config.sample_rate as f32, config.block_size),
            max_instruments: config.max_instruments.min(MAX_INSTRUMENTS),
            timeout: Duration::from_millis(config.handshake_timeout_ms),
            inputs,
            events,
            status: StatusCell::default(),
            live: Vec::with_capacity(config.max_instruments),
            next_id: 0,
        }
    }

    /// Follows the status of the audio thread driving the engine.
    pub fn observe(&mut self, status: StatusCell) {
        self.status = status;
    }

    pub fn status(&self) -> EngineStatus {
        self.status.get()
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Instruments currently in the engine, oldest first.
    pub fn instruments(&self) -> &[InstrumentId] {
        &self.live
    }

    /// A sender for front ends that feed the engine directly.
    pub fn sender(&self) -> Sender<EngineInput> {
        self.inputs.clone()
    }

    /// Builds an instrument and waits for the engine to take it.
    pub fn hello(&mut self, config: &InstrumentConfig) -> Result<InstrumentId, EngineError> {
        if self.live.len() >= self.max_instruments {
            return Err(EngineError::TooManyInstruments(self.max_instruments));
        }
        let id = self.allocate_id();
        let pipeline = instruments::build(&self.palette, id, config)?;
        self.push(EngineInput::Hello(Box::new(pipeline)))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match self.next_event(deadline)? {
                EngineEvent::Ready(ready) if ready == id => {
                    self.live.push(id);
                    log::info!("instrument {id} ready");
                    return Ok(id);
                }
                EngineEvent::Declined(pipeline) if pipeline.id() == id => {
                    log::warn!("engine declined instrument {id}");
                    return Err(EngineError::TooManyInstruments(self.max_instruments));
                }
                other => self.stray(other),
            }
        }
    }

    /// Takes an instrument out of the engine and drops it here.
    pub fn exit(&mut self, id: InstrumentId) -> Result<(), EngineError> {
        if !self.live.contains(&id) {
            return Err(EngineError::UnknownInstrument(id.0));
        }
        self.push(EngineInput::Exit(id))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match self.next_event(deadline)? {
                EngineEvent::Retired(pipeline) if pipeline.id() == id => {
                    self.live.retain(|live| *live != id);
                    drop(pipeline);
                    log::info!("instrument {id} retired");
                    return Ok(());
                }
                other => self.stray(other),
            }
        }
    }

    pub fn send(&self, event: ControlEvent) -> Result<(), EngineError> {
        self.push(EngineInput::Control(event))
    }

    pub fn set_input_trim(&self, trim: f32) -> Result<(), EngineError> {
        self.push(EngineInput::InputTrim(trim))
    }

    pub fn set_output_trim(&self, trim: f32) -> Result<(), EngineError> {
        self.push(EngineInput::OutputTrim(trim))
    }

    fn push(&self, input: EngineInput) -> Result<(), EngineError> {
        match self.inputs.send_timeout(input, self.timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(EngineError::Timeout),
            Err(SendTimeoutError::Disconnected(_)) => Err(EngineError::Disconnected),
        }
    }

    fn next_event(&self, deadline: Instant) -> Result<EngineEvent, EngineError> {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.events.recv_timeout(wait) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Disconnected),
        }
    }

    // Answers to earlier handshakes that timed out.
    fn stray(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Ready(id) => {
                log::warn!("late ready from instrument {id}");
                if !self.live.contains(&id) {
                    self.live.push(id);
                }
            }
            EngineEvent::Declined(pipeline) => log::debug!("late decline of instrument {}", pipeline.id()),
            EngineEvent::Retired(pipeline) => {
                let id = pipeline.id();
                self.live.retain(|live| *live != id);
                log::debug!("late retirement of instrument {id}");
            }
        }
    }

    fn allocate_id(&mut self) -> InstrumentId {
        loop {
            let id = InstrumentId(self.next_id);
            self.next_id = (self.next_id + 1) % MAX_INSTRUMENTS as u16;
            if !self.live.contains(&id) {
                return id;
            }
        }
    }
}
