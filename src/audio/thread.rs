//! The audio I/O thread: read a block, render it, write it, and reopen the
//! device when it fails.

use super::{AudioDevice, DeviceError, StreamFormat};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::synth::Engine;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineStatus {
    Idle = 0,
    Running = 1,
    Recovering = 2,
    /// The device failed and could not be reopened.
    Fatal = 3,
    Stopped = 4,
}

impl EngineStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Recovering,
            3 => Self::Fatal,
            4 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Engine status shared between the audio thread and its observers.
#[derive(Debug, Clone, Default)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub fn get(&self) -> EngineStatus {
        EngineStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: EngineStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

pub struct AudioThread<D> {
    device: D,
    engine: Engine,
    requested: StreamFormat,
    format: StreamFormat,
    preload: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    // set between rendering a block and the device accepting it
    unwritten: bool,
    status: StatusCell,
    stop: Arc<AtomicBool>,
    recoveries: u32,
}

impl<D: AudioDevice> AudioThread<D> {
    pub fn new(engine: Engine, device: D, config: &EngineConfig, status: StatusCell, stop: Arc<AtomicBool>) -> Self {
        let requested = StreamFormat::stereo(config.sample_rate, engine.frames());
        Self {
            device,
            engine,
            requested,
            format: requested,
            preload: config.preload_blocks,
            input: vec![0.0; requested.samples()],
            output: vec![0.0; requested.samples()],
            unwritten: false,
            status,
            stop,
            recoveries: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    /// Opens the device and primes it with silence.
    pub fn open(&mut self) -> Result<StreamFormat, DeviceError> {
        let format = self.device.open(&self.requested)?;
        if format.sample_rate != self.requested.sample_rate || format.frames != self.requested.frames {
            self.device.close();
            return Err(DeviceError::Open(format!(
                "{} offered {} Hz x {} frames, engine runs {} Hz x {} frames",
                self.device.name(),
                format.sample_rate,
                format.frames,
                self.requested.sample_rate,
                self.requested.frames
            )));
        }
        self.format = format;
        self.input.resize(format.samples(), 0.0);
        self.output.resize(format.samples(), 0.0);

        let silence = vec![0.0; format.samples()];
        for _ in 0..self.preload {
            write_all(&mut self.device, &silence, &self.stop, format.block_duration())?;
        }
        log::info!(
            "{} open: {} Hz, {} frames, {} channels",
            self.device.name(),
            format.sample_rate,
            format.frames,
            format.channels
        );
        Ok(format)
    }

    /// One block: read, render, write. A block that was rendered but not
    /// accepted is written again before anything new is rendered.
    pub fn step(&mut self) -> Result<(), DeviceError> {
        if !self.unwritten {
            match self.device.read(&mut self.input) {
                Ok(()) => {}
                Err(DeviceError::WouldBlock) => self.input.fill(0.0),
                Err(e) => return Err(e),
            }
            self.engine
                .process(&self.input, &mut self.output, self.format.channels);
            self.unwritten = true;
        }
        write_all(&mut self.device, &self.output, &self.stop, self.format.block_duration())?;
        self.unwritten = false;
        Ok(())
    }

    /// Closes and reopens the device after `error`. Any block left unwritten
    /// goes out on the next `step`.
    pub fn recover(&mut self, error: DeviceError) -> Result<(), EngineError> {
        log::warn!("{}: {error}, reopening", self.device.name());
        self.status.set(EngineStatus::Recovering);
        self.device.close();
        match self.open() {
            Ok(_) => {
                self.recoveries += 1;
                self.status.set(EngineStatus::Running);
                Ok(())
            }
            Err(e) => {
                log::error!("{}: reopen failed: {e}", self.device.name());
                self.status.set(EngineStatus::Fatal);
                Err(EngineError::DeviceLost(e))
            }
        }
    }

    /// Runs blocks until stopped or the device is lost. The stop flag is
    /// checked once per block.
    pub fn run(mut self) -> EngineStatus {
        self.status.set(EngineStatus::Running);
        while !self.stop.load(Ordering::Acquire) {
            if let Err(error) = self.step() {
                if self.recover(error).is_err() {
                    self.device.close();
                    return EngineStatus::Fatal;
                }
            }
        }
        self.device.close();
        self.status.set(EngineStatus::Stopped);
        log::info!("audio thread stopped after {} blocks", self.engine.blocks());
        EngineStatus::Stopped
    }
}

fn write_all<D: AudioDevice>(
    device: &mut D,
    block: &[f32],
    stop: &AtomicBool,
    period: Duration,
) -> Result<(), DeviceError> {
    let nap = (period / 4).max(Duration::from_micros(100));
    loop {
        match device.write(block) {
            Err(DeviceError::WouldBlock) => {
                if stop.load(Ordering::Acquire) {
                    return Ok(());
                }
                std::thread::sleep(nap);
            }
            result => return result,
        }
    }
}

/// Owner's end of a running audio thread. Dropping it stops the thread.
pub struct AudioHandle {
    stop: Arc<AtomicBool>,
    status: StatusCell,
    format: StreamFormat,
    thread: Option<JoinHandle<EngineStatus>>,
}

impl AudioHandle {
    pub fn status(&self) -> EngineStatus {
        self.status.get()
    }

    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Stops the thread and waits for it to close the device.
    pub fn stop(&mut self) -> EngineStatus {
        self.stop.store(true, Ordering::Release);
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(status)) => status,
            Some(Err(_)) => EngineStatus::Fatal,
            None => self.status.get(),
        }
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts the audio thread. The device is created and opened on that thread
/// (some hosts tie streams to the thread that built them); this returns once
/// it is open or has failed to open.
pub fn spawn<D, F>(engine: Engine, make_device: F, config: &EngineConfig) -> Result<AudioHandle, EngineError>
where
    D: AudioDevice + 'static,
    F: FnOnce() -> Result<D, DeviceError> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let status = StatusCell::default();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
    let config = config.clone();
    let thread_stop = Arc::clone(&stop);
    let thread_status = status.clone();

    let thread = std::thread::Builder::new()
        .name("opsynth-audio".into())
        .spawn(move || {
            let opened = make_device().and_then(|device| {
                let mut audio = AudioThread::new(engine, device, &config, thread_status, thread_stop);
                audio.open().map(|format| (audio, format))
            });
            match opened {
                Ok((audio, format)) => {
                    let _ = ready_tx.send(Ok(format));
                    audio.run()
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    EngineStatus::Fatal
                }
            }
        })
        .map_err(|e| EngineError::DeviceUnavailable(DeviceError::Open(e.to_string())))?;

    match ready_rx.recv() {
        Ok(Ok(format)) => Ok(AudioHandle {
            stop,
            status,
            format,
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(EngineError::DeviceUnavailable(e))
        }
        Err(_) => {
            let _ = thread.join();
            Err(EngineError::DeviceUnavailable(DeviceError::Open(
                "audio thread exited during startup".into(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_cell_round_trips() {
        let cell = StatusCell::default();
        assert_eq!(cell.get(), EngineStatus::Idle);
        for status in [
            EngineStatus::Running,
            EngineStatus::Recovering,
            EngineStatus::Fatal,
            EngineStatus::Stopped,
        ] {
            cell.set(status);
            assert_eq!(cell.clone().get(), status);
        }
    }
}
