use super::{AudioDevice, DeviceError, StreamFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Interleaved samples waiting for the host callback.
#[derive(Clone)]
struct SampleQueue(Arc<ArrayQueue<f32>>);

impl SampleQueue {
    fn new(capacity: usize) -> Self {
        Self(Arc::new(ArrayQueue::new(capacity.max(1))))
    }

    fn room(&self) -> usize {
        self.0.capacity() - self.0.len()
    }
}

/// Output through the platform's default audio host. The host pulls samples
/// from a queue on its own thread; `write` refills it a block at a time.
pub struct CpalDevice {
    wanted: Option<String>,
    name: String,
    // queue depth in blocks
    depth: usize,
    stream: Option<Stream>,
    queue: SampleQueue,
    failed: Arc<AtomicBool>,
}

impl CpalDevice {
    /// `wanted` is a case-insensitive substring of the device name; the host
    /// default is used when it is `None`.
    pub fn new(wanted: Option<String>, depth: usize) -> Self {
        Self {
            wanted,
            name: "cpal".into(),
            depth: depth.max(2),
            stream: None,
            queue: SampleQueue::new(1),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Names of the host's output devices.
    pub fn list() -> Vec<String> {
        let host = cpal::default_host();
        match host.output_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                log::warn!("could not list output devices: {e}");
                Vec::new()
            }
        }
    }

    fn select(&self, host: &cpal::Host) -> Result<cpal::Device, DeviceError> {
        let Some(wanted) = &self.wanted else {
            return host
                .default_output_device()
                .ok_or_else(|| DeviceError::Open("no output device available".into()));
        };
        let wanted = wanted.to_lowercase();
        let devices = host
            .output_devices()
            .map_err(|e| DeviceError::Open(e.to_string()))?;
        for device in devices {
            let name = device.name().unwrap_or_default();
            if name.to_lowercase().contains(&wanted) {
                return Ok(device);
            }
        }
        Err(DeviceError::Open(format!("no output device matching {wanted:?}")))
    }

    fn channels_for(device: &cpal::Device, sample_rate: u32) -> Result<u16, DeviceError> {
        let configs = device
            .supported_output_configs()
            .map_err(|e| DeviceError::Open(e.to_string()))?;
        let rate = SampleRate(sample_rate);
        configs
            .filter(|c| c.sample_format() == SampleFormat::F32)
            .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
            .map(|c| c.channels())
            .min_by_key(|channels| channels.abs_diff(2))
            .ok_or_else(|| DeviceError::Open(format!("no f32 output at {sample_rate} Hz")))
    }
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, format: &StreamFormat) -> Result<StreamFormat, DeviceError> {
        self.close();
        let host = cpal::default_host();
        let device = self.select(&host)?;
        self.name = device.name().unwrap_or_else(|_| "cpal".into());
        let channels = Self::channels_for(&device, format.sample_rate)?;
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Fixed(format.frames as u32),
        };
        let negotiated = StreamFormat {
            channels: channels as usize,
            ..*format
        };

        let queue = SampleQueue::new(negotiated.samples() * self.depth);
        let failed = Arc::new(AtomicBool::new(false));
        let callback_queue = queue.clone();
        let error_flag = Arc::clone(&failed);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = callback_queue.0.pop().unwrap_or(0.0);
                    }
                },
                move |err| {
                    log::error!("stream error: {err}");
                    error_flag.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| DeviceError::Open(e.to_string()))?;
        stream.play().map_err(|e| DeviceError::Open(e.to_string()))?;

        self.stream = Some(stream);
        self.queue = queue;
        self.failed = failed;
        Ok(negotiated)
    }

    fn read(&mut self, input: &mut [f32]) -> Result<(), DeviceError> {
        if self.stream.is_none() {
            return Err(DeviceError::NotOpen);
        }
        input.fill(0.0);
        Ok(())
    }

    fn write(&mut self, output: &[f32]) -> Result<(), DeviceError> {
        if self.stream.is_none() {
            return Err(DeviceError::NotOpen);
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(DeviceError::Write(format!("{} reported a stream error", self.name)));
        }
        if self.queue.room() < output.len() {
            return Err(DeviceError::WouldBlock);
        }
        for sample in output {
            // room was checked and only this thread pushes
            let _ = self.queue.0.push(*sample);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("pause on close: {e}");
            }
        }
        while self.queue.0.pop().is_some() {}
    }
}
