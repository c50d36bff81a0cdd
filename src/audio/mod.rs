//! Audio devices and the thread that drives the engine through them.

#[cfg(feature = "native")]
mod cpal_backend;
mod null;
mod thread;

#[cfg(feature = "native")]
pub use self::cpal_backend::CpalDevice;
pub use self::null::NullDevice;
pub use self::thread::{spawn, AudioHandle, AudioThread, EngineStatus, StatusCell};

use thiserror::Error;

/// Block format negotiated with a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    /// Frames per block.
    pub frames: usize,
    pub channels: usize,
}

impl StreamFormat {
    pub fn stereo(sample_rate: u32, frames: usize) -> Self {
        Self {
            sample_rate,
            frames,
            channels: 2,
        }
    }

    /// Interleaved samples in one block.
    pub fn samples(&self) -> usize {
        self.frames * self.channels
    }

    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frames as f64 / self.sample_rate.max(1) as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Not a failure: the device cannot take another block yet.
    #[error("device would block")]
    WouldBlock,
    #[error("device is not open")]
    NotOpen,
    #[error("could not open device: {0}")]
    Open(String),
    #[error("device read failed: {0}")]
    Read(String),
    #[error("device write failed: {0}")]
    Write(String),
}

/// A blocking, block-at-a-time audio endpoint. Buffers are interleaved in
/// the format returned by `open`.
pub trait AudioDevice {
    fn name(&self) -> &str;

    /// Opens (or reopens) the device. The returned format may differ from
    /// the requested one in channel count only.
    fn open(&mut self, format: &StreamFormat) -> Result<StreamFormat, DeviceError>;

    /// Fills one block of input. Devices without capture deliver silence.
    fn read(&mut self, input: &mut [f32]) -> Result<(), DeviceError>;

    fn write(&mut self, output: &[f32]) -> Result<(), DeviceError>;

    fn close(&mut self);
}

impl<D: AudioDevice + ?Sized> AudioDevice for Box<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self, format: &StreamFormat) -> Result<StreamFormat, DeviceError> {
        (**self).open(format)
    }

    fn read(&mut self, input: &mut [f32]) -> Result<(), DeviceError> {
        (**self).read(input)
    }

    fn write(&mut self, output: &[f32]) -> Result<(), DeviceError> {
        (**self).write(output)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
