use super::{AudioDevice, DeviceError, StreamFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Discards output. When paced it accepts one block per block period, like
/// a sound card would; otherwise it runs as fast as the engine can render.
pub struct NullDevice {
    paced: bool,
    format: Option<StreamFormat>,
    deadline: Option<Instant>,
    written: Arc<AtomicU64>,
}

impl NullDevice {
    pub fn new(paced: bool) -> Self {
        Self {
            paced,
            format: None,
            deadline: None,
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of blocks written, readable from other threads.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.written)
    }
}

impl AudioDevice for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn open(&mut self, format: &StreamFormat) -> Result<StreamFormat, DeviceError> {
        self.format = Some(*format);
        self.deadline = None;
        Ok(*format)
    }

    fn read(&mut self, input: &mut [f32]) -> Result<(), DeviceError> {
        if self.format.is_none() {
            return Err(DeviceError::NotOpen);
        }
        input.fill(0.0);
        Ok(())
    }

    fn write(&mut self, _output: &[f32]) -> Result<(), DeviceError> {
        let format = self.format.ok_or(DeviceError::NotOpen)?;
        if self.paced {
            let now = Instant::now();
            let deadline = self.deadline.unwrap_or(now);
            if now < deadline {
                return Err(DeviceError::WouldBlock);
            }
            let period: Duration = format.block_duration();
            // do not try to catch up after a stall
            let deadline = now
                .checked_sub(period)
                .map_or(deadline, |earliest| deadline.max(earliest));
            self.deadline = Some(deadline + period);
        }
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) {
        self.format = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paced_device_accepts_one_block_per_period() {
        let mut device = NullDevice::new(true);
        device.open(&StreamFormat::stereo(48000, 48000)).unwrap();
        let block = vec![0.0; 96000];
        device.write(&block).unwrap();
        assert!(matches!(device.write(&block), Err(DeviceError::WouldBlock)));
        assert_eq!(device.counter().load(Ordering::Relaxed), 1);
    }

    #[test]
    fn period_longer_than_the_clock_has_run() {
        let mut device = NullDevice::new(true);
        // a block period of many millennia, further back than any Instant
        let format = StreamFormat {
            sample_rate: 1,
            frames: 1 << 40,
            channels: 2,
        };
        device.open(&format).unwrap();
        device.write(&[]).unwrap();
        assert!(matches!(device.write(&[]), Err(DeviceError::WouldBlock)));
    }

    #[test]
    fn unpaced_device_never_blocks() {
        let mut device = NullDevice::new(false);
        assert!(matches!(device.write(&[]), Err(DeviceError::NotOpen)));
        device.open(&StreamFormat::stereo(48000, 64)).unwrap();
        for _ in 0..100 {
            device.write(&[]).unwrap();
        }
        assert_eq!(device.counter().load(Ordering::Relaxed), 100);
    }
}
