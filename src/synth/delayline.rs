use core::f32::consts::TAU;

// Smaller = slower glide of the base delay (~500 samples time constant)
const SMOOTHING_COEFF: f32 = 0.002;
const MIN_DELAY_SAMPLES: f32 = 1.0;
const INTERPOLATION_MARGIN: usize = 2; // idx and idx + 1, plus one spare

/// Sine sweep driving a delay line's read position.
#[derive(Clone, Debug)]
pub struct SweepLfo {
    phase: f32,
    start_phase: f32,
    increment: f32,
    sample_rate: f32,
}

impl SweepLfo {
    pub fn new(freq_hz: f32, sample_rate: f32, phase: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            phase,
            start_phase: phase,
            increment: freq_hz / sample_rate,
            sample_rate,
        }
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let value = (self.phase * TAU).sin();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value
    }

    pub fn reset(&mut self) {
        self.phase = self.start_phase;
    }

    pub fn set_freq(&mut self, freq_hz: f32) {
        self.increment = freq_hz / self.sample_rate;
    }
}

/// Fractional delay line whose read position sweeps around a smoothed base
/// delay. The buffer is sized once; nothing here allocates after `new`.
#[derive(Clone, Debug)]
pub struct ModulatedDelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    max_delay: f32, // largest readable delay given the interpolation margin
    base_current: f32,
    base_target: f32,
    depth: f32,
    lfo: SweepLfo,
}

impl ModulatedDelayLine {
    pub fn new(
        base_delay_samples: f32,
        max_delay_samples: f32,
        lfo_freq_hz: f32,
        lfo_start_phase: f32,
        depth_samples: f32,
        sample_rate: f32,
    ) -> Self {
        let buffer_len = (max_delay_samples.max(MIN_DELAY_SAMPLES) as usize) + INTERPOLATION_MARGIN;
        let max_delay = (buffer_len - INTERPOLATION_MARGIN) as f32;
        let depth = depth_samples.abs().min(max_delay - MIN_DELAY_SAMPLES);
        let base = base_delay_samples.clamp(MIN_DELAY_SAMPLES, (max_delay - depth).max(MIN_DELAY_SAMPLES));
        Self {
            buffer: vec![0.0; buffer_len],
            write_pos: 0,
            max_delay,
            base_current: base,
            base_target: base,
            depth,
            lfo: SweepLfo::new(lfo_freq_hz, sample_rate, lfo_start_phase),
        }
    }

    /// Clears the buffer and rewinds the sweep without reallocating.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.lfo.reset();
        self.base_current = self.base_target;
    }

    pub fn set_lfo_freq(&mut self, freq_hz: f32) {
        self.lfo.set_freq(freq_hz);
    }

    pub fn set_depth_samples(&mut self, depth_samples: f32) {
        self.depth = depth_samples.abs().min(self.max_delay - MIN_DELAY_SAMPLES);
        self.set_base_delay_samples(self.base_target);
    }

    /// New centre delay; the change is smoothed.
    pub fn set_base_delay_samples(&mut self, delay_samples: f32) {
        let ceiling = (self.max_delay - self.depth).max(MIN_DELAY_SAMPLES);
        self.base_target = delay_samples.clamp(MIN_DELAY_SAMPLES, ceiling);
    }

    pub fn base_delay_samples(&self) -> f32 {
        self.base_current
    }

    /// Processes one sample with the internal sweep.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let sweep = self.lfo.next();
        self.process_modulated(input, sweep)
    }

    /// Processes one sample with an external sweep value in [-1, 1].
    #[inline]
    pub fn process_modulated(&mut self, input: f32, sweep: f32) -> f32 {
        if (self.base_current - self.base_target).abs() > 1e-6 {
            self.base_current += (self.base_target - self.base_current) * SMOOTHING_COEFF;
        } else {
            self.base_current = self.base_target;
        }
        let delay = (self.base_current + sweep * self.depth).clamp(MIN_DELAY_SAMPLES, self.max_delay);

        let len = self.buffer.len();
        let read = (self.write_pos as f32 - delay).rem_euclid(len as f32);
        let index = (read as usize).min(len - 1);
        let fraction = read - index as f32;
        let a = self.buffer[index];
        let b = self.buffer[(index + 1) % len];

        self.buffer[self.write_pos] = input;
        self.write_pos = (self.write_pos + 1) % len;
        a + fraction * (b - a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_shifts_impulse() {
        let mut line = ModulatedDelayLine::new(10.0, 64.0, 0.0, 0.0, 0.0, 48000.0);
        let mut out = Vec::new();
        for i in 0..32 {
            out.push(line.process(if i == 0 { 1.0 } else { 0.0 }));
        }
        let peak = out
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, v)| if v.abs() > best.1 { (i, v.abs()) } else { best });
        assert_eq!(peak.0, 10);
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut line = ModulatedDelayLine::new(10.0, 64.0, 1.0, 0.0, 4.0, 48000.0);
        for _ in 0..100 {
            line.process(1.0);
        }
        let before = line.buffer.as_ptr();
        line.reset();
        assert_eq!(line.buffer.as_ptr(), before);
        assert!(line.buffer.iter().all(|s| *s == 0.0));
    }
}
