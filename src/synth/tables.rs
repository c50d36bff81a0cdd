//! Key frequency and response curve tables.
//!
//! Everything here is computed outside the audio path. [KeyTable] belongs to
//! an instrument and is rebuilt in place when the tuning changes; [Curves] is
//! process-wide and immutable once built.

use super::prelude::OnceLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

pub const KEY_COUNT: usize = 128;
/// Length of one wavetable cycle. Oscillator steps are expressed in table
/// samples per output sample.
pub const WAVE_SIZE: usize = 1024;
pub const REFERENCE_KEY: u8 = 69;
pub const REFERENCE_HZ: f32 = 440.0;
/// Ratio between adjacent keys in twelve-tone equal temperament.
pub const EQUAL_SEMITONE: f32 = 1.059_463_1;

const CURVE_SIZE: usize = 1024;
const GAIN_RANGE_DB: f32 = 60.0;

/// Precomputed pitch data for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeyFreq {
    pub hz: f32,
    /// Wavetable samples to advance per output sample.
    pub step: f32,
    /// Cycles per output sample.
    pub rate: f32,
}

/// Tuning applied when a [KeyTable] is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Tuning {
    /// Global ratio applied to every key, 1.0 for A=440.
    pub tune: f32,
    /// Ratio between adjacent keys.
    pub semitone: f32,
    /// Microtonal overrides: key number to frequency in Hz before `tune`.
    pub overrides: BTreeMap<u8, f32>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            tune: 1.0,
            semitone: EQUAL_SEMITONE,
            overrides: BTreeMap::new(),
        }
    }
}

impl Tuning {
    /// Base frequency for `key` ignoring the `tune` ratio.
    pub fn base_hz(&self, key: u8) -> f32 {
        match self.overrides.get(&key) {
            Some(hz) => *hz,
            None => REFERENCE_HZ * self.semitone.powi(key as i32 - REFERENCE_KEY as i32),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyTable {
    sample_rate: f32,
    keys: [KeyFreq; KEY_COUNT],
}

impl KeyTable {
    pub fn new(sample_rate: f32, tuning: &Tuning) -> Self {
        let mut table = Self {
            sample_rate,
            keys: [KeyFreq::default(); KEY_COUNT],
        };
        table.retune(tuning, 1.0);
        table
    }

    /// Recomputes every key in place. `ratio` is applied on top of the tuning
    /// and carries controller driven fine/coarse tune.
    pub fn retune(&mut self, tuning: &Tuning, ratio: f32) {
        let sample_rate = self.sample_rate;
        for (key, entry) in self.keys.iter_mut().enumerate() {
            let hz = tuning.base_hz(key as u8) * tuning.tune * ratio;
            *entry = KeyFreq {
                hz,
                step: hz * WAVE_SIZE as f32 / sample_rate,
                rate: hz / sample_rate,
            };
        }
    }

    /// Keys above 127 are clamped.
    #[inline]
    pub fn key(&self, key: u8) -> KeyFreq {
        self.keys[(key as usize).min(KEY_COUNT - 1)]
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn step_for_hz(&self, hz: f32) -> f32 {
        hz * WAVE_SIZE as f32 / self.sample_rate
    }
}

/// Wavetable step back to Hz.
#[inline]
pub fn step_to_hz(step: f32, sample_rate: f32) -> f32 {
    step * sample_rate / WAVE_SIZE as f32
}

/// Maps a unit value onto an exponential range, e.g. time constants and cutoffs.
#[inline]
pub fn exp_scale(unit: f32, low: f32, high: f32) -> f32 {
    low * (high / low).powf(unit.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum VelocityCurve {
    #[default]
    Linear,
    /// More output for light playing.
    Soft,
    /// Less output for light playing.
    Hard,
    Exponential,
    /// Ignores velocity.
    Flat,
    Inverted,
}

impl VelocityCurve {
    fn index(self) -> usize {
        self as usize
    }

    fn evaluate(self, unit: f32) -> f32 {
        match self {
            VelocityCurve::Linear => unit,
            VelocityCurve::Soft => unit.sqrt(),
            VelocityCurve::Hard => unit * unit,
            VelocityCurve::Exponential => gain_curve(unit),
            VelocityCurve::Flat => 1.0,
            VelocityCurve::Inverted => 1.0 - unit * (126.0 / 127.0),
        }
    }
}

/// Unit to gain with a fixed dB range; 0 maps to silence and 1 to unity.
fn gain_curve(unit: f32) -> f32 {
    let span = 10f32.powf(GAIN_RANGE_DB / 20.0);
    (span.powf(unit.clamp(0.0, 1.0)) - 1.0) / (span - 1.0)
}

/// Process-wide response curves.
#[derive(Debug)]
pub struct Curves {
    gain: Vec<f32>,
    velocity: Vec<[f32; KEY_COUNT]>,
}

/// Shared curve tables, built on first use.
pub fn curves() -> &'static Curves {
    static CURVES: OnceLock<Curves> = OnceLock::new();
    CURVES.get_or_init(Curves::build)
}

impl Curves {
    fn build() -> Self {
        let gain = (0..=CURVE_SIZE)
            .map(|i| gain_curve(i as f32 / CURVE_SIZE as f32))
            .collect();
        let velocity = VelocityCurve::iter()
            .map(|curve| {
                let mut table = [0.0; KEY_COUNT];
                // velocity 0 is a note-off and never reaches a curve
                for (velocity, slot) in table.iter_mut().enumerate().skip(1) {
                    *slot = curve.evaluate(velocity as f32 / 127.0);
                }
                table
            })
            .collect();
        Self { gain, velocity }
    }

    /// Interpolated lookup of the exponential gain curve.
    #[inline]
    pub fn gain(&self, unit: f32) -> f32 {
        let position = unit.clamp(0.0, 1.0) * CURVE_SIZE as f32;
        let index = (position as usize).min(CURVE_SIZE - 1);
        let fraction = position - index as f32;
        self.gain[index] + fraction * (self.gain[index + 1] - self.gain[index])
    }

    #[inline]
    pub fn velocity(&self, curve: VelocityCurve, velocity: u8) -> f32 {
        self.velocity[curve.index()][(velocity as usize).min(KEY_COUNT - 1)]
    }
}
