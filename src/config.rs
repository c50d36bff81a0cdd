use crate::error::ConfigError;
use crate::synth::buffer::MAX_BLOCK;
use crate::synth::instruments::InstrumentKind;
use crate::synth::tables::{Tuning, VelocityCurve};
use crate::synth::voice::StealPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MAX_CHANNELS: u8 = 16;
pub const MAX_VOICES: usize = 256;
/// Instrument ids travel in one 7-bit data byte of the vendor message.
pub const MAX_INSTRUMENTS: usize = 128;
/// Transpose range in semitones either way.
pub const MAX_TRANSPOSE: i8 = 48;

/// Engine-wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per block.
    pub block_size: usize,
    /// Blocks of silence written after (re)opening the device.
    pub preload_blocks: usize,
    pub max_instruments: usize,
    /// Depth of the control-to-audio queue.
    pub control_queue: usize,
    pub input_trim: f32,
    pub output_trim: f32,
    pub handshake_timeout_ms: u64,
    /// Substring of the output device name; the host default when unset.
    pub output_device: Option<String>,
    pub midi_port: Option<usize>,
    pub instruments: Vec<InstrumentConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 256,
            preload_blocks: 2,
            max_instruments: 16,
            control_queue: 1024,
            input_trim: 1.0,
            output_trim: 0.65,
            handshake_timeout_ms: 2000,
            output_device: None,
            midi_port: None,
            instruments: vec![InstrumentConfig::default()],
        }
    }
}

/// Settings for one instrument instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct InstrumentConfig {
    pub kind: InstrumentKind,
    /// Zero-based MIDI channel.
    pub channel: u8,
    /// Voices in use at startup.
    pub voices: usize,
    /// Pool size; voice count changes are clamped to it.
    pub max_voices: usize,
    pub steal: StealPolicy,
    pub tuning: Tuning,
    /// Semitones added to every incoming key before the key table lookup.
    pub transpose: i8,
    pub velocity_curve: VelocityCurve,
    /// Portamento time in seconds, 0 for none.
    pub glide: f32,
    /// Per-voice detune spread, 0.0-1.0.
    pub detune: f32,
    /// Pitch bend range in semitones.
    pub bend_range: f32,
    pub volume: f32,
    pub pan: f32,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            kind: InstrumentKind::Subtractive,
            channel: 0,
            voices: 8,
            max_voices: 32,
            steal: StealPolicy::Oldest,
            tuning: Tuning::default(),
            transpose: 0,
            velocity_curve: VelocityCurve::Linear,
            glide: 0.0,
            detune: 0.1,
            bend_range: 2.0,
            volume: 0.8,
            pan: 0.5,
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        log::info!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));
        if !(8000..=192_000).contains(&self.sample_rate) {
            return invalid(format!("sample-rate {} out of range", self.sample_rate));
        }
        if !(16..=MAX_BLOCK).contains(&self.block_size) {
            return invalid(format!("block-size must be 16..={MAX_BLOCK}, got {}", self.block_size));
        }
        if self.max_instruments == 0 || self.max_instruments > MAX_INSTRUMENTS {
            return invalid(format!("max-instruments must be 1..={MAX_INSTRUMENTS}"));
        }
        if self.instruments.len() > self.max_instruments {
            return invalid(format!(
                "{} instruments configured but max-instruments is {}",
                self.instruments.len(),
                self.max_instruments
            ));
        }
        if self.control_queue < 16 {
            return invalid("control-queue must hold at least 16 events".into());
        }
        if self.input_trim < 0.0 || self.output_trim < 0.0 {
            return invalid("trims must not be negative".into());
        }
        for (index, instrument) in self.instruments.iter().enumerate() {
            instrument
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("instrument {index}: {e}")))?;
        }
        Ok(())
    }

    pub fn block_seconds(&self) -> f32 {
        self.block_size as f32 / self.sample_rate as f32
    }
}

impl InstrumentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.channel >= MAX_CHANNELS {
            return Err(format!("channel {} out of range", self.channel));
        }
        if self.max_voices == 0 || self.max_voices > MAX_VOICES {
            return Err(format!("max-voices must be 1..={MAX_VOICES}"));
        }
        if self.voices == 0 || self.voices > self.max_voices {
            return Err(format!("voices must be 1..={}", self.max_voices));
        }
        if self.glide < 0.0 || self.bend_range < 0.0 {
            return Err("glide and bend-range must not be negative".into());
        }
        if !(0.0..=1.0).contains(&self.detune) || !(0.0..=1.0).contains(&self.pan) {
            return Err("detune and pan must be within 0.0-1.0".into());
        }
        if !(-MAX_TRANSPOSE..=MAX_TRANSPOSE).contains(&self.transpose) {
            return Err(format!("transpose must be within +-{MAX_TRANSPOSE} semitones"));
        }
        if self.tuning.tune <= 0.0 || self.tuning.semitone <= 0.0 {
            return Err("tuning ratios must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_kebab_case() {
        let config = EngineConfig::from_json(
            r#"{
                "sample-rate": 44100,
                "block-size": 128,
                "instruments": [
                    { "kind": "organ", "channel": 1, "voices": 4, "velocity-curve": "flat",
                      "tuning": { "overrides": { "60": 262.0 } } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.instruments[0].kind, InstrumentKind::Organ);
        assert_eq!(config.instruments[0].velocity_curve, VelocityCurve::Flat);
        assert_eq!(config.instruments[0].tuning.overrides.get(&60), Some(&262.0));
        assert_eq!(config.preload_blocks, 2);
    }

    #[test]
    fn parses_instrument_transpose() {
        let config = EngineConfig::from_json(r#"{ "instruments": [ { "kind": "fm", "transpose": -12 } ] }"#).unwrap();
        assert_eq!(config.instruments[0].transpose, -12);
        let err = EngineConfig::from_json(r#"{ "instruments": [ { "transpose": 60 } ] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn instrument_names_match_json_names() {
        for kind in InstrumentKind::iter() {
            let name: &'static str = kind.into();
            assert_eq!(name.parse::<InstrumentKind>().unwrap(), kind);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{kind}\""));
        }
        assert!("piano".parse::<InstrumentKind>().is_err());
    }

    #[test]
    fn rejects_bad_block_size() {
        let err = EngineConfig::from_json(r#"{ "block-size": 8 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_voices_over_capacity() {
        let mut config = EngineConfig::default();
        config.instruments[0].voices = 64;
        assert!(config.validate().is_err());
    }
}
