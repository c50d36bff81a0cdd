//! Real-time polyphonic operator synthesis engine.
//!
//! DSP units ([synth::operator::Operator]) are bound into per-instrument
//! pipelines ([synth::pipeline::Pipeline]), multiplexed across a fixed pool of
//! voices and driven one block at a time by the audio thread
//! ([audio::AudioThread]).

pub mod audio;
pub mod config;
pub mod error;
#[cfg(feature = "native")]
pub mod input;
pub mod runtime;
pub mod synth;

pub use config::{EngineConfig, InstrumentConfig};
pub use error::{ConfigError, EngineError};
