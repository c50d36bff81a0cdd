//! Concrete instruments: operator wiring plus the block hooks that drive it.

pub mod fm;
pub mod organ;
pub mod subtractive;

use super::flags::MixFlags;
use super::ops::Palette;
use super::pipeline::{Controls, InstrumentId, Pipeline};
use crate::config::InstrumentConfig;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter, EnumString, IntoStaticStr};

/// Global controller number that switches mix flags; the operator field
/// carries the flag bit.
pub const CONTROLLER_MIX_FLAG: u8 = 127;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumCountMacro,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InstrumentKind {
    #[default]
    Subtractive,
    Organ,
    Fm,
}

/// Builds the pipeline for `config.kind`.
pub fn build(palette: &Palette, id: InstrumentId, config: &InstrumentConfig) -> Result<Pipeline, EngineError> {
    let pipeline = match config.kind {
        InstrumentKind::Subtractive => subtractive::build(palette, id, config)?,
        InstrumentKind::Organ => organ::build(palette, id, config)?,
        InstrumentKind::Fm => fm::build(palette, id, config, fm::FmPreset::default())?,
    };
    log::info!("built {} instrument {} on channel {}", config.kind, id, config.channel);
    Ok(pipeline)
}

/// Shared handling of [CONTROLLER_MIX_FLAG]. Returns false for any other
/// controller.
pub(crate) fn mix_flag_controller(controls: &mut Controls<'_>, controller: u8, operator: u8, value: f32) -> bool {
    if controller != CONTROLLER_MIX_FLAG || operator >= 64 {
        return false;
    }
    controls.set_mix_flag(MixFlags::bit(operator as u32), value >= 0.5);
    true
}
