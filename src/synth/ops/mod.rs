//! The operator palette: every DSP unit an instrument can bind.

pub mod amplifier;
pub mod chorus;
pub mod envelope;
pub mod filter;
pub mod lfo;
pub mod noise;
pub mod oscillator;
pub mod phase_mod;
pub mod rotary;

use super::operator::{DynOperator, Operator, OperatorSpec};
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::{EnumCount as EnumCountMacro, EnumIter};

pub use amplifier::Amplifier;
pub use chorus::Chorus;
pub use envelope::Envelope;
pub use filter::ResonantFilter;
pub use lfo::Lfo;
pub use noise::Noise;
pub use oscillator::Oscillator;
pub use phase_mod::PhaseMod;
pub use rotary::Rotary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCountMacro, EnumIter)]
pub enum OperatorKind {
    Oscillator,
    Envelope,
    Filter,
    Amplifier,
    Lfo,
    Noise,
    PhaseMod,
    Chorus,
    Rotary,
}

impl OperatorKind {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One initialised instance of every operator kind at a given sample rate
/// and block size. Pipelines share these instances.
pub struct Palette {
    sample_rate: f32,
    block_size: usize,
    operators: Vec<Arc<dyn DynOperator>>,
}

impl Palette {
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        let operators = OperatorKind::iter()
            .map(|kind| Self::init(kind, sample_rate, block_size))
            .collect();
        log::debug!("operator palette ready at {sample_rate} Hz, {block_size} frames");
        Self {
            sample_rate,
            block_size,
            operators,
        }
    }

    fn init(kind: OperatorKind, sample_rate: f32, block_size: usize) -> Arc<dyn DynOperator> {
        let index = kind.index();
        match kind {
            OperatorKind::Oscillator => Arc::new(Oscillator::init(index, sample_rate, block_size)),
            OperatorKind::Envelope => Arc::new(Envelope::init(index, sample_rate, block_size)),
            OperatorKind::Filter => Arc::new(ResonantFilter::init(index, sample_rate, block_size)),
            OperatorKind::Amplifier => Arc::new(Amplifier::init(index, sample_rate, block_size)),
            OperatorKind::Lfo => Arc::new(Lfo::init(index, sample_rate, block_size)),
            OperatorKind::Noise => Arc::new(Noise::init(index, sample_rate, block_size)),
            OperatorKind::PhaseMod => Arc::new(PhaseMod::init(index, sample_rate, block_size)),
            OperatorKind::Chorus => Arc::new(Chorus::init(index, sample_rate, block_size)),
            OperatorKind::Rotary => Arc::new(Rotary::init(index, sample_rate, block_size)),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn get(&self, kind: OperatorKind) -> Arc<dyn DynOperator> {
        Arc::clone(&self.operators[kind.index()])
    }

    pub fn spec(&self, kind: OperatorKind) -> &OperatorSpec {
        self.operators[kind.index()].spec()
    }
}

impl std::fmt::Debug for Palette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Palette")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("operators", &self.operators.len())
            .finish()
    }
}
