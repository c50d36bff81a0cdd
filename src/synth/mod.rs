pub mod buffer;
pub mod delayline;
pub mod dispatch;
pub mod engine;
pub mod flags;
pub mod instruments;
pub mod operator;
pub mod ops;
pub mod pipeline;
pub mod prelude;
pub mod tables;
pub mod voice;

pub use dispatch::ControlEvent;
pub use engine::{Engine, EngineEvent, EngineInput};
pub use flags::{MixFlags, VoiceFlags};
pub use instruments::InstrumentKind;
pub use pipeline::{InstrumentId, Pipeline};
