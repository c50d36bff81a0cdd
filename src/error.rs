use crate::audio::DeviceError;
use thiserror::Error;

/// Errors raised while building instruments, starting the engine, or talking
/// to it from the control thread. None of these can occur inside a block.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(#[source] DeviceError),
    #[error("audio device lost and could not be reopened: {0}")]
    DeviceLost(#[source] DeviceError),
    #[error("operator {operator} has no port named {port:?}")]
    UnknownPort { operator: String, port: String },
    #[error("operator {operator} has no parameter named {param:?}")]
    UnknownParam { operator: String, param: String },
    #[error("{direction} port {port:?} of operator {operator} is not routed")]
    UnroutedPort {
        operator: String,
        port: String,
        direction: &'static str,
    },
    #[error("buffer {buffer:?} is bound to more than one port of operator {operator}")]
    AliasedBuffer { operator: String, buffer: String },
    #[error("buffer {buffer:?} is read-only and cannot be bound to output {port:?} of operator {operator}")]
    ReadOnlyBuffer {
        operator: String,
        port: String,
        buffer: String,
    },
    #[error("instrument wiring is invalid: {0}")]
    Wiring(String),
    #[error("engine already holds {0} instruments")]
    TooManyInstruments(usize),
    #[error("no instrument with id {0}")]
    UnknownInstrument(u16),
    #[error("engine did not answer within the handshake timeout")]
    Timeout,
    #[error("engine is no longer running")]
    Disconnected,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while loading or validating an [crate::EngineConfig].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
