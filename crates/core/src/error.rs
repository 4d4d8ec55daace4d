//! Error model.

use thiserror::Error;

/// Result type returned by consumer collaborators.
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Failure reported by a consumer collaborator.
///
/// None of these ever escape the scheduler's entry points; they are logged,
/// counted and classified. Keep payloads as plain strings so errors can be
/// cloned into background tasks and compared in tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The batch handler failed as a whole (e.g. destination unreachable).
    #[error("batch handler failed: {0}")]
    Handler(String),

    /// Publishing to a broker or sink failed.
    #[error("transport failed: {0}")]
    Transport(String),

    /// A payload could not be decoded into the item type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A decoded message was rejected by the validator.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A background thread could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

impl ConsumerError {
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Invalid configuration, detected at construction time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch_size must be positive")]
    ZeroBatchSize,

    #[error("timeout_ms must be positive")]
    ZeroTimeout,

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
