//! Error types for the mixing engine

use thiserror::Error;

use crate::AudioFormat;

/// Configuration-time errors (format, capacity, registry).
///
/// These are raised synchronously to whoever attached or constructed the
/// offending object; nothing in the tick path produces them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixError {
    #[error("format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    #[error("invalid capacity: {0}")]
    InvalidCapacity(usize),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("mixer already registered: {0}")]
    DuplicateMixer(String),

    #[error("mixer not registered: {0}")]
    UnknownMixer(String),

    #[error("buffer overrun: {requested} samples offered, {capacity} accepted")]
    Overrun { requested: usize, capacity: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias
pub type MixResult<T> = Result<T, MixError>;

/// Errors parsing or validating an `EngineConfig`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },

    #[error("malformed config document: {0}")]
    Malformed(String),
}
