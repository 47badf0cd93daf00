//! Audio I/O error types

use thiserror::Error;

/// Sink-side failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Sink is not running")]
    NotRunning,

    #[error("Write of {requested} samples exceeds available input {available}")]
    Overrun { requested: usize, available: usize },

    #[error("Write of {len} samples is not a whole number of {channels}-channel frames")]
    Misaligned { len: usize, channels: usize },

    #[error("Failed to open output: {0}")]
    OpenFailed(String),

    #[error("Unsupported sample width: {0} bits")]
    UnsupportedBits(u16),

    #[error("Encoder error: {0}")]
    Encode(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Faults raised by a sample source while reading
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Source closed")]
    Closed,

    #[error("Source I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Resample(#[from] ResampleError),
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Resampler construction and processing failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResampleError {
    #[error("Unsupported conversion {from} -> {to}: {reason}")]
    Unsupported {
        from: mx_core::AudioFormat,
        to: mx_core::AudioFormat,
        reason: String,
    },

    #[error("Failed to build resampler: {0}")]
    Construction(String),

    #[error("Resampling failed: {0}")]
    Process(String),
}
