//! mx-core: Shared types for the mixing engine
//!
//! Foundational pieces used by every other crate:
//! - `Sample` and `AudioFormat` descriptors
//! - `StreamBuffer` - fixed-capacity interleaved PCM ring
//! - `MixError` / `ConfigError` - error taxonomy
//! - `EngineConfig` - flat key table with defaults

mod buffer;
mod config;
mod error;
mod format;

pub use buffer::*;
pub use config::*;
pub use error::*;
pub use format::*;

/// Type alias for audio samples
pub type Sample = f64;
