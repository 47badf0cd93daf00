//! mx-audio: Sources and sinks around the mixer
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────┐   ┌──────────────┐
//! │ decoder feed │──▶│ ResampledProvider│──▶│ Mixer │──▶│ DeviceSink   │──▶ OutputLine
//! │ MemoryProv.  │   │  (rubato FFT)    │   │       │──▶│ EncoderSink  │──▶ transport
//! │ SharedPipe   │   └──────────────────┘   │       │──▶│ RingBufferSink
//! └──────────────┘                          │       │──▶│ PipeSink ────┼──▶ PipeSource
//!                                           └───────┘   └──────────────┘
//! ```
//!
//! Reads and writes never block: sources report `ReadResult::Empty` when
//! they have nothing yet, sinks advertise `available_input()` and the mixer
//! never writes more than that.

mod error;
mod feed;
mod provider;
mod resample;
mod shared;
mod source;

pub mod sink;

pub use error::*;
pub use feed::*;
pub use provider::*;
pub use resample::*;
pub use shared::*;
pub use sink::*;
pub use source::*;
