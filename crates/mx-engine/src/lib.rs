//! mx-engine: Mixing and scheduling
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────── AudioConnection ───────────────────────────┐
//!                 │  scheduling thread: LoopTimer ─▶ for each playing mixer: process_buffer │
//!                 └────────────────────────────────────────┬───────────────────────────────┘
//!                                                          │
//! ┌─────────────┐  add_player  ┌──────────────┐ add_channel ▼ ┌───────┐   ┌─────────────┐
//! │ AudioPlayer │─────────────▶│ AudioChannel │──────────────▶│ Mixer │──▶│ MixerSink(s)│
//! │ FadingPlayer│              │ - ownership  │               │ - sum │   └─────────────┘
//! └─────────────┘              │ - idle       │               │ - dsp │
//!                              │ - speaking   │               └───────┘
//!                              └──────────────┘
//! ```
//!
//! Nothing reachable from the scheduling thread blocks: channel reads and
//! sink writes return short counts instead. Channel faults remove only the
//! failing channel; a panicking mixer is emptied and the loop carries on.

mod audio_channel;
mod channel;
mod completion;
mod connection;
mod error;
mod events;
mod mixer;
mod player;
mod thread_priority;
mod timer;

pub use audio_channel::*;
pub use channel::*;
pub use completion::*;
pub use connection::*;
pub use error::*;
pub use events::*;
pub use mixer::*;
pub use player::*;
pub use thread_priority::*;
pub use timer::*;
