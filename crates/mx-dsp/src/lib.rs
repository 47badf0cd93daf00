//! mx-dsp: Filters for the mixer's output stage
//!
//! ## Modules
//! - `biquad` - TDF-II biquad core used by the tone bands
//! - `dynamics` - soft-knee compressor, lookahead limiter
//! - `tone` - wet/dry band-pass tone shaper
//! - `signal_integrity` - headroom gain, soft clip, dither
//! - `chain` - per-channel muxing, ordered chain, default chain builder
//!
//! Filters are mono and operate on a planar window. A `MuxedFilter` holds
//! one instance per audio channel so each keeps its own history.

pub mod biquad;
pub mod chain;
pub mod dynamics;
pub mod signal_integrity;
pub mod tone;

pub use chain::*;
pub use dynamics::{Compressor, LIMITER_LOOKAHEAD, Limiter};
pub use signal_integrity::{Dither, Gain, SoftClip};
pub use tone::ToneBand;

use mx_core::Sample;

/// Stateful mono transform over a window of samples
pub trait Filter: Send {
    /// Process a single sample
    fn process_sample(&mut self, input: Sample) -> Sample;

    /// Process `buffer` in place, returning the number of samples processed
    fn process(&mut self, buffer: &mut [Sample]) -> usize {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
        buffer.len()
    }

    /// Zero all history
    fn reset(&mut self);

    /// Delay introduced, in samples
    fn latency(&self) -> usize {
        0
    }
}

/// Transform over a planar multi-channel window
pub trait MultiChannelFilter: Send {
    fn channels(&self) -> usize;

    /// Process the first `len` samples of every channel in place
    fn process(&mut self, planar: &mut [Vec<Sample>], len: usize) -> usize;

    fn reset(&mut self);
}
