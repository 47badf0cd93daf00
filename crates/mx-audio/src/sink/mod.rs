//! Mixer sinks
//!
//! Every sink advertises how much it can take right now through
//! `available_input()`. The mixer never writes more than that, and a write
//! never blocks.

mod device;
mod encoder;
mod pipe;
mod ring;

#[cfg(feature = "device-cpal")]
mod cpal_line;

pub use device::*;
pub use encoder::*;
pub use pipe::*;
pub use ring::*;

#[cfg(feature = "device-cpal")]
pub use cpal_line::CpalLine;

use mx_core::{AudioFormat, Sample};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::SinkResult;

/// Cumulative I/O statistics of a sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Samples accepted since construction
    pub position: u64,
    pub underflows: u64,
    pub overflows: u64,
}

/// Non-blocking consumer of the mixer's output
pub trait MixerSink: Send + Sync {
    fn format(&self) -> AudioFormat;

    /// Nominal buffer size in samples
    fn buffer_size(&self) -> usize;

    /// Samples a `write` will accept right now; zero while stopped
    fn available_input(&self) -> usize;

    /// Accept `samples`. Writing more than `available_input()` is an error.
    fn write(&self, samples: &[Sample]) -> SinkResult<()>;

    /// Returns true if the sink transitioned to running
    fn start(&self) -> bool;

    /// Returns true if the sink transitioned to stopped
    fn stop(&self) -> bool;

    fn is_running(&self) -> bool;

    fn stats(&self) -> SinkStats;

    fn position(&self) -> u64 {
        self.stats().position
    }

    fn underflows(&self) -> u64 {
        self.stats().underflows
    }

    fn overflows(&self) -> u64 {
        self.stats().overflows
    }
}

/// Atomic counters and running flag shared by the sink implementations
#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    running: AtomicBool,
    position: AtomicU64,
    underflows: AtomicU64,
    overflows: AtomicU64,
}

impl SinkCounters {
    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flip the running flag; true if it changed
    #[inline]
    pub(crate) fn transition(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::AcqRel) != running
    }

    #[inline]
    pub(crate) fn advance(&self, samples: usize) {
        self.position.fetch_add(samples as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn underflow(&self) {
        self.underflows.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SinkStats {
        SinkStats {
            position: self.position.load(Ordering::Relaxed),
            underflows: self.underflows.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}

/// Shared write preconditions: running, within capacity, whole frames
pub(crate) fn check_write(
    counters: &SinkCounters,
    format: &AudioFormat,
    len: usize,
    available: usize,
) -> SinkResult<()> {
    if !counters.is_running() {
        return Err(crate::SinkError::NotRunning);
    }
    if len > available {
        return Err(crate::SinkError::Overrun {
            requested: len,
            available,
        });
    }
    let channels = format.frame_len();
    if len % channels != 0 {
        return Err(crate::SinkError::Misaligned { len, channels });
    }
    Ok(())
}
