//! Drift-corrected fixed-interval timer
//!
//! The deadline advances by exactly one interval per tick, so short
//! oversleeps are absorbed by the following ticks. After a stall longer
//! than `RESYNC_INTERVALS` the timer jumps to the present instead of
//! replaying the missed ticks back to back.

use std::time::{Duration, Instant};

/// Lag, in intervals, beyond which the timer resynchronizes
pub const RESYNC_INTERVALS: u32 = 30;

/// Sleeps shorter than this are spun
const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct LoopTimer {
    interval: Duration,
    deadline: Instant,
    resyncs: u64,
}

impl LoopTimer {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// Schedule anchored at `start`; the first tick is due immediately
    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            deadline: start,
            resyncs: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Times the timer gave up catching up
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Restart the schedule from `now`
    pub fn reset(&mut self, now: Instant) {
        self.deadline = now;
    }

    /// Move to the next deadline and return it.
    ///
    /// A deadline already in the past means the caller is behind and should
    /// run the next tick without sleeping.
    pub fn advance(&mut self, now: Instant) -> Instant {
        self.deadline += self.interval;
        let behind = now.saturating_duration_since(self.deadline);
        if behind > self.interval * RESYNC_INTERVALS {
            log::warn!(
                "Scheduling loop fell {:.1} ms behind, resynchronizing",
                behind.as_secs_f64() * 1000.0
            );
            self.resyncs += 1;
            self.deadline = now;
        }
        self.deadline
    }

    /// Sleep until the current deadline
    pub fn wait(&self) {
        sleep_until(self.deadline);
    }
}

/// Coarse OS sleep followed by a spin to the exact instant
pub fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }
    let remaining = deadline - now;
    if remaining > SPIN_THRESHOLD {
        std::thread::sleep(remaining - SPIN_THRESHOLD / 2);
    }
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}
