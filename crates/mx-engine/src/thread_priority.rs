//! Real-time priority for the scheduling thread
//!
//! - **Linux**: SCHED_FIFO, then SCHED_RR (needs CAP_SYS_NICE or an rtprio
//!   limit); failure is logged and the loop keeps its normal priority
//! - **Other platforms**: unsupported, default priority
//!
//! State is tracked per thread since every connection runs its own loop.

use std::cell::Cell;

thread_local! {
    static ELEVATED: Cell<bool> = const { Cell::new(false) };
}

/// Result of priority elevation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityResult {
    /// Successfully elevated to real-time priority
    Success,
    /// This thread was already elevated
    AlreadySet,
    /// Failed to set priority (non-fatal, will use default)
    Failed,
    /// Platform not supported
    Unsupported,
}

/// Raise the calling thread to real-time priority
pub fn set_realtime_priority() -> PriorityResult {
    if ELEVATED.with(|e| e.get()) {
        return PriorityResult::AlreadySet;
    }

    let result = platform_set_priority();
    match result {
        PriorityResult::Success => {
            ELEVATED.with(|e| e.set(true));
            log::info!("Scheduling thread elevated to real-time priority");
        }
        PriorityResult::Failed => {
            log::warn!("Failed to set real-time thread priority (non-fatal)");
        }
        PriorityResult::Unsupported => {
            log::debug!("Real-time priority not supported on this platform");
        }
        PriorityResult::AlreadySet => {}
    }
    result
}

pub fn is_realtime() -> bool {
    ELEVATED.with(|e| e.get())
}

#[cfg(target_os = "linux")]
fn platform_set_priority() -> PriorityResult {
    use libc::{SCHED_FIFO, SCHED_RR, pthread_self, pthread_setschedparam, sched_param};

    let thread = unsafe { pthread_self() };

    // leaves headroom above us for kernel threads
    let param = sched_param { sched_priority: 80 };
    if unsafe { pthread_setschedparam(thread, SCHED_FIFO, &param) } == 0 {
        return PriorityResult::Success;
    }
    log::debug!("SCHED_FIFO refused, trying SCHED_RR");

    let param = sched_param { sched_priority: 70 };
    let result = unsafe { pthread_setschedparam(thread, SCHED_RR, &param) };
    if result == 0 {
        PriorityResult::Success
    } else {
        log::debug!("Real-time scheduling refused (error {})", result);
        PriorityResult::Failed
    }
}

#[cfg(not(target_os = "linux"))]
fn platform_set_priority() -> PriorityResult {
    PriorityResult::Unsupported
}
