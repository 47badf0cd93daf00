//! One-shot completion signal
//!
//! `Completion` is fulfilled at most once; later calls are no-ops. Waiters
//! hold a `CompletionSignal` (a crossbeam receiver whose sender is dropped on
//! completion), callbacks registered after the fact run immediately.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use std::time::Duration;

type Callback = Box<dyn FnOnce() + Send>;

struct Pending {
    _tx: Sender<()>,
    callbacks: Vec<Callback>,
}

pub struct Completion {
    pending: Mutex<Option<Pending>>,
    rx: Receiver<()>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            pending: Mutex::new(Some(Pending {
                _tx: tx,
                callbacks: Vec::new(),
            })),
            rx,
        }
    }

    /// Fulfil the signal. Returns false if it already was.
    pub fn complete(&self) -> bool {
        let Some(pending) = self.pending.lock().take() else {
            return false;
        };
        let Pending { _tx, callbacks } = pending;
        drop(_tx);
        for callback in callbacks {
            callback();
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.pending.lock().is_none()
    }

    /// Run `f` once on completion, or now if already complete
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(p) => p.callbacks.push(Box::new(f)),
            None => {
                drop(pending);
                f();
            }
        }
    }

    pub fn signal(&self) -> CompletionSignal {
        CompletionSignal {
            rx: self.rx.clone(),
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// Waitable view of a `Completion`
#[derive(Clone)]
pub struct CompletionSignal {
    rx: Receiver<()>,
}

impl CompletionSignal {
    pub fn is_complete(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until complete
    pub fn wait(&self) {
        // nothing is ever sent; recv returns once the sender is dropped
        let _ = self.rx.recv();
    }

    /// Returns true if completed within `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_completes_once() {
        let completion = Completion::new();
        let signal = completion.signal();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        completion.on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!signal.is_complete());
        assert!(completion.complete());
        assert!(!completion.complete());
        assert!(signal.is_complete());
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_callback_runs_immediately() {
        let completion = Completion::new();
        completion.complete();

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        completion.on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_completion() {
        let completion = Arc::new(Completion::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        completion.on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let completion = Arc::clone(&completion);
                std::thread::spawn(move || completion.complete())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_times_out_while_pending() {
        let completion = Completion::new();
        assert!(!completion.signal().wait_timeout(Duration::from_millis(5)));
    }
}
