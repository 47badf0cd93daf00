//! Snapshot sink: keeps the most recent audio in a fixed window

use mx_core::{AudioFormat, MixError, MixResult, Sample};
use parking_lot::Mutex;
use std::time::Duration;

use super::{MixerSink, SinkCounters, SinkStats, check_write};
use crate::SinkResult;

/// Fixed-size shifting window over the mixer's output.
///
/// Accepts any amount while running; when a single write is longer than the
/// window only its tail is kept and an overflow is counted.
pub struct RingBufferSink {
    format: AudioFormat,
    window: Mutex<Vec<Sample>>,
    counters: SinkCounters,
}

impl RingBufferSink {
    /// Window covering `duration` of audio in `format`
    pub fn new(format: AudioFormat, duration: Duration) -> MixResult<Self> {
        format.validate()?;
        let frames = (format.sample_rate as f64 * duration.as_secs_f64()).ceil() as usize;
        let capacity = frames * format.frame_len();
        Self::with_capacity(format, capacity)
    }

    pub fn with_capacity(format: AudioFormat, capacity: usize) -> MixResult<Self> {
        if capacity == 0 || capacity % format.frame_len() != 0 {
            return Err(MixError::InvalidCapacity(capacity));
        }
        Ok(Self {
            format,
            window: Mutex::new(vec![0.0; capacity]),
            counters: SinkCounters::default(),
        })
    }

    /// Copy of the window, oldest sample first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.window.lock().clone()
    }

    pub fn capacity(&self) -> usize {
        self.window.lock().len()
    }
}

impl MixerSink for RingBufferSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        self.capacity()
    }

    fn available_input(&self) -> usize {
        if self.counters.is_running() {
            usize::MAX
        } else {
            0
        }
    }

    fn write(&self, samples: &[Sample]) -> SinkResult<()> {
        check_write(&self.counters, &self.format, samples.len(), self.available_input())?;

        let mut window = self.window.lock();
        let capacity = window.len();
        if samples.len() >= capacity {
            if samples.len() > capacity {
                self.counters.overflow();
            }
            window.copy_from_slice(&samples[samples.len() - capacity..]);
        } else {
            window.copy_within(samples.len().., 0);
            let tail = capacity - samples.len();
            window[tail..].copy_from_slice(samples);
        }

        self.counters.advance(samples.len());
        Ok(())
    }

    fn start(&self) -> bool {
        let started = self.counters.transition(true);
        if started {
            self.window.lock().fill(0.0);
        }
        started
    }

    fn stop(&self) -> bool {
        self.counters.transition(false)
    }

    fn is_running(&self) -> bool {
        self.counters.is_running()
    }

    fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SinkError;

    fn sink(capacity: usize) -> RingBufferSink {
        RingBufferSink::with_capacity(AudioFormat::float(48000, 2), capacity).unwrap()
    }

    #[test]
    fn test_capacity_from_duration() {
        let sink = RingBufferSink::new(AudioFormat::float(48000, 2), Duration::from_millis(10))
            .unwrap();
        assert_eq!(sink.capacity(), 960);
    }

    #[test]
    fn test_window_shifts() {
        let sink = sink(4);
        assert!(sink.start());
        assert!(!sink.start());

        sink.write(&[1.0, 2.0]).unwrap();
        sink.write(&[3.0, 4.0]).unwrap();
        sink.write(&[5.0, 6.0]).unwrap();
        assert_eq!(sink.snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(sink.position(), 6);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let sink = sink(4);
        sink.start();
        sink.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(sink.snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(sink.overflows(), 1);
    }

    #[test]
    fn test_stopped_sink_rejects_writes() {
        let sink = sink(4);
        assert_eq!(sink.available_input(), 0);
        assert_eq!(sink.write(&[0.0, 0.0]), Err(SinkError::NotRunning));
        assert!(!sink.stop());
    }
}
