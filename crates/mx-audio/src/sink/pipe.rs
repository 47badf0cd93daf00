//! In-process pipe: one mixer's output as another mixer's input

use mx_core::{AudioFormat, MixError, MixResult, Sample};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;

use super::{MixerSink, SinkCounters, SinkStats, check_write};
use crate::{AudioProvider, ReadResult, SinkResult, StreamResult};

/// Create a connected sink/source pair buffering `capacity` samples
pub fn pipe(format: AudioFormat, capacity: usize) -> MixResult<(PipeSink, PipeSource)> {
    format.validate()?;
    if capacity == 0 || capacity % format.frame_len() != 0 {
        return Err(MixError::InvalidCapacity(capacity));
    }

    let (producer, consumer) = RingBuffer::<Sample>::new(capacity);
    let counters = Arc::new(SinkCounters::default());

    Ok((
        PipeSink {
            format,
            capacity,
            producer: Mutex::new(producer),
            counters: Arc::clone(&counters),
        },
        PipeSource {
            format,
            consumer,
            counters,
            closed: false,
        },
    ))
}

/// Writing end, attached to the upstream mixer
pub struct PipeSink {
    format: AudioFormat,
    capacity: usize,
    producer: Mutex<Producer<Sample>>,
    counters: Arc<SinkCounters>,
}

impl MixerSink for PipeSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        self.capacity
    }

    fn available_input(&self) -> usize {
        if self.counters.is_running() {
            self.producer.lock().slots()
        } else {
            0
        }
    }

    fn write(&self, samples: &[Sample]) -> SinkResult<()> {
        let mut producer = self.producer.lock();
        check_write(&self.counters, &self.format, samples.len(), producer.slots())?;
        if samples.is_empty() {
            return Ok(());
        }

        let written = match producer.write_chunk_uninit(samples.len()) {
            Ok(chunk) => chunk.fill_from_iter(samples.iter().copied()),
            Err(_) => 0,
        };
        if written < samples.len() {
            self.counters.overflow();
        }
        self.counters.advance(written);
        Ok(())
    }

    fn start(&self) -> bool {
        self.counters.transition(true)
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

/// Reading end, fed to the downstream mixer as a provider.
///
/// Reports end of stream once the sink has been dropped and drained.
pub struct PipeSource {
    format: AudioFormat,
    consumer: Consumer<Sample>,
    counters: Arc<SinkCounters>,
    closed: bool,
}

impl AudioProvider for PipeSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn available(&self) -> usize {
        if self.closed { 0 } else { self.consumer.slots() }
    }

    fn read(&mut self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        if self.closed {
            return Ok(ReadResult::EndOfStream);
        }

        let count = buffer.len().min(self.consumer.slots());
        if count == 0 {
            if self.consumer.is_abandoned() && self.consumer.is_empty() {
                return Ok(ReadResult::EndOfStream);
            }
            if !buffer.is_empty() && self.counters.is_running() {
                self.counters.underflow();
            }
            return Ok(ReadResult::Empty);
        }

        match self.consumer.read_chunk(count) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                buffer[..first.len()].copy_from_slice(first);
                buffer[first.len()..first.len() + second.len()].copy_from_slice(second);
                chunk.commit_all();
                Ok(ReadResult::Data(count))
            }
            Err(_) => Ok(ReadResult::Empty),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SinkError;

    #[test]
    fn test_pipe_transfers_samples() {
        let (sink, mut source) = pipe(AudioFormat::float(48000, 2), 8).unwrap();
        assert_eq!(sink.available_input(), 0);
        assert!(sink.start());
        assert_eq!(sink.available_input(), 8);

        sink.write(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(sink.available_input(), 4);
        assert_eq!(source.available(), 4);

        let mut out = [0.0; 8];
        assert_eq!(source.read(&mut out).unwrap(), ReadResult::Data(4));
        assert_eq!(&out[..4], &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(sink.position(), 4);
    }

    #[test]
    fn test_underflow_counted_on_empty_read() {
        let (sink, mut source) = pipe(AudioFormat::float(48000, 2), 8).unwrap();
        sink.start();
        let mut out = [0.0; 4];
        assert_eq!(source.read(&mut out).unwrap(), ReadResult::Empty);
        assert_eq!(sink.underflows(), 1);
    }

    #[test]
    fn test_write_beyond_capacity_rejected() {
        let (sink, _source) = pipe(AudioFormat::float(48000, 2), 4).unwrap();
        sink.start();
        assert_eq!(
            sink.write(&[0.0; 6]),
            Err(SinkError::Overrun {
                requested: 6,
                available: 4
            })
        );
        assert_eq!(
            sink.write(&[0.0; 3]),
            Err(SinkError::Misaligned {
                len: 3,
                channels: 2
            })
        );
    }

    #[test]
    fn test_dropped_sink_ends_source() {
        let (sink, mut source) = pipe(AudioFormat::float(48000, 1), 4).unwrap();
        sink.start();
        sink.write(&[0.5, 0.5]).unwrap();
        drop(sink);

        let mut out = [0.0; 4];
        assert_eq!(source.read(&mut out).unwrap(), ReadResult::Data(2));
        assert!(source.read(&mut out).unwrap().is_end());
    }
}
