//! Decoder-thread feed
//!
//! A decoder running on its own thread pushes PCM through a lock-free SPSC
//! ring; the mixer side reads it as an `AudioProvider` without blocking.

use mx_core::{AudioFormat, MixError, MixResult, Sample};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{AudioProvider, ReadResult, StreamResult};

struct FeedShared {
    finished: AtomicBool,
    underflows: AtomicU64,
}

/// Create a connected feeder/provider pair with room for `capacity` samples
pub fn feed(format: AudioFormat, capacity: usize) -> MixResult<(PcmFeeder, FeedProvider)> {
    format.validate()?;
    if capacity == 0 {
        return Err(MixError::InvalidCapacity(capacity));
    }

    let (producer, consumer) = RingBuffer::<Sample>::new(capacity);
    let shared = Arc::new(FeedShared {
        finished: AtomicBool::new(false),
        underflows: AtomicU64::new(0),
    });

    Ok((
        PcmFeeder {
            producer,
            shared: Arc::clone(&shared),
        },
        FeedProvider {
            format,
            consumer,
            shared,
            closed: false,
        },
    ))
}

/// Producer half, owned by the decoding thread
pub struct PcmFeeder {
    producer: Producer<Sample>,
    shared: Arc<FeedShared>,
}

impl PcmFeeder {
    /// Free slots
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Push what fits; returns the count accepted
    pub fn write(&mut self, samples: &[Sample]) -> usize {
        let count = samples.len().min(self.producer.slots());
        if count == 0 {
            return 0;
        }
        match self.producer.write_chunk_uninit(count) {
            Ok(chunk) => chunk.fill_from_iter(samples[..count].iter().copied()),
            Err(_) => 0,
        }
    }

    /// Mark the end of the stream; the reader reports it once drained
    pub fn finish(self) {
        self.shared.finished.store(true, Ordering::Release);
    }

    /// True once the reading side has gone away
    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }
}

/// Consumer half, handed to the mixer
pub struct FeedProvider {
    format: AudioFormat,
    consumer: Consumer<Sample>,
    shared: Arc<FeedShared>,
    closed: bool,
}

impl FeedProvider {
    /// Reads that found nothing while the feed was still live
    pub fn underflows(&self) -> u64 {
        self.shared.underflows.load(Ordering::Relaxed)
    }

    fn producer_done(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire) || self.consumer.is_abandoned()
    }
}

impl AudioProvider for FeedProvider {
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
            // check the flag before trusting an empty ring
            if self.producer_done() && self.consumer.is_empty() {
                return Ok(ReadResult::EndOfStream);
            }
            if !buffer.is_empty() {
                self.shared.underflows.fetch_add(1, Ordering::Relaxed);
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
