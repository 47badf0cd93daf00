//! Mixer inputs
//!
//! A `MixerChannel` is an audio provider with a liveness flag. Channels are
//! shared between the mixer thread and whoever controls playback, so every
//! method takes `&self` and `close()` may race an in-flight `read()`.

use mx_audio::{AudioProvider, ReadResult, StreamResult};
use mx_core::{AudioFormat, MixResult, Sample};
use mx_dsp::Filter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The mixer's unit of input
pub trait MixerChannel: Send + Sync {
    fn format(&self) -> AudioFormat;

    /// Samples a `read` can deliver right now
    fn available(&self) -> usize;

    fn read(&self, buffer: &mut [Sample]) -> StreamResult<ReadResult>;

    /// False once the channel has ended or been closed
    fn is_playing(&self) -> bool;

    /// Hard stop; idempotent
    fn close(&self);
}

/// Identity comparison that ignores vtable pointers
#[inline]
pub fn same_channel(a: &Arc<dyn MixerChannel>, b: &Arc<dyn MixerChannel>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER CHANNEL
// ═══════════════════════════════════════════════════════════════════════════════

struct ProviderState {
    provider: Box<dyn AudioProvider>,
    /// Samples pulled while probing for end of stream
    probe: Vec<Sample>,
    probe_len: usize,
}

/// `MixerChannel` over any `AudioProvider`
pub struct ProviderChannel {
    format: AudioFormat,
    state: Mutex<ProviderState>,
    finished: AtomicBool,
    closed: AtomicBool,
}

impl ProviderChannel {
    pub fn new(provider: Box<dyn AudioProvider>) -> Self {
        let format = provider.format();
        Self {
            format,
            state: Mutex::new(ProviderState {
                provider,
                probe: vec![0.0; format.frame_len().max(1)],
                probe_len: 0,
            }),
            finished: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl MixerChannel for ProviderChannel {
    fn format(&self) -> AudioFormat {
        self.format
    }

    /// A provider reporting nothing available is probed with a one-frame
    /// read, so one that has silently reached its end stops holding the
    /// mixer at zero.
    fn available(&self) -> usize {
        if !self.is_playing() {
            return 0;
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let available = state.provider.available();
        if available > 0 || state.probe_len > 0 {
            return available.saturating_add(state.probe_len);
        }

        match state.provider.read(&mut state.probe) {
            Ok(ReadResult::Data(n)) => {
                state.probe_len = n;
                n
            }
            Ok(ReadResult::Empty) => 0,
            Ok(ReadResult::EndOfStream) => {
                self.finish();
                0
            }
            // surfaced by the next read
            Err(_) => 0,
        }
    }

    fn read(&self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        if !self.is_playing() {
            return Ok(ReadResult::EndOfStream);
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut written = 0;
        if state.probe_len > 0 {
            let count = state.probe_len.min(buffer.len());
            buffer[..count].copy_from_slice(&state.probe[..count]);
            state.probe.copy_within(count..state.probe_len, 0);
            state.probe_len -= count;
            written = count;
        }
        if written == buffer.len() {
            return Ok(ReadResult::Data(written));
        }

        match state.provider.read(&mut buffer[written..])? {
            ReadResult::Data(n) => Ok(ReadResult::Data(written + n)),
            ReadResult::Empty if written > 0 => Ok(ReadResult::Data(written)),
            ReadResult::Empty => Ok(ReadResult::Empty),
            ReadResult::EndOfStream => {
                self.finish();
                if written > 0 {
                    Ok(ReadResult::Data(written))
                } else {
                    Ok(ReadResult::EndOfStream)
                }
            }
        }
    }

    fn is_playing(&self) -> bool {
        !self.finished.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    /// Waits out a concurrent read before closing the provider
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.lock().provider.close();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILTERED CHANNEL
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs a mono filter stack per audio channel over another channel's output
pub struct FilteredChannel {
    inner: Arc<dyn MixerChannel>,
    filters: Mutex<Vec<Vec<Box<dyn Filter>>>>,
}

impl FilteredChannel {
    /// `filters[c]` is applied in order to channel `c`
    pub fn new(inner: Arc<dyn MixerChannel>, filters: Vec<Vec<Box<dyn Filter>>>) -> MixResult<Self> {
        let channels = inner.format().frame_len();
        if filters.len() != channels {
            return Err(mx_core::MixError::ChannelCountMismatch {
                expected: channels,
                actual: filters.len(),
            });
        }
        Ok(Self {
            inner,
            filters: Mutex::new(filters),
        })
    }

    pub fn inner(&self) -> &Arc<dyn MixerChannel> {
        &self.inner
    }

    pub fn reset(&self) {
        for stack in self.filters.lock().iter_mut() {
            for filter in stack.iter_mut() {
                filter.reset();
            }
        }
    }
}

impl MixerChannel for FilteredChannel {
    fn format(&self) -> AudioFormat {
        self.inner.format()
    }

    fn available(&self) -> usize {
        self.inner.available()
    }

    fn read(&self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        let result = self.inner.read(buffer)?;
        let count = result.samples();
        if count > 0 {
            let mut filters = self.filters.lock();
            let channels = filters.len();
            for (i, sample) in buffer[..count].iter_mut().enumerate() {
                for filter in filters[i % channels].iter_mut() {
                    *sample = filter.process_sample(*sample);
                }
            }
        }
        Ok(result)
    }

    fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mx_audio::{ConstantProvider, MemoryProvider};
    use mx_dsp::Gain;

    const STEREO: AudioFormat = AudioFormat::float(48000, 2);

    #[test]
    fn test_provider_channel_ends() {
        let channel = ProviderChannel::new(Box::new(MemoryProvider::new(STEREO, vec![0.25; 4])));
        let mut buf = [0.0; 8];

        assert_eq!(channel.read(&mut buf).unwrap(), ReadResult::Data(4));
        assert!(channel.is_playing());
        assert_eq!(channel.read(&mut buf).unwrap(), ReadResult::EndOfStream);
        assert!(!channel.is_playing());
        assert_eq!(channel.available(), 0);
    }

    #[test]
    fn test_available_probe_detects_end() {
        let channel = ProviderChannel::new(Box::new(ConstantProvider::limited(STEREO, 0.5, 0)));
        assert!(channel.is_playing());
        assert_eq!(channel.available(), 0);
        assert!(!channel.is_playing());
    }

    #[test]
    fn test_close_is_idempotent() {
        let channel = ProviderChannel::new(Box::new(ConstantProvider::new(STEREO, 0.5)));
        channel.close();
        channel.close();
        assert!(!channel.is_playing());
        assert!(channel.is_closed());

        let mut buf = [0.0; 2];
        assert_eq!(channel.read(&mut buf).unwrap(), ReadResult::EndOfStream);
    }

    #[test]
    fn test_close_during_reads() {
        let channel = Arc::new(ProviderChannel::new(Box::new(ConstantProvider::new(STEREO, 0.5))));
        let reader = {
            let channel = Arc::clone(&channel);
            std::thread::spawn(move || {
                let mut buf = [0.0; 64];
                while channel.read(&mut buf).map(|r| !r.is_end()).unwrap_or(false) {}
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(2));
        channel.close();
        reader.join().unwrap();
        assert!(!channel.is_playing());
    }

    #[test]
    fn test_filtered_channel_per_channel_filters() {
        let inner: Arc<dyn MixerChannel> =
            Arc::new(ProviderChannel::new(Box::new(ConstantProvider::new(STEREO, 0.5))));
        let left: Vec<Box<dyn Filter>> = vec![Box::new(Gain::new(2.0))];
        let right: Vec<Box<dyn Filter>> = vec![Box::new(Gain::new(0.0))];
        let filtered = FilteredChannel::new(inner, vec![left, right]).unwrap();

        let mut buf = [0.0; 4];
        assert_eq!(filtered.read(&mut buf).unwrap(), ReadResult::Data(4));
        assert_eq!(buf, [1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_filtered_channel_rejects_wrong_stack_count() {
        let inner: Arc<dyn MixerChannel> =
            Arc::new(ProviderChannel::new(Box::new(ConstantProvider::new(STEREO, 0.5))));
        assert!(FilteredChannel::new(inner, vec![vec![]]).is_err());
    }
}
