//! Sample provider contract and the buffered provider

use mx_core::{AudioFormat, Sample, StreamBuffer};

use crate::StreamResult;

/// Outcome of a non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// This many samples were written to the front of the buffer
    Data(usize),
    /// Nothing available right now; try again later
    Empty,
    /// The source has finished and will never produce again
    EndOfStream,
}

impl ReadResult {
    /// Samples delivered (zero for `Empty` and `EndOfStream`)
    #[inline]
    pub fn samples(self) -> usize {
        match self {
            ReadResult::Data(n) => n,
            _ => 0,
        }
    }

    #[inline]
    pub fn is_end(self) -> bool {
        matches!(self, ReadResult::EndOfStream)
    }
}

/// Non-blocking producer of interleaved samples at a fixed format
pub trait AudioProvider: Send {
    fn format(&self) -> AudioFormat;

    /// Samples a `read` can deliver without blocking
    fn available(&self) -> usize;

    /// Fill the front of `buffer`. Must not block.
    fn read(&mut self, buffer: &mut [Sample]) -> StreamResult<ReadResult>;

    /// Release underlying resources. Further reads report end of stream.
    fn close(&mut self) {}
}

impl<P: AudioProvider + ?Sized> AudioProvider for Box<P> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn available(&self) -> usize {
        (**self).available()
    }

    fn read(&mut self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        (**self).read(buffer)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUFFERED PROVIDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Progress reported by `BufferedSource::fill_buffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// Wrote this many samples
    Filled(usize),
    /// Nothing to add right now
    Pending,
    /// The source is exhausted
    EndOfStream,
}

/// Producer side of a `BufferedProvider`.
///
/// `fill_buffer` need not fill the buffer completely but must make progress
/// across repeated calls until it reports `EndOfStream`.
pub trait BufferedSource: Send {
    fn format(&self) -> AudioFormat;

    fn fill_buffer(&mut self, buffer: &mut StreamBuffer) -> StreamResult<FillStatus>;

    fn close(&mut self) {}
}

/// Provider that refills an internal `StreamBuffer` from a `BufferedSource`
pub struct BufferedProvider<S: BufferedSource> {
    source: S,
    buffer: StreamBuffer,
    eof: bool,
    closed: bool,
}

impl<S: BufferedSource> BufferedProvider<S> {
    pub fn new(source: S, buffer: StreamBuffer) -> Self {
        Self {
            source,
            buffer,
            eof: false,
            closed: false,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn buffered(&self) -> usize {
        self.buffer.available_output()
    }

    /// Run one `fill_buffer` step; false when nothing more can be had now
    fn refill(&mut self) -> StreamResult<bool> {
        if self.eof {
            return Ok(false);
        }
        match self.source.fill_buffer(&mut self.buffer)? {
            FillStatus::Filled(n) => Ok(n > 0),
            FillStatus::Pending => Ok(false),
            FillStatus::EndOfStream => {
                self.eof = true;
                Ok(false)
            }
        }
    }
}

impl<S: BufferedSource> AudioProvider for BufferedProvider<S> {
    fn format(&self) -> AudioFormat {
        self.source.format()
    }

    /// The whole buffer until the source ends, since `read` refills on demand
    fn available(&self) -> usize {
        if self.closed {
            0
        } else if self.eof {
            self.buffer.available_output()
        } else {
            self.buffer.capacity()
        }
    }

    fn read(&mut self, out: &mut [Sample]) -> StreamResult<ReadResult> {
        if self.closed {
            return Ok(ReadResult::EndOfStream);
        }

        let mut total = 0;
        while total < out.len() {
            if self.buffer.is_empty() && !self.refill()? {
                break;
            }
            total += self.buffer.read(&mut out[total..]);
        }

        Ok(if total > 0 {
            ReadResult::Data(total)
        } else if self.eof {
            ReadResult::EndOfStream
        } else {
            ReadResult::Empty
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buffer.clear();
            self.source.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    /// Replays a fixed sequence of fill steps
    struct Scripted {
        steps: VecDeque<FillStatus>,
    }

    impl Scripted {
        fn new(steps: &[FillStatus]) -> Self {
            Self {
                steps: steps.iter().copied().collect(),
            }
        }
    }

    impl BufferedSource for Scripted {
        fn format(&self) -> AudioFormat {
            AudioFormat::float(48000, 1)
        }

        fn fill_buffer(&mut self, buffer: &mut StreamBuffer) -> StreamResult<FillStatus> {
            match self.steps.pop_front().unwrap_or(FillStatus::EndOfStream) {
                FillStatus::Filled(n) => Ok(FillStatus::Filled(buffer.write(&vec![0.5; n]))),
                other => Ok(other),
            }
        }
    }

    #[test]
    fn test_pending_is_not_end() {
        let source = Scripted::new(&[
            FillStatus::Pending,
            FillStatus::Filled(3),
            FillStatus::Pending,
            FillStatus::EndOfStream,
        ]);
        let mut provider = BufferedProvider::new(source, StreamBuffer::new(8).unwrap());
        let mut out = [0.0; 8];

        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::Empty);
        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::Data(3));
        assert_eq!(&out[..3], &[0.5, 0.5, 0.5]);
        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::EndOfStream);
        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::EndOfStream);
    }

    #[test]
    fn test_drains_buffer_before_end() {
        let source = Scripted::new(&[FillStatus::Filled(6), FillStatus::EndOfStream]);
        let mut provider = BufferedProvider::new(source, StreamBuffer::new(8).unwrap());
        let mut out = [0.0; 4];

        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::Data(4));
        // end reached while two samples are still buffered
        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::Data(2));
        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::EndOfStream);
    }

    #[test]
    fn test_available_tracks_end() {
        let mut provider =
            BufferedProvider::new(Scripted::new(&[]), StreamBuffer::new(16).unwrap());
        assert_eq!(provider.available(), 16);

        let mut out = [0.0; 4];
        assert!(provider.read(&mut out).unwrap().is_end());
        assert_eq!(provider.available(), 0);
    }

    #[test]
    fn test_close_ends_stream() {
        let source = Scripted::new(&[FillStatus::Filled(4)]);
        let mut provider = BufferedProvider::new(source, StreamBuffer::new(16).unwrap());
        provider.close();
        provider.close();
        let mut out = [0.0; 4];
        assert_eq!(provider.read(&mut out).unwrap(), ReadResult::EndOfStream);
        assert_eq!(provider.available(), 0);
    }
}
