//! In-memory sources

use mx_core::{AudioFormat, Sample};

use crate::{AudioProvider, ReadResult, StreamResult};

/// Finite PCM held in memory
pub struct MemoryProvider {
    format: AudioFormat,
    samples: Vec<Sample>,
    position: usize,
    closed: bool,
}

impl MemoryProvider {
    pub fn new(format: AudioFormat, samples: Vec<Sample>) -> Self {
        Self {
            format,
            samples,
            position: 0,
            closed: false,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl AudioProvider for MemoryProvider {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn available(&self) -> usize {
        if self.closed {
            0
        } else {
            self.samples.len() - self.position
        }
    }

    fn read(&mut self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        let count = buffer.len().min(self.available());
        if count == 0 {
            return Ok(if self.available() == 0 {
                ReadResult::EndOfStream
            } else {
                ReadResult::Empty
            });
        }
        buffer[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(ReadResult::Data(count))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Constant-value signal, endless or limited to a sample count
pub struct ConstantProvider {
    format: AudioFormat,
    value: Sample,
    remaining: Option<usize>,
    closed: bool,
}

impl ConstantProvider {
    /// Endless
    pub fn new(format: AudioFormat, value: Sample) -> Self {
        Self {
            format,
            value,
            remaining: None,
            closed: false,
        }
    }

    /// Ends after `samples` interleaved samples
    pub fn limited(format: AudioFormat, value: Sample, samples: usize) -> Self {
        Self {
            remaining: Some(samples),
            ..Self::new(format, value)
        }
    }
}

impl AudioProvider for ConstantProvider {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn available(&self) -> usize {
        match (self.closed, self.remaining) {
            (true, _) => 0,
            (false, Some(n)) => n,
            (false, None) => usize::MAX,
        }
    }

    fn read(&mut self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        let count = buffer.len().min(self.available());
        if count == 0 {
            return Ok(if self.available() == 0 {
                ReadResult::EndOfStream
            } else {
                ReadResult::Empty
            });
        }
        buffer[..count].fill(self.value);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= count;
        }
        Ok(ReadResult::Data(count))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
