//! One provider, many readers
//!
//! `SharedProvider` pulls fixed-size chunks from a single source and hands
//! each chunk to every open `SharedPipe`. The next chunk is pulled only once
//! all open pipes have consumed the current one, so the fastest reader waits
//! for the slowest instead of skipping audio.

use mx_core::{AudioFormat, Sample};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::{AudioProvider, ReadResult, StreamResult};

struct PipeCursor {
    id: u64,
    offset: usize,
    underflows: u64,
}

struct SharedState {
    source: Box<dyn AudioProvider>,
    chunk: Vec<Sample>,
    chunk_len: usize,
    cursors: Vec<PipeCursor>,
    next_id: u64,
    eof: bool,
}

impl SharedState {
    fn cursor_mut(&mut self, id: u64) -> Option<&mut PipeCursor> {
        self.cursors.iter_mut().find(|c| c.id == id)
    }

    fn all_consumed(&self) -> bool {
        self.cursors.iter().all(|c| c.offset >= self.chunk_len)
    }

    /// Pull the next chunk once every pipe is done with the current one
    fn advance(&mut self) -> StreamResult<()> {
        if self.eof || !self.all_consumed() {
            return Ok(());
        }
        let chunk_size = self.chunk.len();
        match self.source.read(&mut self.chunk[..chunk_size])? {
            ReadResult::Data(n) => {
                self.chunk_len = n;
                for cursor in &mut self.cursors {
                    cursor.offset = 0;
                }
            }
            ReadResult::Empty => {}
            ReadResult::EndOfStream => self.eof = true,
        }
        Ok(())
    }
}

/// Fan-out wrapper around a provider
#[derive(Clone)]
pub struct SharedProvider {
    format: AudioFormat,
    state: Arc<Mutex<SharedState>>,
}

impl SharedProvider {
    /// Share `source`, pulling `chunk_size` samples at a time
    pub fn new(source: Box<dyn AudioProvider>, chunk_size: usize) -> Self {
        let frame = source.format().frame_len().max(1);
        let chunk_size = chunk_size.max(frame) / frame * frame;
        Self {
            format: source.format(),
            state: Arc::new(Mutex::new(SharedState {
                source,
                chunk: vec![0.0; chunk_size],
                chunk_len: 0,
                cursors: Vec::new(),
                next_id: 0,
                eof: false,
            })),
        }
    }

    /// Open a new reader positioned at the next chunk
    pub fn open(&self) -> SharedPipe {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let offset = state.chunk_len;
        state.cursors.push(PipeCursor {
            id,
            offset,
            underflows: 0,
        });
        SharedPipe {
            id,
            format: self.format,
            state: Arc::clone(&self.state),
            closed: false,
        }
    }

    pub fn readers(&self) -> usize {
        self.state.lock().cursors.len()
    }
}

/// A reader of a `SharedProvider`
pub struct SharedPipe {
    id: u64,
    format: AudioFormat,
    state: Arc<Mutex<SharedState>>,
    closed: bool,
}

impl SharedPipe {
    /// Reads that found nothing because other pipes were behind
    pub fn underflows(&self) -> u64 {
        let state = self.state.lock();
        state
            .cursors
            .iter()
            .find(|c| c.id == self.id)
            .map_or(0, |c| c.underflows)
    }
}

impl AudioProvider for SharedPipe {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn available(&self) -> usize {
        if self.closed {
            return 0;
        }
        let state = self.state.lock();
        match state.cursors.iter().find(|c| c.id == self.id) {
            Some(cursor) if cursor.offset < state.chunk_len => state.chunk_len - cursor.offset,
            Some(_) if !state.eof && state.all_consumed() => state.chunk.len(),
            _ => 0,
        }
    }

    fn read(&mut self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        if self.closed {
            return Ok(ReadResult::EndOfStream);
        }

        let mut state = self.state.lock();
        let chunk_len = state.chunk_len;
        let offset = state.cursor_mut(self.id).map_or(chunk_len, |c| c.offset);
        if offset >= chunk_len {
            state.advance()?;
        }

        let chunk_len = state.chunk_len;
        let eof = state.eof;
        let SharedState { chunk, cursors, .. } = &mut *state;
        let Some(cursor) = cursors.iter_mut().find(|c| c.id == self.id) else {
            return Ok(ReadResult::EndOfStream);
        };

        if cursor.offset >= chunk_len {
            if eof {
                return Ok(ReadResult::EndOfStream);
            }
            if !buffer.is_empty() {
                cursor.underflows += 1;
            }
            return Ok(ReadResult::Empty);
        }

        let count = buffer.len().min(chunk_len - cursor.offset);
        buffer[..count].copy_from_slice(&chunk[cursor.offset..cursor.offset + count]);
        cursor.offset += count;
        Ok(ReadResult::Data(count))
    }

    /// Detach; the remaining pipes stop waiting on this one
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().cursors.retain(|c| c.id != self.id);
        }
    }
}

impl Drop for SharedPipe {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryProvider;

    fn shared(samples: Vec<Sample>, chunk: usize) -> SharedProvider {
        let provider = MemoryProvider::new(AudioFormat::float(48000, 1), samples);
        SharedProvider::new(Box::new(provider), chunk)
    }

    #[test]
    fn test_every_pipe_sees_every_chunk() {
        let shared = shared((0..8).map(|i| i as Sample).collect(), 4);
        let mut a = shared.open();
        let mut b = shared.open();
        let mut out = [0.0; 4];

        assert_eq!(a.read(&mut out).unwrap(), ReadResult::Data(4));
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0]);
        // a is ahead: it waits for b
        assert_eq!(a.read(&mut out).unwrap(), ReadResult::Empty);
        assert_eq!(a.underflows(), 1);

        assert_eq!(b.read(&mut out).unwrap(), ReadResult::Data(4));
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0]);

        assert_eq!(b.read(&mut out).unwrap(), ReadResult::Data(4));
        assert_eq!(out, [4.0, 5.0, 6.0, 7.0]);
        assert_eq!(a.read(&mut out).unwrap(), ReadResult::Data(4));
        assert_eq!(out, [4.0, 5.0, 6.0, 7.0]);

        assert!(a.read(&mut out).unwrap().is_end());
        assert!(b.read(&mut out).unwrap().is_end());
    }

    #[test]
    fn test_closed_pipe_stops_blocking() {
        let shared = shared(vec![0.5; 8], 4);
        let mut a = shared.open();
        let b = shared.open();
        let mut out = [0.0; 4];

        assert_eq!(a.read(&mut out).unwrap(), ReadResult::Data(4));
        assert_eq!(a.read(&mut out).unwrap(), ReadResult::Empty);

        drop(b);
        assert_eq!(shared.readers(), 1);
        assert_eq!(a.read(&mut out).unwrap(), ReadResult::Data(4));
    }
}
