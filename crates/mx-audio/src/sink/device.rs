//! Device-backed sink
//!
//! Float samples are converted to the device's signed little-endian width
//! (8/16/24/32 bit) and written to an `OutputLine`, a byte-level view of an
//! output device. Occupancy of the line's buffer drives the underflow and
//! overflow counters.

use mx_core::{AudioFormat, MixResult, Sample};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{MixerSink, SinkCounters, SinkStats, check_write};
use crate::{SinkError, SinkResult};

// ═══════════════════════════════════════════════════════════════════════════════
// PCM CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Append `samples` as signed little-endian integers of `bits` width
pub fn encode_pcm(samples: &[Sample], bits: u16, out: &mut Vec<u8>) -> SinkResult<()> {
    let bytes = match bits {
        8 | 16 | 24 | 32 => (bits / 8) as usize,
        _ => return Err(SinkError::UnsupportedBits(bits)),
    };
    let full_scale = ((1i64 << (bits - 1)) - 1) as f64;

    out.reserve(samples.len() * bytes);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * full_scale).round() as i32;
        out.extend_from_slice(&value.to_le_bytes()[..bytes]);
    }
    Ok(())
}

/// Inverse of `encode_pcm`; trailing partial samples are ignored
pub fn decode_pcm(bytes: &[u8], bits: u16, out: &mut Vec<Sample>) -> SinkResult<()> {
    let width = match bits {
        8 | 16 | 24 | 32 => (bits / 8) as usize,
        _ => return Err(SinkError::UnsupportedBits(bits)),
    };
    let full_scale = ((1i64 << (bits - 1)) - 1) as f64;
    let shift = 32 - bits as u32;

    for chunk in bytes.chunks_exact(width) {
        let mut raw = [0u8; 4];
        raw[4 - width..].copy_from_slice(chunk);
        // sign-extend from the top of the word
        let value = i32::from_le_bytes(raw) >> shift;
        out.push(value as f64 / full_scale);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT LINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Byte-level output device
pub trait OutputLine: Send {
    /// Acquire the device with room for `buffer_bytes`
    fn open(&mut self, format: AudioFormat, buffer_bytes: usize) -> SinkResult<()>;

    fn is_open(&self) -> bool;

    fn start(&mut self);

    fn stop(&mut self);

    /// Discard queued bytes
    fn flush(&mut self);

    fn close(&mut self);

    /// Bytes writable without blocking
    fn available(&self) -> usize;

    /// Write up to `bytes.len()`; returns the count accepted
    fn write(&mut self, bytes: &[u8]) -> usize;
}

/// In-memory line: a bounded byte queue drained through a `MemoryTap`
pub struct MemoryLine {
    shared: Arc<Mutex<MemoryLineState>>,
    fail_open: bool,
}

#[derive(Default)]
struct MemoryLineState {
    queue: VecDeque<u8>,
    capacity: usize,
    open: bool,
    started: bool,
}

/// Consumer side of a `MemoryLine`, standing in for the device clock
#[derive(Clone)]
pub struct MemoryTap {
    shared: Arc<Mutex<MemoryLineState>>,
}

impl MemoryLine {
    pub fn new() -> (Self, MemoryTap) {
        let shared = Arc::new(Mutex::new(MemoryLineState::default()));
        (
            Self {
                shared: Arc::clone(&shared),
                fail_open: false,
            },
            MemoryTap { shared },
        )
    }

    /// A line whose `open` always fails, for exercising degraded paths
    pub fn unavailable() -> Self {
        Self {
            shared: Arc::new(Mutex::new(MemoryLineState::default())),
            fail_open: true,
        }
    }
}

impl MemoryTap {
    /// Take up to `max` queued bytes
    pub fn drain(&self, max: usize) -> Vec<u8> {
        let mut state = self.shared.lock();
        let count = max.min(state.queue.len());
        state.queue.drain(..count).collect()
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_started(&self) -> bool {
        self.shared.lock().started
    }
}

impl OutputLine for MemoryLine {
    fn open(&mut self, _format: AudioFormat, buffer_bytes: usize) -> SinkResult<()> {
        if self.fail_open {
            return Err(SinkError::OpenFailed("memory line unavailable".into()));
        }
        let mut state = self.shared.lock();
        state.capacity = buffer_bytes;
        state.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    fn start(&mut self) {
        self.shared.lock().started = true;
    }

    fn stop(&mut self) {
        self.shared.lock().started = false;
    }

    fn flush(&mut self) {
        self.shared.lock().queue.clear();
    }

    fn close(&mut self) {
        let mut state = self.shared.lock();
        state.open = false;
        state.started = false;
        state.queue.clear();
    }

    fn available(&self) -> usize {
        let state = self.shared.lock();
        if state.open {
            state.capacity.saturating_sub(state.queue.len())
        } else {
            0
        }
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut state = self.shared.lock();
        if !state.open {
            return 0;
        }
        let count = bytes.len().min(state.capacity.saturating_sub(state.queue.len()));
        state.queue.extend(&bytes[..count]);
        count
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEVICE SINK
// ═══════════════════════════════════════════════════════════════════════════════

struct DeviceState {
    line: Box<dyn OutputLine>,
    scratch: Vec<u8>,
}

pub struct DeviceSink {
    /// Device format; `bits` is the line's sample width
    format: AudioFormat,
    buffer_size: usize,
    state: Mutex<DeviceState>,
    counters: SinkCounters,
}

impl DeviceSink {
    /// `buffer_size` is in interleaved samples
    pub fn new(format: AudioFormat, buffer_size: usize, line: Box<dyn OutputLine>) -> MixResult<Self> {
        format.validate()?;
        if !matches!(format.bits, 8 | 16 | 24 | 32) {
            return Err(mx_core::MixError::InvalidFormat(format!(
                "device width must be 8, 16, 24 or 32 bits, got {}",
                format.bits
            )));
        }
        if buffer_size == 0 || buffer_size % format.frame_len() != 0 {
            return Err(mx_core::MixError::InvalidCapacity(buffer_size));
        }
        Ok(Self {
            format,
            buffer_size,
            state: Mutex::new(DeviceState {
                line,
                scratch: Vec::with_capacity(buffer_size * format.bytes_per_sample()),
            }),
            counters: SinkCounters::default(),
        })
    }

    fn line_available(&self, state: &DeviceState) -> usize {
        (state.line.available() / self.format.bytes_per_sample()).min(self.buffer_size)
    }
}

impl MixerSink for DeviceSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn available_input(&self) -> usize {
        if !self.counters.is_running() {
            return 0;
        }
        let state = self.state.lock();
        self.line_available(&state)
    }

    fn write(&self, samples: &[Sample]) -> SinkResult<()> {
        let mut guard = self.state.lock();
        let available = if self.counters.is_running() {
            self.line_available(&guard)
        } else {
            0
        };
        check_write(&self.counters, &self.format, samples.len(), available)?;
        if samples.is_empty() {
            return Ok(());
        }

        // a completely drained device buffer means we fell behind it
        if available >= self.buffer_size {
            self.counters.underflow();
        } else if available == 0 {
            self.counters.overflow();
        }

        let state = &mut *guard;
        state.scratch.clear();
        encode_pcm(samples, self.format.bits, &mut state.scratch)?;
        let written = state.line.write(&state.scratch);
        if written < state.scratch.len() {
            self.counters.overflow();
        }

        self.counters.advance(samples.len());
        Ok(())
    }

    /// Opens the line on first start. A line that fails to open is logged
    /// and the sink stays stopped.
    fn start(&self) -> bool {
        if self.counters.is_running() {
            return false;
        }

        let mut state = self.state.lock();
        if !state.line.is_open() {
            let bytes = self.buffer_size * self.format.bytes_per_sample();
            if let Err(e) = state.line.open(self.format, bytes) {
                log::warn!("Device sink unavailable, continuing without it: {}", e);
                return false;
            }
        }
        state.line.start();
        self.counters.transition(true)
    }

    fn stop(&self) -> bool {
        if !self.counters.transition(false) {
            return false;
        }
        let mut state = self.state.lock();
        state.line.stop();
        state.line.flush();
        true
    }

    fn is_running(&self) -> bool {
        self.counters.is_running()
    }

    fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.state.get_mut().line.close();
    }
}
