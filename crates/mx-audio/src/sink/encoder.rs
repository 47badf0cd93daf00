//! Streaming-encoder sink
//!
//! Samples are gathered into fixed-size codec frames on the mixer thread.
//! Encoded frames go into a queue that a transport drains at its own pace
//! through `provide()`. Capacity is returned to the mixer only when the
//! transport takes a frame, so the two cadences stay decoupled without
//! letting the queue grow unbounded.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use mx_core::{AudioFormat, MixError, MixResult, Sample};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{MixerSink, SinkCounters, SinkStats, check_write};
use crate::SinkResult;

/// Black-box frame codec
pub trait FrameEncoder: Send {
    /// Encode exactly one frame of interleaved samples
    fn encode(&mut self, frame: &[Sample]) -> SinkResult<Vec<u8>>;

    /// Drop codec state before a new run
    fn reset(&mut self) -> SinkResult<()> {
        Ok(())
    }
}

/// Little-endian signed 16-bit PCM, one packet per frame
#[derive(Debug, Default, Clone, Copy)]
pub struct Pcm16Encoder;

impl FrameEncoder for Pcm16Encoder {
    fn encode(&mut self, frame: &[Sample]) -> SinkResult<Vec<u8>> {
        let mut out = Vec::with_capacity(frame.len() * 2);
        for &sample in frame {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f64).round() as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
        Ok(out)
    }
}

/// One encoded packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    /// Interleaved samples the packet represents
    pub samples: usize,
}

impl EncodedFrame {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encoder-side statistics beyond `SinkStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub packets_encoded: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Samples encoded
    pub encoder_position: u64,
    /// Samples handed to the transport
    pub network_position: u64,
}

struct EncoderState {
    encoder: Box<dyn FrameEncoder>,
    pending: Vec<Sample>,
    available: usize,
    last_provide: Option<Instant>,
}

pub struct EncoderSink {
    format: AudioFormat,
    frame_size: usize,
    frame_duration: Duration,
    buffer_size: usize,
    state: Mutex<EncoderState>,
    opening: AtomicBool,
    counters: SinkCounters,
    packets_encoded: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    encoder_position: AtomicU64,
    network_position: AtomicU64,
    tx: Sender<EncodedFrame>,
    rx: Receiver<EncodedFrame>,
}

impl EncoderSink {
    /// `frame_duration` of audio per packet, `buffer_size` samples of
    /// encoded audio allowed in flight
    pub fn new(
        format: AudioFormat,
        frame_duration: Duration,
        buffer_size: usize,
        encoder: Box<dyn FrameEncoder>,
    ) -> MixResult<Self> {
        format.validate()?;
        let frame_size = format.samples_for(frame_duration);
        if frame_size == 0 {
            return Err(MixError::InvalidFormat(format!(
                "frame duration {:?} is shorter than one frame",
                frame_duration
            )));
        }
        if buffer_size < frame_size {
            return Err(MixError::InvalidCapacity(buffer_size));
        }

        let (tx, rx) = unbounded();
        Ok(Self {
            format,
            frame_size,
            frame_duration,
            buffer_size,
            state: Mutex::new(EncoderState {
                encoder,
                pending: Vec::with_capacity(frame_size * 2),
                available: 0,
                last_provide: None,
            }),
            opening: AtomicBool::new(false),
            counters: SinkCounters::default(),
            packets_encoded: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            encoder_position: AtomicU64::new(0),
            network_position: AtomicU64::new(0),
            tx,
            rx,
        })
    }

    /// Interleaved samples per packet
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Packets waiting for the transport
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// True when the transport should poll: running past the opening phase,
    /// or packets are still queued
    pub fn is_ready(&self) -> bool {
        (self.counters.is_running() && !self.opening.load(Ordering::Acquire)) || !self.rx.is_empty()
    }

    /// Take the next packet for sending.
    ///
    /// When nothing is queued an empty frame is returned and an underflow is
    /// counted.
    pub fn provide(&self) -> EncodedFrame {
        let frame = match self.rx.try_recv() {
            Ok(frame) => frame,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.counters.underflow();
                return EncodedFrame::default();
            }
        };

        self.opening.store(false, Ordering::Release);
        {
            let mut state = self.state.lock();
            state.available = (state.available + frame.samples).min(self.buffer_size);
            state.last_provide = Some(Instant::now());
        }
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);
        self.network_position
            .fetch_add(frame.samples as u64, Ordering::Relaxed);
        frame
    }

    /// When the transport last took a packet
    pub fn last_provide(&self) -> Option<Instant> {
        self.state.lock().last_provide
    }

    pub fn encoder_stats(&self) -> EncoderStats {
        EncoderStats {
            packets_encoded: self.packets_encoded.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            encoder_position: self.encoder_position.load(Ordering::Relaxed),
            network_position: self.network_position.load(Ordering::Relaxed),
        }
    }

    fn encode_pending(&self, state: &mut EncoderState) -> SinkResult<()> {
        let mut result = Ok(());
        while state.pending.len() >= self.frame_size {
            let encoded = state.encoder.encode(&state.pending[..self.frame_size]);
            state.pending.drain(..self.frame_size);
            match encoded {
                Ok(data) => self.queue(data),
                Err(e) => {
                    // a dropped frame never returns its capacity through provide()
                    state.available = (state.available + self.frame_size).min(self.buffer_size);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    fn queue(&self, data: Vec<u8>) {
        // the receiver lives in self, so send cannot fail
        let _ = self.tx.send(EncodedFrame {
            data,
            samples: self.frame_size,
        });
        self.packets_encoded.fetch_add(1, Ordering::Relaxed);
        self.encoder_position
            .fetch_add(self.frame_size as u64, Ordering::Relaxed);
    }
}

impl MixerSink for EncoderSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn available_input(&self) -> usize {
        if self.counters.is_running() {
            self.state.lock().available
        } else {
            0
        }
    }

    fn write(&self, samples: &[Sample]) -> SinkResult<()> {
        let mut state = self.state.lock();
        check_write(&self.counters, &self.format, samples.len(), state.available)?;
        if samples.is_empty() {
            return Ok(());
        }

        state.pending.extend_from_slice(samples);
        state.available -= samples.len();
        self.counters.advance(samples.len());
        self.encode_pending(&mut state)
    }

    fn start(&self) -> bool {
        if self.counters.is_running() {
            return false;
        }

        let mut state = self.state.lock();
        if let Err(e) = state.encoder.reset() {
            log::warn!("Encoder sink failed to open: {}", e);
            return false;
        }
        state.pending.clear();
        state.available = self.buffer_size;
        state.last_provide = None;
        while self.rx.try_recv().is_ok() {}

        self.opening.store(true, Ordering::Release);
        self.counters.transition(true)
    }

    /// Flushes a final zero-padded frame so no written audio is lost
    fn stop(&self) -> bool {
        if !self.counters.transition(false) {
            return false;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.pending.is_empty() {
            let frame_size = self.frame_size;
            state.pending.resize(frame_size, 0.0);
            match state.encoder.encode(&state.pending[..frame_size]) {
                Ok(data) => self.queue(data),
                Err(e) => log::warn!("Encoder sink dropped final frame: {}", e),
            }
            state.pending.clear();
        }
        true
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

    fn sink() -> EncoderSink {
        // 10ms stereo frames at 48kHz = 960 samples, room for 4 frames
        EncoderSink::new(
            AudioFormat::float(48000, 2),
            Duration::from_millis(10),
            960 * 4,
            Box::new(Pcm16Encoder),
        )
        .unwrap()
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(sink().frame_size(), 960);
    }

    #[test]
    fn test_encodes_whole_frames() {
        let sink = sink();
        assert!(sink.start());
        assert!(!sink.is_ready(), "opening until the first packet is sent");
        assert!(sink.last_provide().is_none());

        sink.write(&vec![0.5; 1500]).unwrap();
        assert_eq!(sink.queued(), 1);
        assert_eq!(sink.available_input(), 960 * 4 - 1500);
        assert!(sink.is_ready());

        let frame = sink.provide();
        assert_eq!(frame.samples, 960);
        assert_eq!(frame.data.len(), 960 * 2);
        assert_eq!(sink.available_input(), 960 * 4 - 1500 + 960);

        let stats = sink.encoder_stats();
        assert_eq!(stats.packets_encoded, 1);
        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.network_position, 960);
        assert!(sink.last_provide().is_some());
    }

    #[test]
    fn test_provide_without_packet_underflows() {
        let sink = sink();
        sink.start();
        assert!(sink.provide().is_empty());
        assert_eq!(sink.underflows(), 1);
    }

    #[test]
    fn test_stop_flushes_padded_frame() {
        let sink = sink();
        sink.start();
        sink.write(&vec![0.25; 100]).unwrap();
        assert_eq!(sink.queued(), 0);

        assert!(sink.stop());
        assert!(!sink.stop());
        assert_eq!(sink.queued(), 1);
        // stopped but a packet is still queued
        assert!(sink.is_ready());
        assert_eq!(sink.provide().samples, 960);
        assert!(!sink.is_ready());
    }

    #[test]
    fn test_write_over_available_rejected() {
        let sink = sink();
        sink.start();
        assert!(matches!(
            sink.write(&vec![0.0; 960 * 5]),
            Err(SinkError::Overrun { .. })
        ));
    }

    /// Codec that rejects every frame
    struct Broken;

    impl FrameEncoder for Broken {
        fn encode(&mut self, _frame: &[Sample]) -> SinkResult<Vec<u8>> {
            Err(SinkError::Encode("codec rejected frame".into()))
        }
    }

    #[test]
    fn test_failed_frames_release_capacity() {
        let sink = EncoderSink::new(
            AudioFormat::float(48000, 2),
            Duration::from_millis(10),
            960 * 4,
            Box::new(Broken),
        )
        .unwrap();
        sink.start();

        for _ in 0..8 {
            assert!(matches!(
                sink.write(&vec![0.1; 960]),
                Err(SinkError::Encode(_))
            ));
        }
        assert_eq!(sink.available_input(), 960 * 4);
        assert_eq!(sink.queued(), 0);
        assert_eq!(sink.position(), 960 * 8);
    }

    #[test]
    fn test_pcm16_encoding() {
        let mut encoder = Pcm16Encoder;
        let bytes = encoder.encode(&[1.0, -1.0, 0.0, 2.0]).unwrap();
        assert_eq!(
            bytes,
            [
                i16::MAX.to_le_bytes(),
                (-i16::MAX).to_le_bytes(),
                0i16.to_le_bytes(),
                i16::MAX.to_le_bytes()
            ]
            .concat()
        );
    }
}
