//! Output line backed by the system's default cpal device
//!
//! The cpal stream is not `Send` on every host, so it lives on a dedicated
//! thread. Bytes travel to the audio callback through a lock-free rtrb ring
//! and are decoded back to floats there. Transport commands reach the stream
//! thread over a crossbeam channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use mx_core::AudioFormat;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use super::OutputLine;
use crate::{SinkError, SinkResult};

enum Command {
    Play,
    Pause,
    Close,
}

struct Running {
    producer: Producer<u8>,
    commands: Sender<Command>,
    flush: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// `OutputLine` writing to the default output device
#[derive(Default)]
pub struct CpalLine {
    running: Option<Running>,
}

impl CpalLine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputLine for CpalLine {
    fn open(&mut self, format: AudioFormat, buffer_bytes: usize) -> SinkResult<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let (producer, consumer) = RingBuffer::<u8>::new(buffer_bytes.max(1));
        let (commands, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let flush = Arc::new(AtomicBool::new(false));
        let callback_flush = Arc::clone(&flush);

        let thread = std::thread::Builder::new()
            .name("mx-cpal-output".into())
            .spawn(move || stream_thread(format, consumer, callback_flush, command_rx, ready_tx))
            .map_err(|e| SinkError::OpenFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(SinkError::OpenFailed("output thread exited".into()));
            }
        }

        self.running = Some(Running {
            producer,
            commands,
            flush,
            thread: Some(thread),
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }

    fn start(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.commands.send(Command::Play);
        }
    }

    fn stop(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.commands.send(Command::Pause);
        }
    }

    fn flush(&mut self) {
        if let Some(running) = &self.running {
            running.flush.store(true, Ordering::Release);
        }
    }

    fn close(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.commands.send(Command::Close);
            if let Some(thread) = running.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn available(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.producer.slots())
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let Some(running) = self.running.as_mut() else {
            return 0;
        };
        let count = bytes.len().min(running.producer.slots());
        match running.producer.write_chunk_uninit(count) {
            Ok(chunk) => chunk.fill_from_iter(bytes[..count].iter().copied()),
            Err(_) => 0,
        }
    }
}

impl Drop for CpalLine {
    fn drop(&mut self) {
        self.close();
    }
}

fn stream_thread(
    format: AudioFormat,
    mut consumer: Consumer<u8>,
    flush: Arc<AtomicBool>,
    commands: Receiver<Command>,
    ready: Sender<SinkResult<()>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(SinkError::OpenFailed("no output device".into())));
        return;
    };

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let width = format.bytes_per_sample();
    let full_scale = ((1i64 << (format.bits - 1)) - 1) as f32;
    let shift = 32 - format.bits as u32;

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if flush.swap(false, Ordering::AcqRel) {
                let queued = consumer.slots();
                if let Ok(chunk) = consumer.read_chunk(queued) {
                    chunk.commit_all();
                }
            }

            for sample in data.iter_mut() {
                *sample = match consumer.read_chunk(width) {
                    Ok(chunk) => {
                        let (first, second) = chunk.as_slices();
                        let mut raw = [0u8; 4];
                        let offset = 4 - width;
                        raw[offset..offset + first.len()].copy_from_slice(first);
                        raw[offset + first.len()..].copy_from_slice(second);
                        chunk.commit_all();
                        (i32::from_le_bytes(raw) >> shift) as f32 / full_scale
                    }
                    Err(_) => 0.0,
                };
            }
        },
        move |err| {
            log::error!("Audio output stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(SinkError::OpenFailed(e.to_string())));
            return;
        }
    };

    if matches!(
        device.default_output_config().map(|c| c.sample_format()),
        Ok(f) if f != SampleFormat::F32
    ) {
        log::debug!("Default output is not f32; relying on host conversion");
    }

    let _ = ready.send(Ok(()));

    for command in commands.iter() {
        match command {
            Command::Play => {
                if let Err(e) = stream.play() {
                    log::warn!("Failed to start output stream: {}", e);
                }
            }
            Command::Pause => {
                if let Err(e) = stream.pause() {
                    log::warn!("Failed to pause output stream: {}", e);
                }
            }
            Command::Close => break,
        }
    }
}
