//! Players: mixer channels with ownership metadata
//!
//! - `AudioPlayer` - plays a provider to the end; `stop()` is a hard stop
//! - `FadingPlayer` - square-root fade in, soft `stop()` that fades out
//!
//! A player's completion fires exactly once, when it is closed. Closing
//! happens on `kill()` or when the mixer drops the player after it stops
//! playing.

use mx_audio::{AudioProvider, ReadResult, StreamResult};
use mx_core::{AudioFormat, Sample};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::{ChannelResult, Completion, CompletionSignal, MixerChannel, ProviderChannel};

/// Whether a player counts against a channel's player limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerClass {
    Blocking,
    NonBlocking,
}

pub trait Player: MixerChannel {
    fn owner(&self) -> &str;

    fn class(&self) -> PlayerClass;

    /// When playback was requested
    fn started(&self) -> Instant;

    fn is_blocking(&self) -> bool {
        self.class() == PlayerClass::Blocking
    }

    /// Soft stop; may keep producing (e.g. a fade) before it ends
    fn stop(&self) -> ChannelResult<()>;

    /// Hard stop
    fn kill(&self) {
        self.close();
    }

    fn completion(&self) -> &Completion;

    fn signal(&self) -> CompletionSignal {
        self.completion().signal()
    }

    fn on_finished(&self, f: Box<dyn FnOnce() + Send>) {
        self.completion().on_complete(f);
    }

    fn as_channel(self: Arc<Self>) -> Arc<dyn MixerChannel>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO PLAYER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AudioPlayer {
    channel: ProviderChannel,
    owner: String,
    class: PlayerClass,
    started: Instant,
    completion: Completion,
}

impl AudioPlayer {
    pub fn new(
        owner: impl Into<String>,
        class: PlayerClass,
        provider: Box<dyn AudioProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel: ProviderChannel::new(provider),
            owner: owner.into(),
            class,
            started: Instant::now(),
            completion: Completion::new(),
        })
    }
}

impl MixerChannel for AudioPlayer {
    fn format(&self) -> AudioFormat {
        self.channel.format()
    }

    fn available(&self) -> usize {
        self.channel.available()
    }

    fn read(&self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        self.channel.read(buffer)
    }

    fn is_playing(&self) -> bool {
        self.channel.is_playing()
    }

    fn close(&self) {
        self.channel.close();
        self.completion.complete();
    }
}

impl Player for AudioPlayer {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn class(&self) -> PlayerClass {
        self.class
    }

    fn started(&self) -> Instant {
        self.started
    }

    fn stop(&self) -> ChannelResult<()> {
        self.kill();
        Ok(())
    }

    fn completion(&self) -> &Completion {
        &self.completion
    }

    fn as_channel(self: Arc<Self>) -> Arc<dyn MixerChannel> {
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FADING PLAYER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct FadeState {
    /// Frames delivered so far
    played: usize,
    /// Frames left in a fade-out, once one has started
    fading_out: Option<usize>,
}

/// Player with square-root fade curves and an adjustable volume
pub struct FadingPlayer {
    channel: ProviderChannel,
    owner: String,
    class: PlayerClass,
    started: Instant,
    completion: Completion,
    fade_in: usize,
    fade_out: usize,
    volume: AtomicU64,
    fade: Mutex<FadeState>,
    faded: AtomicBool,
}

impl FadingPlayer {
    pub fn new(
        owner: impl Into<String>,
        class: PlayerClass,
        provider: Box<dyn AudioProvider>,
        fade_in: Duration,
        fade_out: Duration,
    ) -> Arc<Self> {
        let format = provider.format();
        let frames = |d: Duration| format.samples_for(d) / format.frame_len().max(1);
        Arc::new(Self {
            channel: ProviderChannel::new(provider),
            owner: owner.into(),
            class,
            started: Instant::now(),
            completion: Completion::new(),
            fade_in: frames(fade_in),
            fade_out: frames(fade_out),
            volume: AtomicU64::new(1.0f64.to_bits()),
            fade: Mutex::new(FadeState::default()),
            faded: AtomicBool::new(false),
        })
    }

    pub fn volume(&self) -> f64 {
        f64::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f64) {
        self.volume
            .store(volume.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_fading_out(&self) -> bool {
        self.fade.lock().fading_out.is_some()
    }
}

impl MixerChannel for FadingPlayer {
    fn format(&self) -> AudioFormat {
        self.channel.format()
    }

    fn available(&self) -> usize {
        if self.faded.load(Ordering::Acquire) {
            return 0;
        }
        let available = self.channel.available();
        match self.fade.lock().fading_out {
            Some(frames) => available.min(frames * self.channel.format().frame_len()),
            None => available,
        }
    }

    fn read(&self, buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        if self.faded.load(Ordering::Acquire) {
            return Ok(ReadResult::EndOfStream);
        }
        let result = self.channel.read(buffer)?;
        let ReadResult::Data(count) = result else {
            return Ok(result);
        };

        let channels = self.channel.format().frame_len().max(1);
        let volume = self.volume();
        let mut fade = self.fade.lock();
        let mut delivered = 0;

        for frame in buffer[..count].chunks_mut(channels) {
            let mut gain = volume;
            if fade.played < self.fade_in {
                gain *= (fade.played as f64 / self.fade_in as f64).sqrt();
            }
            if let Some(remaining) = fade.fading_out {
                if remaining == 0 {
                    break;
                }
                gain *= (remaining as f64 / self.fade_out as f64).sqrt();
                fade.fading_out = Some(remaining - 1);
            }
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
            fade.played += 1;
            delivered += frame.len();
        }

        if fade.fading_out == Some(0) {
            // the mixer closes us once it sees we are no longer playing
            self.faded.store(true, Ordering::Release);
        }

        Ok(if delivered > 0 {
            ReadResult::Data(delivered)
        } else {
            ReadResult::EndOfStream
        })
    }

    fn is_playing(&self) -> bool {
        self.channel.is_playing() && !self.faded.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.channel.close();
        self.completion.complete();
    }
}

impl Player for FadingPlayer {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn class(&self) -> PlayerClass {
        self.class
    }

    fn started(&self) -> Instant {
        self.started
    }

    /// Starts the fade-out; players without one stop immediately
    fn stop(&self) -> ChannelResult<()> {
        if self.fade_out == 0 || !self.is_playing() {
            self.kill();
            return Ok(());
        }
        let mut fade = self.fade.lock();
        if fade.fading_out.is_none() {
            fade.fading_out = Some(self.fade_out);
        }
        Ok(())
    }

    fn completion(&self) -> &Completion {
        &self.completion
    }

    fn as_channel(self: Arc<Self>) -> Arc<dyn MixerChannel> {
        self
    }
}
