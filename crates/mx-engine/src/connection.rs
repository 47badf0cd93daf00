//! Audio connection: registries plus the scheduling thread
//!
//! One thread per connection. Each pass it stops mixers that have nothing
//! to play, processes the rest, then sleeps to the next `LoopTimer`
//! deadline. With nothing playing it parks on a condition variable until a
//! channel is added or `idle_wait` elapses.
//!
//! A panic inside `process_buffer` is caught; the offending mixer is
//! emptied and the loop continues with the others.

use mx_core::{EngineConfig, MixError, MixResult};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::{
    AudioChannel, AudioEvent, EventSink, LoopTimer, Mixer, PriorityResult, set_realtime_priority,
};

struct Shared {
    id: String,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    mixers: Mutex<Vec<Arc<Mixer>>>,
    channels: Mutex<HashMap<String, Arc<AudioChannel>>>,
    connected: AtomicBool,
    /// Set by `notify`, cleared by the loop
    activity: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn notify(&self) {
        *self.activity.lock() = true;
        self.wake.notify_all();
    }

    fn wait_for_activity(&self, timeout: Duration) {
        let mut activity = self.activity.lock();
        if !*activity {
            self.wake.wait_for(&mut activity, timeout);
        }
        *activity = false;
    }
}

pub struct AudioConnection {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioConnection {
    pub fn new(
        id: impl Into<String>,
        config: EngineConfig,
        events: Arc<dyn EventSink>,
    ) -> MixResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                id: id.into(),
                config,
                events,
                mixers: Mutex::new(Vec::new()),
                channels: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
                activity: Mutex::new(false),
                wake: Condvar::new(),
            }),
            thread: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Spawn the scheduling thread. Returns false if already connected.
    pub fn connect(&self) -> MixResult<bool> {
        let mut thread = self.thread.lock();
        if self.shared.connected.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(format!("mx-loop-{}", self.shared.id))
            .spawn(move || run(shared));
        match handle {
            Ok(handle) => {
                *thread = Some(handle);
                log::info!("Audio connection {} connected", self.shared.id);
                Ok(true)
            }
            Err(e) => {
                self.shared.connected.store(false, Ordering::Release);
                Err(MixError::Io(e.to_string()))
            }
        }
    }

    /// Stop the scheduling thread and every mixer's sinks
    pub fn disconnect(&self) -> bool {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.shared.notify();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                log::error!("Scheduling thread of {} panicked", self.shared.id);
            }
        }
        for mixer in self.mixers() {
            mixer.set_running(false);
        }
        log::info!("Audio connection {} disconnected", self.shared.id);
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MIXERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a mixer from the connection's config and register it
    pub fn create_mixer(&self, id: impl Into<String>) -> MixResult<Arc<Mixer>> {
        let mixer = Arc::new(Mixer::from_engine(
            id,
            &self.shared.config,
            Arc::clone(&self.shared.events),
        )?);
        self.register_mixer(Arc::clone(&mixer))?;
        Ok(mixer)
    }

    /// Ids are unique ignoring ASCII case
    pub fn register_mixer(&self, mixer: Arc<Mixer>) -> MixResult<()> {
        {
            let mut mixers = self.shared.mixers.lock();
            if mixers.iter().any(|m| m.id().eq_ignore_ascii_case(mixer.id())) {
                return Err(MixError::DuplicateMixer(mixer.id().to_string()));
            }
            let shared: Weak<Shared> = Arc::downgrade(&self.shared);
            mixer.set_activity_hook(Some(Arc::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.notify();
                }
            })));
            mixers.push(Arc::clone(&mixer));
        }

        self.shared.events.dispatch(AudioEvent::MixerRegistered {
            mixer: mixer.id().to_string(),
        });
        if mixer.is_playing() {
            self.shared.notify();
        }
        Ok(())
    }

    /// Remove a mixer, dropping its channels and stopping its sinks
    pub fn unregister_mixer(&self, id: &str) -> MixResult<Arc<Mixer>> {
        let mixer = {
            let mut mixers = self.shared.mixers.lock();
            let index = mixers
                .iter()
                .position(|m| m.id().eq_ignore_ascii_case(id))
                .ok_or_else(|| MixError::UnknownMixer(id.to_string()))?;
            mixers.remove(index)
        };

        mixer.set_activity_hook(None);
        mixer.empty();
        mixer.set_running(false);
        self.shared.events.dispatch(AudioEvent::MixerUnregistered {
            mixer: mixer.id().to_string(),
        });
        Ok(mixer)
    }

    pub fn mixer(&self, id: &str) -> Option<Arc<Mixer>> {
        self.shared
            .mixers
            .lock()
            .iter()
            .find(|m| m.id().eq_ignore_ascii_case(id))
            .cloned()
    }

    pub fn mixers(&self) -> Vec<Arc<Mixer>> {
        self.shared.mixers.lock().clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CHANNELS
    // ═══════════════════════════════════════════════════════════════════════

    /// New audio channel over a registered mixer, capped at the configured
    /// `maximumPlayers`
    pub fn create_channel(&self, id: impl Into<String>, mixer: &str) -> MixResult<Arc<AudioChannel>> {
        let mixer = self
            .mixer(mixer)
            .ok_or_else(|| MixError::UnknownMixer(mixer.to_string()))?;
        let channel = AudioChannel::new(
            id,
            mixer,
            self.shared.config.maximum_players,
            Arc::clone(&self.shared.events),
        );
        self.register_channel(Arc::clone(&channel));
        Ok(channel)
    }

    /// Returns the channel this one replaced, if any
    pub fn register_channel(&self, channel: Arc<AudioChannel>) -> Option<Arc<AudioChannel>> {
        channel.set_registered(true);
        let previous = self
            .shared
            .channels
            .lock()
            .insert(channel.id().to_string(), Arc::clone(&channel));
        if let Some(previous) = &previous {
            previous.set_registered(false);
            previous.stop_all();
        }
        self.shared.events.dispatch(AudioEvent::ChannelRegistered {
            channel: channel.id().to_string(),
        });
        previous
    }

    pub fn unregister_channel(&self, id: &str) -> Option<Arc<AudioChannel>> {
        let channel = self.shared.channels.lock().remove(id)?;
        channel.set_registered(false);
        channel.stop_all();
        self.shared.events.dispatch(AudioEvent::ChannelUnregistered {
            channel: id.to_string(),
        });
        Some(channel)
    }

    pub fn channel(&self, id: &str) -> Option<Arc<AudioChannel>> {
        self.shared.channels.lock().get(id).cloned()
    }

    pub fn channels(&self) -> Vec<Arc<AudioChannel>> {
        self.shared.channels.lock().values().cloned().collect()
    }
}

impl Drop for AudioConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCHEDULING LOOP
// ═══════════════════════════════════════════════════════════════════════════════

fn run(shared: Arc<Shared>) {
    if set_realtime_priority() == PriorityResult::Failed {
        log::debug!("Connection {} runs at normal priority", shared.id);
    }

    let idle_wait = shared.config.idle_wait();
    let mut timer = LoopTimer::new(shared.config.loop_interval());

    while shared.connected.load(Ordering::Acquire) {
        let mixers = shared.mixers.lock().clone();

        let mut active = Vec::with_capacity(mixers.len());
        for mixer in mixers {
            if mixer.is_playing() {
                active.push(mixer);
            } else if mixer.is_running() {
                mixer.set_running(false);
            }
        }

        if active.is_empty() {
            shared.wait_for_activity(idle_wait);
            timer.reset(Instant::now());
            continue;
        }

        for mixer in &active {
            if !mixer.is_running() {
                mixer.set_running(true);
            }
            let result = catch_unwind(AssertUnwindSafe(|| mixer.process_buffer()));
            if let Err(panic) = result {
                log::error!(
                    "Mixer {} faulted, dropping its channels: {}",
                    mixer.id(),
                    panic_message(panic.as_ref())
                );
                mixer.empty();
            }
        }

        timer.advance(Instant::now());
        timer.wait();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
