//! Mixer: sums channels, runs the filter chain, feeds sinks
//!
//! Membership (channels, sinks, running flag) lives under one lock so that
//! "became empty" and "stopped sinks" are observed together. Sample
//! buffers and the filter chain sit under a second lock, always taken
//! after the first. Completions, channel closes and events fire with
//! neither lock held.

use mx_audio::{MixerSink, ReadResult};
use mx_core::{AudioFormat, EngineConfig, MixError, MixResult, Sample};
use mx_dsp::{FilterChain, MultiChannelFilter, default_chain};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::{AudioEvent, Completion, EventSink, MixerChannel, same_channel};

/// Called when a channel joins, so an idle scheduler can wake up
pub type ActivityHook = Arc<dyn Fn() + Send + Sync>;

/// Construction parameters for a `Mixer`
#[derive(Debug, Clone, PartialEq)]
pub struct MixerConfig {
    pub id: String,
    pub format: AudioFormat,
    /// Audio produced per tick at most
    pub buffer_time: Duration,
}

impl MixerConfig {
    pub fn new(id: impl Into<String>, format: AudioFormat, buffer_time: Duration) -> Self {
        Self {
            id: id.into(),
            format,
            buffer_time,
        }
    }

    pub fn from_engine(id: impl Into<String>, config: &EngineConfig) -> Self {
        Self::new(id, config.format(), config.buffer_time())
    }

    /// Interleaved samples per tick
    pub fn buffer_size(&self) -> usize {
        self.format.samples_for(self.buffer_time)
    }

    pub fn validate(&self) -> MixResult<()> {
        self.format.validate()?;
        if self.id.trim().is_empty() {
            return Err(MixError::InvalidFormat("mixer id must not be empty".into()));
        }
        if self.buffer_size() == 0 {
            return Err(MixError::InvalidCapacity(0));
        }
        Ok(())
    }
}

struct Entry {
    channel: Arc<dyn MixerChannel>,
    completion: Arc<Completion>,
}

/// Index-stable slots plus a free list
#[derive(Default)]
struct Membership {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    count: usize,
    sinks: Vec<Arc<dyn MixerSink>>,
    running: bool,
}

impl Membership {
    fn insert(&mut self, entry: Entry) {
        match self.free.pop() {
            Some(index) => self.slots[index] = Some(entry),
            None => self.slots.push(Some(entry)),
        }
        self.count += 1;
    }

    fn take_where<F>(&mut self, mut pred: F) -> Vec<Entry>
    where
        F: FnMut(&Entry) -> bool,
    {
        let mut taken = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(&mut pred) {
                if let Some(entry) = slot.take() {
                    taken.push(entry);
                    self.free.push(index);
                }
            }
        }
        self.count -= taken.len();
        taken
    }

    fn channels(&self) -> impl Iterator<Item = &Arc<dyn MixerChannel>> {
        self.slots.iter().flatten().map(|e| &e.channel)
    }
}

struct DspState {
    mix: Vec<Sample>,
    scratch: Vec<Sample>,
    planar: Vec<Vec<Sample>>,
    chain: FilterChain,
}

pub struct Mixer {
    id: String,
    format: AudioFormat,
    buffer_size: usize,
    membership: Mutex<Membership>,
    dsp: Mutex<DspState>,
    filtering: AtomicBool,
    /// Samples produced since construction
    position: AtomicU64,
    events: Arc<dyn EventSink>,
    activity: Mutex<Option<ActivityHook>>,
}

impl Mixer {
    /// Mixer with an empty filter chain
    pub fn new(config: MixerConfig, events: Arc<dyn EventSink>) -> MixResult<Self> {
        let chain = FilterChain::new(config.format.frame_len());
        Self::with_chain(config, chain, events)
    }

    /// Mixer running `chain` over every tick
    pub fn with_chain(
        config: MixerConfig,
        chain: FilterChain,
        events: Arc<dyn EventSink>,
    ) -> MixResult<Self> {
        config.validate()?;
        let channels = config.format.frame_len();
        if chain.channels() != channels {
            return Err(MixError::ChannelCountMismatch {
                expected: channels,
                actual: chain.channels(),
            });
        }

        let buffer_size = config.buffer_size();
        let frames = buffer_size / channels;
        Ok(Self {
            id: config.id,
            format: config.format,
            buffer_size,
            membership: Mutex::new(Membership::default()),
            dsp: Mutex::new(DspState {
                mix: vec![0.0; buffer_size],
                scratch: vec![0.0; buffer_size],
                planar: vec![vec![0.0; frames]; channels],
                chain,
            }),
            filtering: AtomicBool::new(true),
            position: AtomicU64::new(0),
            events,
            activity: Mutex::new(None),
        })
    }

    /// Mixer configured from the engine key table, with the default chain
    pub fn from_engine(
        id: impl Into<String>,
        config: &EngineConfig,
        events: Arc<dyn EventSink>,
    ) -> MixResult<Self> {
        config.validate()?;
        let chain = default_chain(config)?;
        Self::with_chain(MixerConfig::from_engine(id, config), chain, events)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Seconds of audio produced
    pub fn position_secs(&self) -> f64 {
        self.format.duration_of(self.position()).as_secs_f64()
    }

    pub fn is_running(&self) -> bool {
        self.membership.lock().running
    }

    /// True while any channel is attached
    pub fn is_playing(&self) -> bool {
        self.membership.lock().count > 0
    }

    pub fn channel_count(&self) -> usize {
        self.membership.lock().count
    }

    pub fn channels(&self) -> Vec<Arc<dyn MixerChannel>> {
        self.membership.lock().channels().cloned().collect()
    }

    pub fn sinks(&self) -> Vec<Arc<dyn MixerSink>> {
        self.membership.lock().sinks.clone()
    }

    pub fn set_activity_hook(&self, hook: Option<ActivityHook>) {
        *self.activity.lock() = hook;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CHANNELS
    // ═══════════════════════════════════════════════════════════════════════

    /// Attach a channel, starting the mixer if it was idle.
    ///
    /// The returned completion fires once, when the channel is removed.
    pub fn add_channel(&self, channel: Arc<dyn MixerChannel>) -> MixResult<Arc<Completion>> {
        self.format.ensure_matches(&channel.format())?;

        let completion = Arc::new(Completion::new());
        let started = {
            let mut membership = self.membership.lock();
            let was_playing = membership.count > 0;
            membership.insert(Entry {
                channel,
                completion: Arc::clone(&completion),
            });
            !was_playing && self.transition_locked(&mut membership, true)
        };

        if started {
            self.state_changed(true);
        }
        let hook = self.activity.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        Ok(completion)
    }

    /// Detach every entry of `channel`. Returns false if it wasn't attached.
    pub fn remove_channel(&self, channel: &Arc<dyn MixerChannel>) -> bool {
        self.remove_channels(std::slice::from_ref(channel)) > 0
    }

    /// Detach all entries of the given channels, stopping the mixer if that
    /// leaves it empty. Returns the number of entries removed.
    pub fn remove_channels(&self, channels: &[Arc<dyn MixerChannel>]) -> usize {
        if channels.is_empty() {
            return 0;
        }
        let (removed, stopped) = {
            let mut membership = self.membership.lock();
            let removed =
                membership.take_where(|e| channels.iter().any(|c| same_channel(&e.channel, c)));
            let stopped = !removed.is_empty()
                && membership.count == 0
                && self.transition_locked(&mut membership, false);
            (removed, stopped)
        };
        self.release(removed, stopped)
    }

    /// Drop every channel
    pub fn empty(&self) -> usize {
        let (removed, stopped) = {
            let mut membership = self.membership.lock();
            let removed = membership.take_where(|_| true);
            let stopped = self.transition_locked(&mut membership, false);
            (removed, stopped)
        };
        self.release(removed, stopped)
    }

    fn release(&self, removed: Vec<Entry>, stopped: bool) -> usize {
        let count = removed.len();
        for entry in removed {
            entry.channel.close();
            entry.completion.complete();
        }
        if stopped {
            self.state_changed(false);
        }
        count
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RUNNING STATE
    // ═══════════════════════════════════════════════════════════════════════

    /// Start or stop every sink. Stopping also clears all filter state.
    /// Returns whether the mixer changed state.
    pub fn set_running(&self, running: bool) -> bool {
        let changed = {
            let mut membership = self.membership.lock();
            self.transition_locked(&mut membership, running)
        };
        if changed {
            self.state_changed(running);
        }
        changed
    }

    fn transition_locked(&self, membership: &mut Membership, running: bool) -> bool {
        if membership.running == running {
            return false;
        }
        membership.running = running;
        for sink in &membership.sinks {
            if running {
                sink.start();
            } else {
                sink.stop();
            }
        }
        if !running {
            self.dsp.lock().chain.reset();
        }
        true
    }

    fn state_changed(&self, playing: bool) {
        if playing {
            log::info!("Mixer {} started", self.id);
        } else {
            log::info!("Mixer {} stopped", self.id);
        }
        self.events.dispatch(AudioEvent::MixerStateChanged {
            mixer: self.id.clone(),
            playing,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SINKS & FILTERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Attach a sink; it follows the mixer's running state from now on
    pub fn add_sink(&self, sink: Arc<dyn MixerSink>) -> MixResult<()> {
        self.format.ensure_matches(&sink.format())?;
        let mut membership = self.membership.lock();
        if membership.running {
            sink.start();
        } else {
            sink.stop();
        }
        membership.sinks.push(sink);
        Ok(())
    }

    /// Detach and stop a sink
    pub fn remove_sink(&self, sink: &Arc<dyn MixerSink>) -> bool {
        let mut membership = self.membership.lock();
        let before = membership.sinks.len();
        membership
            .sinks
            .retain(|s| !std::ptr::addr_eq(Arc::as_ptr(s), Arc::as_ptr(sink)));
        let removed = membership.sinks.len() != before;
        if removed {
            sink.stop();
        }
        removed
    }

    /// Append a filter to the chain; returns its index
    pub fn add_filter(&self, filter: Box<dyn MultiChannelFilter>) -> MixResult<usize> {
        self.dsp.lock().chain.push(filter)
    }

    pub fn remove_filter(&self, index: usize) -> bool {
        self.dsp.lock().chain.remove(index).is_some()
    }

    pub fn filter_count(&self) -> usize {
        self.dsp.lock().chain.len()
    }

    pub fn is_filtering(&self) -> bool {
        self.filtering.load(Ordering::Acquire)
    }

    /// Disabling filtering clears filter state so re-enabling starts clean
    pub fn set_filtering(&self, enabled: bool) {
        let was = self.filtering.swap(enabled, Ordering::AcqRel);
        if was && !enabled {
            self.dsp.lock().chain.reset();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PROCESSING
    // ═══════════════════════════════════════════════════════════════════════

    /// Samples the next tick can produce: bounded by the buffer size, every
    /// running sink's free space and every playing channel's backlog.
    pub fn available(&self) -> usize {
        let membership = self.membership.lock();
        self.available_locked(&membership)
    }

    fn available_locked(&self, membership: &Membership) -> usize {
        let mut available = self.buffer_size;

        let mut sinks = 0;
        for sink in membership.sinks.iter().filter(|s| s.is_running()) {
            sinks += 1;
            available = available.min(sink.available_input());
        }

        let mut channels = 0;
        for channel in membership.channels().filter(|c| c.is_playing()) {
            let backlog = channel.available();
            // asking may discover the end of the stream
            if !channel.is_playing() {
                continue;
            }
            channels += 1;
            available = available.min(backlog);
        }

        if sinks == 0 || channels == 0 {
            return 0;
        }
        // whole frames only
        available - available % self.format.frame_len()
    }

    /// Produce one tick of audio. Returns whether any channel remains.
    pub fn process_buffer(&self) -> bool {
        let (channels, sinks, len) = {
            let membership = self.membership.lock();
            if membership.count == 0 {
                return false;
            }
            let len = self.available_locked(&membership);
            let channels: Vec<_> = membership.channels().cloned().collect();
            let sinks: Vec<_> = membership
                .sinks
                .iter()
                .filter(|s| s.is_running())
                .cloned()
                .collect();
            (channels, sinks, len)
        };

        let mut faulted = vec![false; channels.len()];
        if len > 0 {
            let mut guard = self.dsp.lock();
            let dsp = &mut *guard;
            dsp.mix[..len].fill(0.0);

            for (channel, fault) in channels.iter().zip(faulted.iter_mut()) {
                if !channel.is_playing() {
                    continue;
                }
                let scratch = &mut dsp.scratch[..len];
                match channel.read(scratch) {
                    Ok(ReadResult::Data(n)) => {
                        for (acc, sample) in dsp.mix[..n].iter_mut().zip(&scratch[..n]) {
                            *acc += *sample;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("Problem playing audio on channel in mixer {}: {}", self.id, e);
                        *fault = true;
                    }
                }
            }

            if self.filtering.load(Ordering::Acquire) && !dsp.chain.is_empty() {
                Self::filter(dsp, self.format.frame_len(), len);
            }

            for sink in &sinks {
                if sink.is_running() && sink.available_input() >= len {
                    if let Err(e) = sink.write(&dsp.mix[..len]) {
                        log::warn!("Mixer {} sink write failed: {}", self.id, e);
                    }
                }
            }
            self.position.fetch_add(len as u64, Ordering::Relaxed);
        }

        let finished: Vec<_> = channels
            .into_iter()
            .zip(faulted)
            .filter(|(channel, faulted)| *faulted || !channel.is_playing())
            .map(|(channel, _)| channel)
            .collect();
        self.remove_channels(&finished);

        self.is_playing()
    }

    fn filter(dsp: &mut DspState, channels: usize, len: usize) {
        let frames = len / channels;
        for (frame, samples) in dsp.mix[..len].chunks_exact(channels).enumerate() {
            for (ch, &sample) in samples.iter().enumerate() {
                dsp.planar[ch][frame] = sample;
            }
        }

        dsp.chain.process(&mut dsp.planar, frames);

        for (frame, samples) in dsp.mix[..len].chunks_exact_mut(channels).enumerate() {
            for (ch, sample) in samples.iter_mut().enumerate() {
                *sample = dsp.planar[ch][frame];
            }
        }
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        let membership = self.membership.get_mut();
        for sink in &membership.sinks {
            sink.stop();
        }
        for entry in membership.slots.drain(..).flatten() {
            entry.channel.close();
            entry.completion.complete();
        }
    }
}
