//! End-to-End Mixer Integration Tests
//!
//! Tests the mixing pipeline without the scheduling thread:
//! - One tick through providers, filters and sinks
//! - Plain-sum mixing and filter-state resets
//! - Membership lifecycle and channel ownership policy

use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use mx_audio::{
    ConstantProvider, MemoryProvider, MixerSink, ReadResult, RingBufferSink, StreamError,
    StreamResult,
};
use mx_core::{AudioFormat, CompressorMakeup, CompressorSettings, EngineConfig, Sample};
use mx_dsp::{Compressor, FilterChain, MuxedFilter, default_chain};
use mx_engine::{
    AudioChannel, AudioEvent, AudioPlayer, ChannelError, ChannelEvents, EventSink, IgnoreEvents,
    Mixer, MixerChannel, MixerConfig, Player, PlayerClass, ProviderChannel,
};

const STEREO: AudioFormat = AudioFormat::float(48000, 2);
const BUFFER_SIZE: usize = 9600;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(id: &str) -> MixerConfig {
    MixerConfig::new(id, STEREO, Duration::from_millis(100))
}

fn mixer_with(chain: FilterChain) -> (Mixer, Arc<RingBufferSink>) {
    let mixer = Mixer::with_chain(config("main"), chain, Arc::new(IgnoreEvents)).unwrap();
    let sink = Arc::new(RingBufferSink::with_capacity(STEREO, BUFFER_SIZE).unwrap());
    mixer.add_sink(sink.clone()).unwrap();
    (mixer, sink)
}

fn constant(value: Sample) -> Arc<dyn MixerChannel> {
    Arc::new(ProviderChannel::new(Box::new(ConstantProvider::new(STEREO, value))))
}

fn tone(len: usize) -> Arc<dyn MixerChannel> {
    let samples = (0..len)
        .map(|i| 0.8 * (i as f64 * 0.01).sin())
        .collect();
    Arc::new(ProviderChannel::new(Box::new(MemoryProvider::new(STEREO, samples))))
}

/// Channel whose reads always fail
struct Faulty;

impl MixerChannel for Faulty {
    fn format(&self) -> AudioFormat {
        STEREO
    }

    fn available(&self) -> usize {
        usize::MAX
    }

    fn read(&self, _buffer: &mut [Sample]) -> StreamResult<ReadResult> {
        Err(StreamError::Io("decoder crashed".into()))
    }

    fn is_playing(&self) -> bool {
        true
    }

    fn close(&self) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_scenario_a_single_constant_channel() {
    init();
    let (mixer, sink) = mixer_with(FilterChain::new(2));
    assert_eq!(mixer.buffer_size(), BUFFER_SIZE);

    mixer.add_channel(constant(0.5)).unwrap();
    assert_eq!(mixer.available(), BUFFER_SIZE);
    assert!(mixer.process_buffer());

    assert_eq!(sink.position(), BUFFER_SIZE as u64);
    assert_eq!(mixer.position(), BUFFER_SIZE as u64);
    assert!(sink.snapshot().iter().all(|&s| s == 0.5));
}

#[test]
fn test_scenario_b_plain_sum() {
    init();
    let (mixer, sink) = mixer_with(FilterChain::new(2));
    mixer.add_channel(constant(0.3)).unwrap();
    mixer.add_channel(constant(0.3)).unwrap();
    mixer.process_buffer();

    for sample in sink.snapshot() {
        assert_abs_diff_eq!(sample, 0.6, epsilon = 1e-12);
    }
}

#[test]
fn test_scenario_c_compressor_knee_and_ratio() {
    init();
    let mut chain = FilterChain::new(2);
    chain
        .push(Box::new(
            MuxedFilter::from_fn("compressor", 2, |_| {
                Compressor::new(CompressorSettings {
                    threshold: 0.5,
                    ratio: 4.0,
                    knee: 0.0,
                    makeup: CompressorMakeup::Unity,
                })
            })
            .unwrap(),
        ))
        .unwrap();

    let (mixer, sink) = mixer_with(chain);
    mixer.add_channel(constant(1.0)).unwrap();
    mixer.process_buffer();

    for sample in sink.snapshot() {
        assert_abs_diff_eq!(sample, 0.5 + 0.5 / 4.0, epsilon = 1e-9);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIXING PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_silent_channel_does_not_change_mix() {
    init();
    let engine = EngineConfig::default();

    let (alone, alone_sink) = mixer_with(default_chain(&engine).unwrap());
    alone.add_channel(tone(BUFFER_SIZE)).unwrap();
    alone.process_buffer();

    let (both, both_sink) = mixer_with(default_chain(&engine).unwrap());
    both.add_channel(tone(BUFFER_SIZE)).unwrap();
    both.add_channel(constant(0.0)).unwrap();
    both.process_buffer();

    assert_eq!(alone_sink.snapshot(), both_sink.snapshot());
}

#[test]
fn test_available_is_zero_without_channels() {
    init();
    let (mixer, _sink) = mixer_with(FilterChain::new(2));
    assert_eq!(mixer.available(), 0);
    assert!(!mixer.is_playing());

    let channel = constant(0.1);
    mixer.add_channel(channel.clone()).unwrap();
    assert_eq!(mixer.available(), BUFFER_SIZE);

    mixer.remove_channel(&channel);
    assert_eq!(mixer.available(), 0);
    assert!(!mixer.is_playing());
    assert!(!mixer.process_buffer());
}

#[test]
fn test_available_limited_by_slowest_channel() {
    init();
    let (mixer, sink) = mixer_with(FilterChain::new(2));
    mixer.add_channel(constant(0.1)).unwrap();
    mixer.add_channel(tone(1000)).unwrap();

    assert_eq!(mixer.available(), 1000);
    mixer.process_buffer();
    assert_eq!(sink.position(), 1000);
}

#[test]
fn test_stop_start_cycle_resets_filters() {
    init();
    let engine = EngineConfig::default();
    let (mixer, sink) = mixer_with(default_chain(&engine).unwrap());

    let first = tone(BUFFER_SIZE);
    mixer.add_channel(first.clone()).unwrap();
    mixer.process_buffer();
    let before = sink.snapshot();

    mixer.remove_channel(&first);
    assert!(!mixer.is_running());

    mixer.add_channel(tone(BUFFER_SIZE)).unwrap();
    assert!(mixer.is_running());
    mixer.process_buffer();

    assert_eq!(before, sink.snapshot());
}

#[test]
fn test_faulty_channel_removed_alone() {
    init();
    let (mixer, sink) = mixer_with(FilterChain::new(2));
    let healthy = mixer.add_channel(constant(0.5)).unwrap();
    let faulty = mixer.add_channel(Arc::new(Faulty)).unwrap();

    assert!(mixer.process_buffer());
    assert!(faulty.is_complete());
    assert!(!healthy.is_complete());
    assert_eq!(mixer.channel_count(), 1);
    assert!(sink.snapshot().iter().all(|&s| s == 0.5));
}

#[test]
fn test_finished_channel_purged() {
    init();
    let (mixer, _sink) = mixer_with(FilterChain::new(2));
    let done = mixer.add_channel(tone(BUFFER_SIZE)).unwrap();

    assert!(mixer.process_buffer());
    // the provider reports its end on the next tick
    assert!(!mixer.process_buffer());
    assert!(done.is_complete());
    assert!(!mixer.is_running());
}

#[test]
fn test_ending_channel_does_not_stall_others() {
    init();
    let (mixer, sink) = mixer_with(FilterChain::new(2));
    mixer.add_channel(constant(0.5)).unwrap();
    mixer.add_channel(tone(BUFFER_SIZE)).unwrap();

    assert!(mixer.process_buffer());
    assert_eq!(sink.position(), BUFFER_SIZE as u64);

    // the tone ends here; the constant channel still fills the whole tick
    assert!(mixer.process_buffer());
    assert_eq!(sink.position(), 2 * BUFFER_SIZE as u64);
    assert_eq!(mixer.channel_count(), 1);
    assert!(sink.snapshot().iter().all(|&s| s == 0.5));
}

#[test]
fn test_disabled_filtering_bypasses_chain() {
    init();
    let mut chain = FilterChain::new(2);
    chain
        .push(Box::new(
            MuxedFilter::from_fn("gain", 2, |_| mx_dsp::Gain::new(0.0)).unwrap(),
        ))
        .unwrap();
    let (mixer, sink) = mixer_with(chain);
    mixer.set_filtering(false);
    mixer.add_channel(constant(0.25)).unwrap();
    mixer.process_buffer();
    assert!(sink.snapshot().iter().all(|&s| s == 0.25));

    mixer.set_filtering(true);
    mixer.process_buffer();
    assert!(sink.snapshot().iter().all(|&s| s == 0.0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_removing_last_channel_stops_once() {
    init();
    let (events, rx) = ChannelEvents::new();
    let mixer = Mixer::new(config("main"), Arc::new(events)).unwrap();
    let sink: Arc<dyn MixerSink> =
        Arc::new(RingBufferSink::with_capacity(STEREO, BUFFER_SIZE).unwrap());
    mixer.add_sink(sink.clone()).unwrap();

    let channel = constant(0.1);
    let completion = mixer.add_channel(channel.clone()).unwrap();
    let signal = completion.signal();
    assert!(mixer.is_running());
    assert!(sink.is_running());

    assert!(mixer.remove_channel(&channel));
    assert!(!mixer.remove_channel(&channel));
    assert!(!mixer.is_running());
    assert!(!sink.is_running());
    assert!(signal.is_complete());
    assert!(!completion.complete());

    let stops = rx
        .try_iter()
        .filter(|e| matches!(e, AudioEvent::MixerStateChanged { playing: false, .. }))
        .count();
    assert_eq!(stops, 1);
}

#[test]
fn test_blocking_cap_rejects_without_change() {
    init();
    let events: Arc<dyn EventSink> = Arc::new(IgnoreEvents);
    let mixer = Arc::new(Mixer::new(config("main"), events.clone()).unwrap());
    let channel = AudioChannel::new("lobby", mixer.clone(), 1, events);
    channel.set_registered(true);

    let first = AudioPlayer::new(
        "alice",
        PlayerClass::Blocking,
        Box::new(ConstantProvider::new(STEREO, 0.1)),
    );
    channel.add_player(first.clone()).unwrap();

    let second = AudioPlayer::new(
        "bob",
        PlayerClass::Blocking,
        Box::new(ConstantProvider::new(STEREO, 0.1)),
    );
    let err = channel.add_player(second.clone()).unwrap_err();
    assert_eq!(err, ChannelError::AlreadyPlaying { playing: 1 });
    assert_eq!(err.to_string(), "A track is already playing on this channel.");

    assert_eq!(channel.players().len(), 1);
    assert_eq!(mixer.channel_count(), 1);
    assert!(second.is_playing());

    // room frees up once the first player ends
    first.kill();
    mixer.process_buffer();
    channel.add_player(second).unwrap();
    assert_eq!(channel.blocking_players(), 1);
}
