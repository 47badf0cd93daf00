//! Engine notifications
//!
//! Every observable transition is one `AudioEvent` variant handed to a
//! single `EventSink`. Collaborators that don't care install `IgnoreEvents`.

use crossbeam_channel::{Receiver, Sender, unbounded};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// A mixer's sinks were started (`playing`) or stopped
    MixerStateChanged { mixer: String, playing: bool },
    MixerRegistered { mixer: String },
    MixerUnregistered { mixer: String },
    ChannelRegistered { channel: String },
    ChannelUnregistered { channel: String },
    /// First player added
    ChannelActivated { channel: String },
    /// Last player removed
    ChannelPassivated { channel: String },
    ChannelSleep { channel: String },
    ChannelWake { channel: String },
    ChannelLocked { channel: String, owner: String },
    ChannelUnlocked { channel: String, owner: String },
    PlayerAdded { channel: String, owner: String },
    UserBegin { channel: String, user: String },
    UserEnd { channel: String, user: String },
}

/// Receiver of engine notifications. Called outside engine locks.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: AudioEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreEvents;

impl EventSink for IgnoreEvents {
    fn dispatch(&self, _event: AudioEvent) {}
}

/// Forwards events to a crossbeam channel
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: Sender<AudioEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, Receiver<AudioEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEvents {
    fn dispatch(&self, event: AudioEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}
