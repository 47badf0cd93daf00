//! Per-destination audio channel
//!
//! Owns one mixer and tracks the players feeding it, who is speaking, and
//! whether anyone is listening (idle). Exclusive command sequences take
//! the channel through `obtain_channel`, an owner-tagged lock that a
//! holder can re-enter without deadlocking.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::{AudioEvent, ChannelError, ChannelResult, EventSink, Mixer, MixerChannel, Player};

/// Playback axis of a channel's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Waiting,
    Playing,
}

/// Token returned by `AudioChannel::obtain_channel`
pub enum Ownership<'a> {
    /// Holds the channel until dropped
    Active(ChannelGuard<'a>),
    /// Caller already owned the channel; dropping this does nothing
    Passive,
}

impl Ownership<'_> {
    pub fn is_active(&self) -> bool {
        matches!(self, Ownership::Active(_))
    }
}

/// Releases channel ownership on drop
pub struct ChannelGuard<'a> {
    channel: &'a AudioChannel,
    owner: String,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.channel.release(&self.owner);
    }
}

pub struct AudioChannel {
    id: String,
    mixer: Arc<Mixer>,
    events: Arc<dyn EventSink>,
    maximum_players: usize,
    players: Mutex<Vec<Arc<dyn Player>>>,
    /// Source identity -> speaking
    providers: Mutex<HashMap<String, bool>>,
    idle: AtomicBool,
    registered: AtomicBool,
    owner: Mutex<Option<String>>,
    released: Condvar,
}

impl AudioChannel {
    pub fn new(
        id: impl Into<String>,
        mixer: Arc<Mixer>,
        maximum_players: usize,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            mixer,
            events,
            maximum_players,
            players: Mutex::new(Vec::new()),
            providers: Mutex::new(HashMap::new()),
            idle: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            owner: Mutex::new(None),
            released: Condvar::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn maximum_players(&self) -> usize {
        self.maximum_players
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::Release);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PLAYERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Attach a player to this channel's mixer.
    ///
    /// Blocking players are capped at `maximum_players`; a rejected player
    /// leaves the channel untouched.
    pub fn add_player(self: &Arc<Self>, player: Arc<dyn Player>) -> ChannelResult<()> {
        if !self.is_registered() {
            return Err(ChannelError::NotRegistered);
        }

        let (completion, activated) = {
            let mut players = self.players.lock();
            if player.is_blocking() {
                let playing = players
                    .iter()
                    .filter(|p| p.is_blocking() && p.is_playing())
                    .count();
                if playing >= self.maximum_players {
                    return Err(ChannelError::AlreadyPlaying { playing });
                }
            }

            let completion = self.mixer.add_channel(Arc::clone(&player).as_channel())?;
            let activated = players.is_empty();
            players.push(Arc::clone(&player));
            (completion, activated)
        };

        self.set_idle(false);
        if activated {
            self.events.dispatch(AudioEvent::ChannelActivated {
                channel: self.id.clone(),
            });
        }
        self.events.dispatch(AudioEvent::PlayerAdded {
            channel: self.id.clone(),
            owner: player.owner().to_string(),
        });

        // registered last: a player already removed passivates after it was announced
        let channel: Weak<Self> = Arc::downgrade(self);
        let finished = Arc::clone(&player);
        completion.on_complete(move || {
            if let Some(channel) = channel.upgrade() {
                channel.player_finished(&finished);
            }
        });
        Ok(())
    }

    fn player_finished(&self, player: &Arc<dyn Player>) {
        let passivated = {
            let mut players = self.players.lock();
            let before = players.len();
            players.retain(|p| !std::ptr::addr_eq(Arc::as_ptr(p), Arc::as_ptr(player)));
            before != players.len() && players.is_empty()
        };
        if passivated {
            self.events.dispatch(AudioEvent::ChannelPassivated {
                channel: self.id.clone(),
            });
        }
    }

    pub fn players(&self) -> Vec<Arc<dyn Player>> {
        self.players.lock().clone()
    }

    /// Blocking players still playing
    pub fn blocking_players(&self) -> usize {
        self.players
            .lock()
            .iter()
            .filter(|p| p.is_blocking() && p.is_playing())
            .count()
    }

    pub fn state(&self) -> ChannelState {
        if self.players.lock().iter().any(|p| p.is_playing()) {
            ChannelState::Playing
        } else {
            ChannelState::Waiting
        }
    }

    /// Soft-stop every player, killing those that refuse
    pub fn stop_all(&self) {
        for player in self.players() {
            if let Err(e) = player.stop() {
                log::warn!("Failed to stop player on channel {}: {}", self.id, e);
                player.kill();
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // IDLE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    /// Returns whether the flag changed
    pub fn set_idle(&self, idle: bool) -> bool {
        if self.idle.swap(idle, Ordering::AcqRel) == idle {
            return false;
        }
        let channel = self.id.clone();
        self.events.dispatch(if idle {
            AudioEvent::ChannelSleep { channel }
        } else {
            AudioEvent::ChannelWake { channel }
        });
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SPEAKING
    // ═══════════════════════════════════════════════════════════════════════

    /// Record whether `user` is currently speaking
    pub fn set_provider(&self, user: &str, speaking: bool) {
        let previous = self.providers.lock().insert(user.to_string(), speaking);
        if previous.unwrap_or(false) != speaking {
            self.speaking_changed(user, speaking);
        }
    }

    pub fn remove_provider(&self, user: &str) -> bool {
        let previous = self.providers.lock().remove(user);
        if previous == Some(true) {
            self.speaking_changed(user, false);
        }
        previous.is_some()
    }

    /// A listener left; forget anything it was providing
    pub fn remove_listener(&self, user: &str) {
        if self.remove_provider(user) {
            log::debug!("Listener {} left channel {}", user, self.id);
        }
    }

    pub fn is_speaking(&self, user: &str) -> bool {
        self.providers.lock().get(user).copied().unwrap_or(false)
    }

    pub fn speaking(&self) -> Vec<String> {
        let mut users: Vec<_> = self
            .providers
            .lock()
            .iter()
            .filter(|(_, speaking)| **speaking)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    fn speaking_changed(&self, user: &str, speaking: bool) {
        let channel = self.id.clone();
        let user = user.to_string();
        self.events.dispatch(if speaking {
            AudioEvent::UserBegin { channel, user }
        } else {
            AudioEvent::UserEnd { channel, user }
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OWNERSHIP
    // ═══════════════════════════════════════════════════════════════════════

    /// Take exclusive ownership, blocking while someone else holds it.
    ///
    /// The current owner gets a `Passive` token that neither locks nor
    /// unlocks.
    pub fn obtain_channel(&self, owner: &str) -> Ownership<'_> {
        {
            let mut current = self.owner.lock();
            if current.as_deref() == Some(owner) {
                return Ownership::Passive;
            }
            while current.is_some() {
                self.released.wait(&mut current);
            }
            *current = Some(owner.to_string());
        }

        self.events.dispatch(AudioEvent::ChannelLocked {
            channel: self.id.clone(),
            owner: owner.to_string(),
        });
        Ownership::Active(ChannelGuard {
            channel: self,
            owner: owner.to_string(),
        })
    }

    pub fn owner(&self) -> Option<String> {
        self.owner.lock().clone()
    }

    fn release(&self, owner: &str) {
        {
            let mut current = self.owner.lock();
            if current.as_deref() == Some(owner) {
                *current = None;
            }
        }
        self.released.notify_one();
        self.events.dispatch(AudioEvent::ChannelUnlocked {
            channel: self.id.clone(),
            owner: owner.to_string(),
        });
    }
}
