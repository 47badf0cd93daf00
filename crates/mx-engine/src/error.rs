//! Audio channel error types

use mx_core::MixError;
use thiserror::Error;

/// Rejections from `AudioChannel` operations.
///
/// Each carries one user-facing reason and leaves the channel unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("This channel is not registered")]
    NotRegistered,

    #[error("{}", already_playing(.playing))]
    AlreadyPlaying { playing: usize },

    #[error(transparent)]
    Mixer(#[from] MixError),

    #[error("Player failed: {0}")]
    Player(String),
}

fn already_playing(playing: &usize) -> String {
    match playing {
        1 => "A track is already playing on this channel.".to_string(),
        n => format!("{} tracks are already playing on this channel.", n),
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_playing_message() {
        assert_eq!(
            ChannelError::AlreadyPlaying { playing: 1 }.to_string(),
            "A track is already playing on this channel."
        );
        assert_eq!(
            ChannelError::AlreadyPlaying { playing: 3 }.to_string(),
            "3 tracks are already playing on this channel."
        );
    }
}
