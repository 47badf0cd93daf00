//! Audio format descriptors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{MixError, MixResult};

/// Bit depth of the engine's internal floating-point representation
pub const SAMPLE_BITS: u16 = 64;

/// Sample rate, channel count and bit depth of a PCM stream.
///
/// Mixers, channels and sinks compare on `(sample_rate, channels)` only;
/// bit depth matters at a sink's boundary and in resampler scale math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits: u16,
}

impl AudioFormat {
    /// Internal floating-point format
    #[inline]
    pub const fn float(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits: SAMPLE_BITS,
        }
    }

    /// Integer PCM format, as delivered to a device or encoder
    #[inline]
    pub const fn pcm(sample_rate: u32, channels: u16, bits: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits,
        }
    }

    /// Same rate and channel layout with a different bit depth
    #[inline]
    pub const fn with_bits(self, bits: u16) -> Self {
        Self { bits, ..self }
    }

    pub fn validate(&self) -> MixResult<()> {
        if self.sample_rate == 0 {
            return Err(MixError::InvalidFormat("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(MixError::InvalidFormat("channel count must be positive".into()));
        }
        if self.bits == 0 || self.bits % 8 != 0 || self.bits > 64 {
            return Err(MixError::InvalidFormat(format!(
                "unsupported bit depth: {}",
                self.bits
            )));
        }
        Ok(())
    }

    /// True when rate and channel layout agree (bit depth is ignored)
    #[inline]
    pub fn matches(&self, other: &AudioFormat) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Reject `other` unless it matches this format
    pub fn ensure_matches(&self, other: &AudioFormat) -> MixResult<()> {
        if self.matches(other) {
            Ok(())
        } else {
            Err(MixError::FormatMismatch {
                expected: *self,
                actual: *other,
            })
        }
    }

    /// Interleaved samples per frame
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.channels as usize
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits / 8) as usize
    }

    /// Interleaved sample count covering `duration`, rounded to whole frames
    pub fn samples_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as f64 * duration.as_secs_f64()).round() as usize;
        frames * self.frame_len()
    }

    /// Playback time represented by `samples` interleaved samples
    pub fn duration_of(&self, samples: u64) -> Duration {
        let per_second = self.sample_rate as f64 * self.channels as f64;
        if per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(samples as f64 / per_second)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}bit",
            self.sample_rate, self.channels, self.bits
        )
    }
}
