//! Engine configuration
//!
//! A flat key table with defaults for every entry. It can be filled from a
//! JSON document or from `key -> string` properties handed over by the host.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{AudioFormat, ConfigError};

// ═══════════════════════════════════════════════════════════════════════════════
// POLICIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Composition of the last stages of the default filter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinalStage {
    /// Soft clip, then dither
    #[default]
    SoftClip,
    /// Master gain, then dither
    GainDither,
}

/// How the compressor normalizes its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompressorMakeup {
    /// Unity gain at the threshold
    #[default]
    Unity,
    /// Full-scale input maps back to full scale
    FullScale,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SETTINGS GROUPS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    pub threshold: f64,
    pub ratio: f64,
    pub knee: f64,
    pub makeup: CompressorMakeup,
}

/// One band of the tone-shaping stack
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandSettings {
    pub frequency: f64,
    /// Resonance in dB
    pub resonance: f64,
    pub wet: f64,
    pub dry: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    pub threshold: f64,
    pub attack: f64,
    pub release: f64,
    pub slope: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub sample_bits: u16,
    pub channels: u16,
    /// Mixer buffer time in milliseconds
    pub delay: u64,
    /// Scheduling interval in milliseconds; `delay / 10` when unset
    pub loop_delay: Option<u64>,

    pub compressor_threshold: f64,
    pub compressor_ratio: f64,
    pub compressor_knee: f64,
    pub compressor_makeup: CompressorMakeup,

    pub sub_bass_frequency: f64,
    pub sub_bass_resonance: f64,
    pub sub_bass_wet: f64,
    pub sub_bass_dry: f64,

    pub bass_frequency: f64,
    pub bass_resonance: f64,
    pub bass_wet: f64,
    pub bass_dry: f64,

    pub mid_frequency: f64,
    pub mid_resonance: f64,
    pub mid_wet: f64,
    pub mid_dry: f64,

    pub limiter_threshold: f64,
    pub limiter_attack: f64,
    pub limiter_release: f64,
    pub limiter_slope: f64,

    pub master_gain: f64,
    pub final_stage: FinalStage,

    /// Blocking players allowed per audio channel
    pub maximum_players: usize,
    /// Upper bound on the scheduler's idle wait, milliseconds
    pub idle_wait: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            sample_bits: 16,
            channels: 2,
            delay: 500,
            loop_delay: None,

            compressor_threshold: 1.0,
            compressor_ratio: 1.0,
            compressor_knee: 0.0,
            compressor_makeup: CompressorMakeup::Unity,

            sub_bass_frequency: 65.0,
            sub_bass_resonance: 1.0,
            sub_bass_wet: 0.35,
            sub_bass_dry: 0.65,

            bass_frequency: 120.0,
            bass_resonance: 1.0,
            bass_wet: 0.5,
            bass_dry: 0.5,

            mid_frequency: 2500.0,
            mid_resonance: 1.0,
            mid_wet: 0.15,
            mid_dry: 0.85,

            limiter_threshold: 0.7,
            limiter_attack: 1.0,
            limiter_release: 0.0001,
            limiter_slope: 0.5,

            master_gain: 1.0,
            final_stage: FinalStage::SoftClip,

            maximum_players: 1,
            idle_wait: 1000,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; absent keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `key -> value` string properties over the defaults.
    ///
    /// Unknown keys are ignored so a host can pass its whole table.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            config.set(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set a single key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "sampleRate" => self.sample_rate = parse(key, value)?,
            "sampleBits" => self.sample_bits = parse(key, value)?,
            "channels" => self.channels = parse(key, value)?,
            "delay" | "bufferTime" => self.delay = parse(key, value)?,
            "loopDelay" => self.loop_delay = Some(parse(key, value)?),

            "compressorThreshold" => self.compressor_threshold = parse(key, value)?,
            "compressorRatio" => self.compressor_ratio = parse(key, value)?,
            "compressorKnee" => self.compressor_knee = parse(key, value)?,
            "compressorMakeup" => {
                self.compressor_makeup = match value {
                    "unity" => CompressorMakeup::Unity,
                    "fullScale" => CompressorMakeup::FullScale,
                    _ => return Err(invalid(key, value)),
                }
            }

            "subBassFrequency" => self.sub_bass_frequency = parse(key, value)?,
            "subBassResonance" => self.sub_bass_resonance = parse(key, value)?,
            "subBassWet" => self.sub_bass_wet = parse(key, value)?,
            "subBassDry" => self.sub_bass_dry = parse(key, value)?,

            "bassFrequency" => self.bass_frequency = parse(key, value)?,
            "bassResonance" => self.bass_resonance = parse(key, value)?,
            "bassWet" => self.bass_wet = parse(key, value)?,
            "bassDry" => self.bass_dry = parse(key, value)?,

            "midFrequency" => self.mid_frequency = parse(key, value)?,
            "midResonance" => self.mid_resonance = parse(key, value)?,
            "midWet" => self.mid_wet = parse(key, value)?,
            "midDry" => self.mid_dry = parse(key, value)?,

            "limiterThreshold" => self.limiter_threshold = parse(key, value)?,
            "limiterAttack" => self.limiter_attack = parse(key, value)?,
            "limiterRelease" => self.limiter_release = parse(key, value)?,
            "limiterSlope" => self.limiter_slope = parse(key, value)?,

            "masterGain" => self.master_gain = parse(key, value)?,
            "finalStage" => {
                self.final_stage = match value {
                    "softClip" => FinalStage::SoftClip,
                    "gainDither" => FinalStage::GainDither,
                    _ => return Err(invalid(key, value)),
                }
            }

            "maximumPlayers" => self.maximum_players = parse(key, value)?,
            "idleWait" => self.idle_wait = parse(key, value)?,

            _ => log::debug!("Ignoring unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(out_of_range("sampleRate", "must be positive"));
        }
        if !matches!(self.sample_bits, 8 | 16 | 24 | 32) {
            return Err(out_of_range("sampleBits", "must be 8, 16, 24 or 32"));
        }
        if self.channels == 0 {
            return Err(out_of_range("channels", "must be positive"));
        }
        if self.delay == 0 {
            return Err(out_of_range("delay", "must be positive"));
        }
        if self.loop_delay == Some(0) {
            return Err(out_of_range("loopDelay", "must be positive"));
        }
        if self.compressor_threshold <= 0.0 {
            return Err(out_of_range("compressorThreshold", "must be positive"));
        }
        if self.compressor_ratio < 1.0 {
            return Err(out_of_range("compressorRatio", "must be at least 1"));
        }
        if self.compressor_knee < 0.0 {
            return Err(out_of_range("compressorKnee", "must not be negative"));
        }

        let nyquist = self.sample_rate as f64 / 2.0;
        for (key, band) in [
            ("subBassFrequency", self.sub_bass()),
            ("bassFrequency", self.bass()),
            ("midFrequency", self.mid()),
        ] {
            if band.frequency <= 0.0 || band.frequency >= nyquist {
                return Err(out_of_range(
                    key,
                    &format!("must lie in (0, {}) Hz", nyquist),
                ));
            }
        }

        if self.limiter_threshold <= 0.0 {
            return Err(out_of_range("limiterThreshold", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.limiter_attack) {
            return Err(out_of_range("limiterAttack", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.limiter_release) {
            return Err(out_of_range("limiterRelease", "must lie in [0, 1]"));
        }
        if self.maximum_players == 0 {
            return Err(out_of_range("maximumPlayers", "must be positive"));
        }
        Ok(())
    }

    /// Internal float format mixers run at
    pub fn format(&self) -> AudioFormat {
        AudioFormat::float(self.sample_rate, self.channels)
    }

    /// Integer format handed to devices and encoders
    pub fn sink_format(&self) -> AudioFormat {
        AudioFormat::pcm(self.sample_rate, self.channels, self.sample_bits)
    }

    pub fn buffer_time(&self) -> Duration {
        Duration::from_millis(self.delay)
    }

    /// Interval between scheduling ticks
    pub fn loop_interval(&self) -> Duration {
        match self.loop_delay {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs_f64(self.delay as f64 / 10.0 / 1000.0),
        }
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait)
    }

    /// Bit depth the dither stage targets
    pub fn dither_bits(&self) -> u16 {
        self.sample_bits
    }

    pub fn compressor(&self) -> CompressorSettings {
        CompressorSettings {
            threshold: self.compressor_threshold,
            ratio: self.compressor_ratio,
            knee: self.compressor_knee,
            makeup: self.compressor_makeup,
        }
    }

    pub fn sub_bass(&self) -> BandSettings {
        BandSettings {
            frequency: self.sub_bass_frequency,
            resonance: self.sub_bass_resonance,
            wet: self.sub_bass_wet,
            dry: self.sub_bass_dry,
        }
    }

    pub fn bass(&self) -> BandSettings {
        BandSettings {
            frequency: self.bass_frequency,
            resonance: self.bass_resonance,
            wet: self.bass_wet,
            dry: self.bass_dry,
        }
    }

    pub fn mid(&self) -> BandSettings {
        BandSettings {
            frequency: self.mid_frequency,
            resonance: self.mid_resonance,
            wet: self.mid_wet,
            dry: self.mid_dry,
        }
    }

    pub fn limiter(&self) -> LimiterSettings {
        LimiterSettings {
            threshold: self.limiter_threshold,
            attack: self.limiter_attack,
            release: self.limiter_release,
            slope: self.limiter_slope,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn out_of_range(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::OutOfRange {
        key,
        reason: reason.to_string(),
    }
}
