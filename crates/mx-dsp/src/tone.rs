//! Wet/dry band-pass tone shaper
//!
//! `y = x * dry + bp(x) * wet`. Three of these with different centers make
//! up the sub-bass, bass and mid emphasis of the default chain.

use mx_core::{BandSettings, Sample};

use crate::Filter;
use crate::biquad::{BiquadCoeffs, BiquadTDF2};

#[derive(Debug, Clone)]
pub struct ToneBand {
    core: BiquadTDF2,
    wet: f64,
    dry: f64,
}

impl ToneBand {
    /// Build a band at `sample_rate`. Resonance is in dB above the
    /// Butterworth-ish Q of 1.
    pub fn new(settings: BandSettings, sample_rate: f64) -> Self {
        let q = 10f64.powf(settings.resonance / 20.0);
        Self {
            core: BiquadTDF2::with_coeffs(BiquadCoeffs::bandpass(
                settings.frequency,
                q,
                sample_rate,
            )),
            wet: settings.wet,
            dry: settings.dry,
        }
    }
}

impl Filter for ToneBand {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let band = self.core.process_sample(input);
        input * self.dry + band * self.wet
    }

    fn reset(&mut self) {
        self.core.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(wet: f64, dry: f64) -> ToneBand {
        ToneBand::new(
            BandSettings {
                frequency: 120.0,
                resonance: 1.0,
                wet,
                dry,
            },
            48000.0,
        )
    }

    #[test]
    fn test_dry_only_is_scaled_input() {
        let mut tone = band(0.0, 0.65);
        for x in [0.1, -0.5, 0.9] {
            assert!((tone.process_sample(x) - x * 0.65).abs() < 1e-12);
        }
    }

    #[test]
    fn test_reset_clears_history() {
        let mut tone = band(0.5, 0.5);
        let input: Vec<Sample> = (0..200).map(|i| (i as f64 * 0.05).sin()).collect();

        let mut first = input.clone();
        tone.process(&mut first);
        tone.reset();
        let mut second = input.clone();
        tone.process(&mut second);

        assert_eq!(first, second);
    }
}
