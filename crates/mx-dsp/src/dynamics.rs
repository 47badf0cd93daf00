//! Dynamics processors
//!
//! - `Compressor` - memoryless soft-knee curve on |x|
//! - `Limiter` - envelope-driven gain with a lookahead delay line

use mx_core::{CompressorMakeup, CompressorSettings, LimiterSettings, Sample};

use crate::Filter;

// ═══════════════════════════════════════════════════════════════════════════════
// COMPRESSOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Soft-knee compressor.
///
/// Below `threshold - knee/2` the signal is untouched, above
/// `threshold + knee/2` it is scaled by `1/ratio`, and in between a quadratic
/// spline blends the two slopes. A makeup constant computed up front keeps
/// either the threshold or full scale at unity (see `CompressorMakeup`).
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: f64,
    knee: f64,
    inv_ratio: f64,
    knee_low: f64,
    knee_high: f64,
    makeup: f64,
}

impl Compressor {
    pub fn new(settings: CompressorSettings) -> Self {
        let ratio = settings.ratio.max(1.0);
        let knee = settings.knee.max(0.0);
        let mut comp = Self {
            threshold: settings.threshold,
            knee,
            inv_ratio: 1.0 / ratio,
            knee_low: settings.threshold - knee * 0.5,
            knee_high: settings.threshold + knee * 0.5,
            makeup: 1.0,
        };

        let reference = match settings.makeup {
            CompressorMakeup::Unity => comp.threshold,
            CompressorMakeup::FullScale => 1.0,
        };
        let shaped = comp.curve(reference);
        if shaped > 0.0 {
            comp.makeup = reference / shaped;
        }
        comp
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn ratio(&self) -> f64 {
        1.0 / self.inv_ratio
    }

    /// Static curve on a magnitude, before makeup
    #[inline]
    fn curve(&self, magnitude: f64) -> f64 {
        if magnitude >= self.knee_high {
            self.threshold + (magnitude - self.threshold) * self.inv_ratio
        } else if magnitude > self.knee_low {
            let mu = (magnitude - self.knee_low) / self.knee;
            self.knee_low + spline2(mu, 1.0, self.inv_ratio) * self.knee
        } else {
            magnitude
        }
    }
}

/// Integral of a slope moving linearly from `dv1` to `dv2` over [0, mu]
#[inline]
fn spline2(mu: f64, dv1: f64, dv2: f64) -> f64 {
    mu * dv1 + mu * mu * 0.5 * (dv2 - dv1)
}

impl Filter for Compressor {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let shaped = self.curve(input.abs()) * self.makeup;
        shaped.copysign(input)
    }

    fn reset(&mut self) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIMITER
// ═══════════════════════════════════════════════════════════════════════════════

/// Lookahead length of the limiter's delay line, in samples
pub const LIMITER_LOOKAHEAD: usize = 64;

/// Peak limiter.
///
/// A one-pole follower tracks the rectified input minus the previous
/// envelope value. Once the envelope crosses the threshold, gain becomes
/// `10^(-slope * (log10(env) - log10(threshold)))`. The gain is applied to
/// the sample leaving the lookahead line, so reduction lands before the
/// transient that caused it.
#[derive(Debug, Clone)]
pub struct Limiter {
    threshold: f64,
    log_threshold: f64,
    attack: f64,
    release: f64,
    slope: f64,
    envelope: f64,
    delay: [Sample; LIMITER_LOOKAHEAD],
    pos: usize,
}

impl Limiter {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            threshold: settings.threshold,
            log_threshold: settings.threshold.log10(),
            attack: settings.attack.clamp(0.0, 1.0),
            release: settings.release.clamp(0.0, 1.0),
            slope: settings.slope,
            envelope: 0.0,
            delay: [0.0; LIMITER_LOOKAHEAD],
            pos: 0,
        }
    }

    /// Current envelope value
    pub fn envelope(&self) -> f64 {
        self.envelope
    }

    #[inline]
    fn gain(&self) -> f64 {
        if self.envelope > self.threshold {
            10f64.powf(-self.slope * (self.envelope.log10() - self.log_threshold))
        } else {
            1.0
        }
    }
}

impl Filter for Limiter {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let rise = (input.abs() - self.envelope).max(0.0);
        self.envelope = self.envelope * (1.0 - self.release) + self.attack * rise;

        let delayed = self.delay[self.pos];
        self.delay[self.pos] = input;
        self.pos = (self.pos + 1) % LIMITER_LOOKAHEAD;

        delayed * self.gain()
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.delay = [0.0; LIMITER_LOOKAHEAD];
        self.pos = 0;
    }

    fn latency(&self) -> usize {
        LIMITER_LOOKAHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressor(threshold: f64, ratio: f64, knee: f64) -> Compressor {
        Compressor::new(CompressorSettings {
            threshold,
            ratio,
            knee,
            makeup: CompressorMakeup::Unity,
        })
    }

    #[test]
    fn test_compressor_unity_at_threshold() {
        for ratio in [1.0, 2.0, 4.0, 20.0] {
            let mut comp = compressor(0.5, ratio, 0.0);
            let out = comp.process_sample(0.5);
            assert!((out - 0.5).abs() < 1e-12, "ratio {}: got {}", ratio, out);
            let out = comp.process_sample(-0.5);
            assert!((out + 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_compressor_unity_at_threshold_with_knee() {
        let mut comp = compressor(0.5, 4.0, 0.2);
        assert!((comp.process_sample(0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_compressor_above_threshold() {
        let mut comp = compressor(0.5, 4.0, 0.0);
        let out = comp.process_sample(1.0);
        assert!((out - (0.5 + 0.5 / 4.0)).abs() < 1e-12, "got {}", out);
        assert!((comp.process_sample(-1.0) + 0.625).abs() < 1e-12);
    }

    #[test]
    fn test_compressor_below_threshold_untouched() {
        let mut comp = compressor(0.5, 4.0, 0.0);
        assert_eq!(comp.process_sample(0.3), 0.3);
        assert_eq!(comp.process_sample(0.0), 0.0);
    }

    #[test]
    fn test_compressor_knee_is_continuous() {
        let comp = compressor(0.5, 4.0, 0.2);
        let eps = 1e-9;
        for edge in [0.4, 0.6] {
            let below = comp.curve(edge - eps);
            let above = comp.curve(edge + eps);
            assert!((below - above).abs() < 1e-6, "discontinuity at {}", edge);
        }
    }

    #[test]
    fn test_compressor_full_scale_makeup() {
        let mut comp = Compressor::new(CompressorSettings {
            threshold: 0.5,
            ratio: 4.0,
            knee: 0.0,
            makeup: CompressorMakeup::FullScale,
        });
        assert!((comp.process_sample(1.0) - 1.0).abs() < 1e-12);
        assert!((comp.process_sample(0.5) - 0.8).abs() < 1e-12);
    }

    fn limiter() -> Limiter {
        Limiter::new(LimiterSettings {
            threshold: 0.7,
            attack: 1.0,
            release: 0.0001,
            slope: 0.5,
        })
    }

    #[test]
    fn test_limiter_delays_by_lookahead() {
        let mut lim = limiter();
        let mut out = vec![0.0; LIMITER_LOOKAHEAD + 1];
        out[0] = lim.process_sample(0.1);
        for slot in out.iter_mut().skip(1) {
            *slot = lim.process_sample(0.0);
        }
        assert!(out[..LIMITER_LOOKAHEAD].iter().all(|&s| s == 0.0));
        assert!((out[LIMITER_LOOKAHEAD] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_limiter_reduces_loud_signal() {
        let mut lim = limiter();
        let mut last = 0.0;
        for _ in 0..LIMITER_LOOKAHEAD * 4 {
            last = lim.process_sample(1.0);
        }
        // env ~= 1.0, gain = 10^(-0.5 * -log10(0.7)) = sqrt(0.7)
        assert!((last - 0.7f64.sqrt()).abs() < 1e-3, "got {}", last);
    }

    #[test]
    fn test_limiter_reset_is_deterministic() {
        let input: Vec<Sample> = (0..300).map(|i| ((i as f64) * 0.37).sin()).collect();

        let mut lim = limiter();
        let first: Vec<Sample> = input.iter().map(|&x| lim.process_sample(x)).collect();
        lim.reset();
        let second: Vec<Sample> = input.iter().map(|&x| lim.process_sample(x)).collect();

        assert_eq!(first, second);
        assert_eq!(lim.latency(), LIMITER_LOOKAHEAD);
    }
}
