//! Final output stages
//!
//! - `Gain` - headroom/master gain
//! - `SoftClip` - smooth odd saturation bounded by the rails
//! - `Dither` - reproducible sub-LSB noise ahead of quantization

use mx_core::Sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::Filter;

// ═══════════════════════════════════════════════════════════════════════════════
// GAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// `y = x * q`
#[derive(Debug, Clone, Copy)]
pub struct Gain {
    q: f64,
}

impl Gain {
    pub fn new(q: f64) -> Self {
        Self { q }
    }

    pub fn factor(&self) -> f64 {
        self.q
    }
}

impl Filter for Gain {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        input * self.q
    }

    fn reset(&mut self) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOFT CLIP
// ═══════════════════════════════════════════════════════════════════════════════

/// Linear up to `knee`, then a tanh segment that approaches ±1 and never
/// exceeds it.
///
/// The segment is scaled so the slope is 1 on both sides of the knee.
#[derive(Debug, Clone, Copy)]
pub struct SoftClip {
    knee: f64,
}

impl SoftClip {
    pub fn new() -> Self {
        Self { knee: 0.5 }
    }

    /// Knee in (0, 1); clamped to [0.05, 0.95]
    pub fn with_knee(knee: f64) -> Self {
        Self {
            knee: knee.clamp(0.05, 0.95),
        }
    }

    #[inline]
    pub fn shape(&self, input: Sample) -> Sample {
        let magnitude = input.abs();
        if magnitude <= self.knee {
            return input;
        }
        let headroom = 1.0 - self.knee;
        let shaped = self.knee + headroom * ((magnitude - self.knee) / headroom).tanh();
        shaped.copysign(input)
    }
}

impl Default for SoftClip {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for SoftClip {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.shape(input)
    }

    fn reset(&mut self) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// DITHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Rectangular dither of at most one LSB at `bits`.
///
/// Exact values (zero, the rails) pass untouched. The generator is seeded
/// from the bit depth so runs are reproducible, and `reset` reseeds it.
#[derive(Debug, Clone)]
pub struct Dither {
    bits: u16,
    range: f64,
    rng: ChaCha8Rng,
}

impl Dither {
    pub fn new(bits: u16) -> Self {
        Self {
            bits,
            range: 1.0 / 2f64.powi(bits as i32),
            rng: ChaCha8Rng::seed_from_u64(Self::seed(bits)),
        }
    }

    #[inline]
    fn seed(bits: u16) -> u64 {
        bits as u64 ^ 0xDEAD_BEEF
    }

    /// Largest noise magnitude added
    pub fn range(&self) -> f64 {
        self.range
    }
}

impl Filter for Dither {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        if input % 1.0 != 0.0 {
            input + self.range * self.rng.random::<f64>()
        } else {
            input
        }
    }

    fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(Self::seed(self.bits));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_multiplies() {
        for q in [0.0, 0.5, 1.0, 2.5, -1.0] {
            let mut gain = Gain::new(q);
            for x in [-1.0, -0.3, 0.0, 0.25, 0.9] {
                assert!((gain.process_sample(x) - x * q).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn test_soft_clip_properties() {
        let clip = SoftClip::new();

        // transparent near zero
        assert_eq!(clip.shape(0.1), 0.1);
        // odd symmetric
        for x in [0.3, 0.7, 1.5, 10.0] {
            assert_eq!(clip.shape(-x), -clip.shape(x));
        }
        // monotonic and bounded
        let mut prev = clip.shape(-20.0);
        for i in -2000..=2000 {
            let y = clip.shape(i as f64 * 0.01);
            assert!(y >= prev, "not monotonic at {}", i);
            assert!(y.abs() <= 1.0);
            prev = y;
        }
        // asymptotic at the rails
        assert!(clip.shape(20.0) > 0.999);
    }

    #[test]
    fn test_dither_bounds_and_exact_values() {
        let mut dither = Dither::new(16);
        let range = dither.range();
        assert_eq!(range, 1.0 / 65536.0);

        assert_eq!(dither.process_sample(0.0), 0.0);
        assert_eq!(dither.process_sample(1.0), 1.0);
        assert_eq!(dither.process_sample(-1.0), -1.0);

        for i in 0..1000 {
            let x = (i as f64 * 0.001) - 0.5;
            if x == 0.0 {
                continue;
            }
            let y = dither.process_sample(x);
            assert!((y - x).abs() <= range);
        }
    }

    #[test]
    fn test_dither_reproducible_after_reset() {
        let mut dither = Dither::new(16);
        let first: Vec<Sample> = (0..64).map(|_| dither.process_sample(0.25)).collect();
        dither.reset();
        let second: Vec<Sample> = (0..64).map(|_| dither.process_sample(0.25)).collect();
        assert_eq!(first, second);

        let mut other = Dither::new(16);
        let third: Vec<Sample> = (0..64).map(|_| other.process_sample(0.25)).collect();
        assert_eq!(first, third);
    }
}
