//! Biquad filter core
//!
//! Transposed Direct Form II with RBJ cookbook coefficients. Only the
//! responses the tone bands need are provided.

use mx_core::Sample;
use std::f64::consts::PI;

use crate::Filter;

/// Normalized biquad coefficients (a0 == 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Pass-through
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Constant 0 dB peak gain band-pass
    pub fn bandpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let a0 = 1.0 + alpha;

        Self {
            b0: alpha / a0,
            b1: 0.0,
            b2: -alpha / a0,
            a1: (-2.0 * cos_omega) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// TDF-II biquad
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl BiquadTDF2 {
    pub fn with_coeffs(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }
}

impl Filter for BiquadTDF2 {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_is_identity() {
        let mut filter = BiquadTDF2::with_coeffs(BiquadCoeffs::bypass());
        for x in [0.5, -0.25, 1.0] {
            assert_eq!(filter.process_sample(x), x);
        }
    }

    #[test]
    fn test_bandpass_blocks_dc() {
        let mut filter = BiquadTDF2::with_coeffs(BiquadCoeffs::bandpass(1000.0, 0.707, 48000.0));
        let mut out = 0.0;
        for _ in 0..48000 {
            out = filter.process_sample(1.0);
        }
        assert!(out.abs() < 1e-6, "DC should decay to zero, got {}", out);
    }

    #[test]
    fn test_bandpass_passes_center() {
        let sr = 48000.0;
        let freq = 1000.0;
        let mut filter = BiquadTDF2::with_coeffs(BiquadCoeffs::bandpass(freq, 2.0, sr));

        let mut peak: f64 = 0.0;
        for n in 0..9600 {
            let x = (2.0 * PI * freq * n as f64 / sr).sin();
            let y = filter.process_sample(x);
            if n > 4800 {
                peak = peak.max(y.abs());
            }
        }
        assert!((peak - 1.0).abs() < 0.01, "center gain should be 0 dB, got {}", peak);
    }
}
