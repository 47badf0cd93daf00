//! Per-channel muxing and the ordered filter chain

use mx_core::{EngineConfig, FinalStage, MixError, MixResult, Sample};

use crate::{
    Compressor, Dither, Filter, Gain, Limiter, MultiChannelFilter, SoftClip, ToneBand,
};

// ═══════════════════════════════════════════════════════════════════════════════
// MUXED FILTER
// ═══════════════════════════════════════════════════════════════════════════════

/// One mono filter instance per audio channel
pub struct MuxedFilter {
    name: &'static str,
    filters: Vec<Box<dyn Filter>>,
}

impl MuxedFilter {
    pub fn new(name: &'static str, filters: Vec<Box<dyn Filter>>) -> MixResult<Self> {
        if filters.is_empty() {
            return Err(MixError::ChannelCountMismatch {
                expected: 1,
                actual: 0,
            });
        }
        Ok(Self { name, filters })
    }

    /// Build `channels` independent instances with `make`
    pub fn from_fn<F, M>(name: &'static str, channels: usize, mut make: M) -> MixResult<Self>
    where
        F: Filter + 'static,
        M: FnMut(usize) -> F,
    {
        let filters = (0..channels)
            .map(|ch| Box::new(make(ch)) as Box<dyn Filter>)
            .collect();
        Self::new(name, filters)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn latency(&self) -> usize {
        self.filters.iter().map(|f| f.latency()).max().unwrap_or(0)
    }
}

impl MultiChannelFilter for MuxedFilter {
    fn channels(&self) -> usize {
        self.filters.len()
    }

    fn process(&mut self, planar: &mut [Vec<Sample>], len: usize) -> usize {
        let mut processed = len;
        for (filter, channel) in self.filters.iter_mut().zip(planar.iter_mut()) {
            let len = len.min(channel.len());
            processed = processed.min(filter.process(&mut channel[..len]));
        }
        processed
    }

    fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILTER CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered list of multi-channel filters applied in sequence
pub struct FilterChain {
    channels: usize,
    filters: Vec<Box<dyn MultiChannelFilter>>,
}

impl FilterChain {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            filters: Vec::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Append a filter; its channel count must match the chain's
    pub fn push(&mut self, filter: Box<dyn MultiChannelFilter>) -> MixResult<usize> {
        if filter.channels() != self.channels {
            return Err(MixError::ChannelCountMismatch {
                expected: self.channels,
                actual: filter.channels(),
            });
        }
        self.filters.push(filter);
        Ok(self.filters.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Option<Box<dyn MultiChannelFilter>> {
        (index < self.filters.len()).then(|| self.filters.remove(index))
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    /// Run every filter in order over the planar window
    pub fn process(&mut self, planar: &mut [Vec<Sample>], len: usize) -> usize {
        let mut processed = len;
        for filter in &mut self.filters {
            processed = processed.min(filter.process(planar, len));
        }
        processed
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFAULT CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the standard output chain:
/// compressor → sub-bass → bass → mid → limiter → final stage → dither.
///
/// The final stage is a soft clip or the master gain depending on
/// `config.final_stage`. Dither always comes last.
pub fn default_chain(config: &EngineConfig) -> MixResult<FilterChain> {
    config.validate()?;

    let channels = config.channels as usize;
    let sample_rate = config.sample_rate as f64;
    let mut chain = FilterChain::new(channels);

    let compressor = config.compressor();
    chain.push(Box::new(MuxedFilter::from_fn("compressor", channels, |_| {
        Compressor::new(compressor)
    })?))?;

    for (name, band) in [
        ("sub-bass", config.sub_bass()),
        ("bass", config.bass()),
        ("mid", config.mid()),
    ] {
        chain.push(Box::new(MuxedFilter::from_fn(name, channels, |_| {
            ToneBand::new(band, sample_rate)
        })?))?;
    }

    let limiter = config.limiter();
    chain.push(Box::new(MuxedFilter::from_fn("limiter", channels, |_| {
        Limiter::new(limiter)
    })?))?;

    match config.final_stage {
        FinalStage::SoftClip => {
            chain.push(Box::new(MuxedFilter::from_fn("soft-clip", channels, |_| {
                SoftClip::new()
            })?))?;
        }
        FinalStage::GainDither => {
            let gain = config.master_gain;
            chain.push(Box::new(MuxedFilter::from_fn("master-gain", channels, |_| {
                Gain::new(gain)
            })?))?;
        }
    }

    let bits = config.dither_bits();
    chain.push(Box::new(MuxedFilter::from_fn("dither", channels, |_| {
        Dither::new(bits)
    })?))?;

    log::debug!(
        "Built default filter chain: {} stages, {} channels, final stage {:?}",
        chain.len(),
        channels,
        config.final_stage
    );
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planar(channels: usize, len: usize, value: Sample) -> Vec<Vec<Sample>> {
        vec![vec![value; len]; channels]
    }

    #[test]
    fn test_push_rejects_channel_mismatch() {
        let mut chain = FilterChain::new(2);
        let mono = MuxedFilter::from_fn("gain", 1, |_| Gain::new(0.5)).unwrap();
        assert_eq!(
            chain.push(Box::new(mono)).unwrap_err(),
            MixError::ChannelCountMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn test_chain_runs_in_order() {
        let mut chain = FilterChain::new(2);
        chain
            .push(Box::new(MuxedFilter::from_fn("half", 2, |_| Gain::new(0.5)).unwrap()))
            .unwrap();
        chain
            .push(Box::new(MuxedFilter::from_fn("clip", 2, |_| SoftClip::new()).unwrap()))
            .unwrap();

        let mut buf = planar(2, 8, 1.6);
        assert_eq!(chain.process(&mut buf, 8), 8);
        let expected = SoftClip::new().shape(0.8);
        for &s in buf.iter().flatten() {
            approx::assert_abs_diff_eq!(s, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_partial_window() {
        let mut chain = FilterChain::new(1);
        chain
            .push(Box::new(MuxedFilter::from_fn("gain", 1, |_| Gain::new(2.0)).unwrap()))
            .unwrap();
        let mut buf = planar(1, 6, 0.25);
        chain.process(&mut buf, 4);
        assert_eq!(buf[0], vec![0.5, 0.5, 0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_remove() {
        let mut chain = FilterChain::new(1);
        let index = chain
            .push(Box::new(MuxedFilter::from_fn("gain", 1, |_| Gain::new(2.0)).unwrap()))
            .unwrap();
        assert!(chain.remove(index + 1).is_none());
        assert!(chain.remove(index).is_some());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_default_chain_shape() {
        let config = EngineConfig::default();
        let chain = default_chain(&config).unwrap();
        // compressor, 3 bands, limiter, final stage, dither
        assert_eq!(chain.len(), 7);
        assert_eq!(chain.channels(), 2);
    }

    #[test]
    fn test_default_chain_reset_is_deterministic() {
        for stage in [FinalStage::SoftClip, FinalStage::GainDither] {
            let config = EngineConfig {
                final_stage: stage,
                ..EngineConfig::default()
            };
            let mut chain = default_chain(&config).unwrap();

            let signal: Vec<Sample> = (0..512).map(|i| (i as f64 * 0.03).sin() * 0.9).collect();
            let mut first = vec![signal.clone(), signal.clone()];
            chain.process(&mut first, 512);

            chain.reset();
            let mut second = vec![signal.clone(), signal];
            chain.process(&mut second, 512);

            assert_eq!(first, second, "{:?} chain must be deterministic after reset", stage);
        }
    }

    #[test]
    fn test_default_chain_bounded() {
        let mut chain = default_chain(&EngineConfig::default()).unwrap();
        let mut buf = planar(2, 4096, 3.0);
        chain.process(&mut buf, 4096);
        let range = 1.0 / 65536.0;
        assert!(buf.iter().flatten().all(|s| s.abs() <= 1.0 + range));
    }
}
