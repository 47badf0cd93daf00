//! Format conversion between a source and a mixer
//!
//! - `Resampler` - stateful converter contract
//! - `PassthroughResampler` - equal rates, channel layout only
//! - `RubatoResampler` - FFT rate conversion via rubato
//! - `ResampledSource` / `ResampledProvider` - provider adapter

use mx_core::{AudioFormat, MixError, Sample, StreamBuffer};
use rubato::{FftFixedIn, Resampler as _};
use std::collections::VecDeque;

use crate::{
    AudioProvider, BufferedProvider, BufferedSource, FillStatus, ReadResult, ResampleError,
    StreamResult,
};

/// Frames per rubato processing chunk
const CHUNK_FRAMES: usize = 1024;

/// Stateful converter from one format to another.
///
/// `resample` consumes all of `input`. Output that does not fit into `out`
/// is held and delivered on later calls, so nothing is dropped. `flush`
/// drains history once the source has ended.
pub trait Resampler: Send {
    fn input_format(&self) -> AudioFormat;

    fn output_format(&self) -> AudioFormat;

    /// Input samples consumed per output sample
    fn scale(&self) -> f64 {
        let input = self.input_format();
        let output = self.output_format();
        (input.bits as f64 * input.channels as f64 * input.sample_rate as f64)
            / (output.bits as f64 * output.channels as f64 * output.sample_rate as f64)
    }

    /// Input samples needed to produce `output_samples`
    fn scaled_buffer_size(&self, output_samples: usize) -> usize {
        (output_samples as f64 * self.scale()).ceil() as usize
    }

    fn resample(&mut self, input: &[Sample], out: &mut StreamBuffer) -> Result<usize, ResampleError>;

    /// Push out everything still held, including filter history
    fn flush(&mut self, out: &mut StreamBuffer) -> Result<usize, ResampleError>;

    /// Converted samples waiting for room in the output buffer
    fn pending(&self) -> usize;

    fn close(&mut self) {}
}

/// Pick a converter for `from -> to`
pub fn resampler_for(
    from: AudioFormat,
    to: AudioFormat,
) -> Result<Box<dyn Resampler>, ResampleError> {
    if from.sample_rate == to.sample_rate {
        Ok(Box::new(PassthroughResampler::new(from, to)?))
    } else {
        Ok(Box::new(RubatoResampler::new(from, to)?))
    }
}

fn check_formats(from: AudioFormat, to: AudioFormat) -> Result<(), ResampleError> {
    for format in [from, to] {
        format.validate().map_err(|e| ResampleError::Unsupported {
            from,
            to,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Map interleaved frames from `in_channels` to `out_channels`.
///
/// Mono output averages, mono input is duplicated, anything else keeps the
/// leading channels and repeats the last one to pad.
fn remap_channels(input: &[Sample], in_channels: usize, out_channels: usize, out: &mut Vec<Sample>) {
    if in_channels == out_channels {
        out.extend_from_slice(input);
        return;
    }
    for frame in input.chunks_exact(in_channels) {
        if out_channels == 1 {
            out.push(frame.iter().sum::<Sample>() / in_channels as Sample);
        } else {
            for ch in 0..out_channels {
                out.push(frame[ch.min(in_channels - 1)]);
            }
        }
    }
}

fn drain_into(pending: &mut VecDeque<Sample>, out: &mut StreamBuffer) -> usize {
    let count = pending.len().min(out.available_input());
    if count == 0 {
        return 0;
    }
    let (first, second) = pending.as_slices();
    let from_first = count.min(first.len());
    let mut written = out.write(&first[..from_first]);
    if from_first < count {
        written += out.write(&second[..count - from_first]);
    }
    pending.drain(..written);
    written
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASSTHROUGH
// ═══════════════════════════════════════════════════════════════════════════════

/// Equal sample rates: only the channel layout changes
pub struct PassthroughResampler {
    from: AudioFormat,
    to: AudioFormat,
    scratch: Vec<Sample>,
    pending: VecDeque<Sample>,
}

impl PassthroughResampler {
    pub fn new(from: AudioFormat, to: AudioFormat) -> Result<Self, ResampleError> {
        check_formats(from, to)?;
        if from.sample_rate != to.sample_rate {
            return Err(ResampleError::Unsupported {
                from,
                to,
                reason: "sample rates differ".into(),
            });
        }
        Ok(Self {
            from,
            to,
            scratch: Vec::new(),
            pending: VecDeque::new(),
        })
    }
}

impl Resampler for PassthroughResampler {
    fn input_format(&self) -> AudioFormat {
        self.from
    }

    fn output_format(&self) -> AudioFormat {
        self.to
    }

    fn resample(&mut self, input: &[Sample], out: &mut StreamBuffer) -> Result<usize, ResampleError> {
        self.scratch.clear();
        remap_channels(
            input,
            self.from.frame_len(),
            self.to.frame_len(),
            &mut self.scratch,
        );
        self.pending.extend(self.scratch.iter().copied());
        Ok(drain_into(&mut self.pending, out))
    }

    fn flush(&mut self, out: &mut StreamBuffer) -> Result<usize, ResampleError> {
        Ok(drain_into(&mut self.pending, out))
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUBATO
// ═══════════════════════════════════════════════════════════════════════════════

/// FFT rate converter.
///
/// Input is remapped to the output channel layout first, then split into
/// planar chunks of `CHUNK_FRAMES` for rubato. The converter's own output
/// delay is trimmed from the start of the stream.
pub struct RubatoResampler {
    from: AudioFormat,
    to: AudioFormat,
    inner: FftFixedIn<Sample>,
    remapped: Vec<Sample>,
    planar_in: Vec<Vec<Sample>>,
    pending: VecDeque<Sample>,
    delay_frames: usize,
    flushed: bool,
}

impl RubatoResampler {
    pub fn new(from: AudioFormat, to: AudioFormat) -> Result<Self, ResampleError> {
        check_formats(from, to)?;
        let channels = to.frame_len();
        let inner = FftFixedIn::<Sample>::new(
            from.sample_rate as usize,
            to.sample_rate as usize,
            CHUNK_FRAMES,
            2,
            channels,
        )
        .map_err(|e| ResampleError::Construction(e.to_string()))?;
        let delay_frames = inner.output_delay();

        Ok(Self {
            from,
            to,
            inner,
            remapped: Vec::new(),
            planar_in: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            pending: VecDeque::new(),
            delay_frames,
            flushed: false,
        })
    }

    fn push_output(&mut self, planar: &[Vec<Sample>]) {
        let frames = planar.first().map_or(0, |ch| ch.len());
        let skip = self.delay_frames.min(frames);
        self.delay_frames -= skip;
        for frame in skip..frames {
            for channel in planar {
                self.pending.push_back(channel[frame]);
            }
        }
    }

    /// Run every complete chunk currently buffered
    fn process_chunks(&mut self) -> Result<(), ResampleError> {
        loop {
            let needed = self.inner.input_frames_next();
            if self.planar_in[0].len() < needed {
                return Ok(());
            }
            let chunk: Vec<Vec<Sample>> = self
                .planar_in
                .iter_mut()
                .map(|ch| ch.drain(..needed).collect())
                .collect();
            let output = self
                .inner
                .process(&chunk, None)
                .map_err(|e| ResampleError::Process(e.to_string()))?;
            self.push_output(&output);
        }
    }
}

impl Resampler for RubatoResampler {
    fn input_format(&self) -> AudioFormat {
        self.from
    }

    fn output_format(&self) -> AudioFormat {
        self.to
    }

    fn resample(&mut self, input: &[Sample], out: &mut StreamBuffer) -> Result<usize, ResampleError> {
        let mut written = drain_into(&mut self.pending, out);

        self.remapped.clear();
        remap_channels(
            input,
            self.from.frame_len(),
            self.to.frame_len(),
            &mut self.remapped,
        );
        let channels = self.to.frame_len();
        for frame in self.remapped.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.planar_in[ch].push(sample);
            }
        }

        self.process_chunks()?;
        written += drain_into(&mut self.pending, out);
        Ok(written)
    }

    fn flush(&mut self, out: &mut StreamBuffer) -> Result<usize, ResampleError> {
        if !self.flushed {
            self.flushed = true;
            self.process_chunks()?;

            if !self.planar_in[0].is_empty() {
                let tail: Vec<Vec<Sample>> =
                    self.planar_in.iter_mut().map(|ch| ch.drain(..).collect()).collect();
                let output = self
                    .inner
                    .process_partial(Some(tail.as_slice()), None)
                    .map_err(|e| ResampleError::Process(e.to_string()))?;
                self.push_output(&output);
            }

            // one empty partial call pushes the converter's history out
            let output = self
                .inner
                .process_partial(None::<&[Vec<Sample>]>, None)
                .map_err(|e| ResampleError::Process(e.to_string()))?;
            self.push_output(&output);
        }
        Ok(drain_into(&mut self.pending, out))
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn close(&mut self) {
        self.pending.clear();
        for channel in &mut self.planar_in {
            channel.clear();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESAMPLED PROVIDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Buffered source pulling from a provider through a resampler
pub struct ResampledSource {
    inner: Box<dyn AudioProvider>,
    resampler: Box<dyn Resampler>,
    scratch: Vec<Sample>,
    draining: bool,
}

/// Provider delivering another provider's audio in a target format
pub type ResampledProvider = BufferedProvider<ResampledSource>;

impl ResampledSource {
    pub fn new(inner: Box<dyn AudioProvider>, resampler: Box<dyn Resampler>) -> Result<Self, ResampleError> {
        let source = inner.format();
        let expected = resampler.input_format();
        if !source.matches(&expected) {
            return Err(ResampleError::Unsupported {
                from: source,
                to: resampler.output_format(),
                reason: format!("resampler expects {} input", expected),
            });
        }
        Ok(Self {
            inner,
            resampler,
            scratch: Vec::new(),
            draining: false,
        })
    }
}

impl BufferedSource for ResampledSource {
    fn format(&self) -> AudioFormat {
        self.resampler.output_format()
    }

    fn fill_buffer(&mut self, buffer: &mut StreamBuffer) -> StreamResult<FillStatus> {
        if self.draining {
            let written = self.resampler.flush(buffer)?;
            return Ok(if self.resampler.pending() == 0 && written == 0 {
                FillStatus::EndOfStream
            } else {
                FillStatus::Filled(written)
            });
        }

        // always ask for at least one frame so an exhausted source can say so
        let frame = self.inner.format().frame_len();
        let wanted = self
            .resampler
            .scaled_buffer_size(buffer.available_input())
            .min(self.inner.available());
        let wanted = (wanted - wanted % frame).max(frame);
        self.scratch.resize(wanted, 0.0);

        let result = self.inner.read(&mut self.scratch[..wanted])?;

        let written = match result {
            ReadResult::Data(n) => self.resampler.resample(&self.scratch[..n], buffer)?,
            ReadResult::Empty => self.resampler.resample(&[], buffer)?,
            ReadResult::EndOfStream => {
                self.draining = true;
                let written = self.resampler.flush(buffer)?;
                if written == 0 && self.resampler.pending() == 0 {
                    return Ok(FillStatus::EndOfStream);
                }
                written
            }
        };

        Ok(if written > 0 {
            FillStatus::Filled(written)
        } else {
            FillStatus::Pending
        })
    }

    fn close(&mut self) {
        self.resampler.close();
        self.inner.close();
    }
}

/// Wrap `inner` so it delivers `target`, buffering `buffer_size` samples
pub fn resampled(
    inner: Box<dyn AudioProvider>,
    target: AudioFormat,
    buffer_size: usize,
) -> Result<ResampledProvider, ResampleError> {
    let buffer = StreamBuffer::new(buffer_size).map_err(|e: MixError| {
        ResampleError::Construction(e.to_string())
    })?;
    let resampler = resampler_for(inner.format(), target)?;
    Ok(BufferedProvider::new(
        ResampledSource::new(inner, resampler)?,
        buffer,
    ))
}
