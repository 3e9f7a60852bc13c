//! Per-stream resampler wrapper (C3, §4.3).
//!
//! Mirrors the consumed resampler interface from §6
//! (`new`/`set_rates`/`process`/`reset`/`info`): a separate instance exists
//! per direction on a client stream, buffers are reallocated on parameter
//! change, and `process` may consume and produce fewer frames than offered,
//! with the caller looping until its own buffers are exhausted.

use tracing::{debug, trace};

use crate::error::ResampleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Low,
    Medium,
    High,
}

/// Consumed resampler interface (§6). Implementations work on interleaved
/// `f32` frames; `input`/`output` lengths must be multiples of `channels()`.
pub trait Resampler: Send {
    fn set_rates(&mut self, in_rate: u32, out_rate: u32) -> Result<(), ResampleError>;

    /// Returns `(frames_consumed, frames_produced)`. `eof` asks the
    /// implementation to flush any internally buffered frames even if a
    /// full processing chunk hasn't accumulated yet.
    fn process(
        &mut self,
        eof: bool,
        input: &[f32],
        output: &mut [f32],
    ) -> Result<(usize, usize), ResampleError>;

    fn reset(&mut self);
    fn channels(&self) -> u16;
}

/// Linear-interpolation resampler. Low quality but allocation-free after
/// construction and deterministic, which is what makes it suitable both as
/// the `Quality::Low` tier and as the resampler used by integration tests
/// that need bit-reproducible output.
pub struct LinearResampler {
    channels: u16,
    in_rate: u32,
    out_rate: u32,
    /// Fractional read position into the (virtual) input stream, in input
    /// frames, since the start of the current `process` call's history.
    phase: f64,
    /// Last frame of the previous call, one sample per channel, used so
    /// interpolation is continuous across `process` boundaries.
    history: Vec<f32>,
    primed: bool,
}

impl LinearResampler {
    pub fn new(_quality: Quality, channels: u16) -> Result<Self, ResampleError> {
        if channels == 0 {
            return Err(ResampleError::InvalidChannelCount);
        }
        Ok(Self {
            channels,
            in_rate: 48_000,
            out_rate: 48_000,
            phase: 0.0,
            history: vec![0.0; channels as usize],
            primed: false,
        })
    }

    fn ratio(&self) -> f64 {
        self.in_rate as f64 / self.out_rate as f64
    }
}

impl Resampler for LinearResampler {
    fn set_rates(&mut self, in_rate: u32, out_rate: u32) -> Result<(), ResampleError> {
        if in_rate == 0 {
            return Err(ResampleError::InvalidSampleRate(in_rate));
        }
        if out_rate == 0 {
            return Err(ResampleError::InvalidSampleRate(out_rate));
        }
        self.in_rate = in_rate;
        self.out_rate = out_rate;
        self.phase = 0.0;
        trace!(in_rate, out_rate, "linear resampler rates set");
        Ok(())
    }

    fn process(
        &mut self,
        _eof: bool,
        input: &[f32],
        output: &mut [f32],
    ) -> Result<(usize, usize), ResampleError> {
        let ch = self.channels as usize;
        if input.len() % ch != 0 {
            return Err(ResampleError::BufferSizeMismatch {
                expected: (input.len() / ch) * ch,
                got: input.len(),
            });
        }
        if output.len() % ch != 0 {
            return Err(ResampleError::BufferSizeMismatch {
                expected: (output.len() / ch) * ch,
                got: output.len(),
            });
        }
        let in_frames = input.len() / ch;
        let out_frames_max = output.len() / ch;
        let ratio = self.ratio();

        if !self.primed && in_frames > 0 {
            self.history.copy_from_slice(&input[0..ch]);
            self.primed = true;
        }

        let mut produced = 0usize;
        while produced < out_frames_max {
            let src_pos = self.phase;
            let i0 = src_pos.floor() as i64;
            if i0 + 1 >= in_frames as i64 {
                break;
            }
            let frac = (src_pos - i0 as f64) as f32;
            let lo: &[f32] = if i0 < 0 {
                &self.history
            } else {
                &input[(i0 as usize) * ch..(i0 as usize + 1) * ch]
            };
            let hi_idx = (i0 + 1) as usize;
            let hi = &input[hi_idx * ch..(hi_idx + 1) * ch];
            for c in 0..ch {
                output[produced * ch + c] = lo[c] + (hi[c] - lo[c]) * frac;
            }
            produced += 1;
            self.phase += ratio;
        }

        let consumed = self.phase.floor().max(0.0) as usize;
        let consumed = consumed.min(in_frames);
        if consumed > 0 {
            self.history.copy_from_slice(&input[(consumed - 1) * ch..consumed * ch]);
            self.phase -= consumed as f64;
        }
        Ok((consumed, produced))
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.primed = false;
        self.history.iter_mut().for_each(|s| *s = 0.0);
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// High-quality resampler backed by `rubato`'s sinc interpolator. Used
/// whenever `Quality::Medium`/`Quality::High` is requested and the client's
/// rate differs from the device's.
pub struct RubatoResampler {
    channels: u16,
    in_rate: u32,
    out_rate: u32,
    chunk_size: usize,
    inner: rubato::SincFixedIn<f32>,
    in_scratch: Vec<Vec<f32>>,
    in_fill: usize,
    out_scratch: Vec<Vec<f32>>,
    pending: std::collections::VecDeque<f32>,
}

impl RubatoResampler {
    pub fn new(quality: Quality, channels: u16) -> Result<Self, ResampleError> {
        if channels == 0 {
            return Err(ResampleError::InvalidChannelCount);
        }
        let chunk_size = 1024;
        let params = rubato::SincInterpolationParameters {
            sinc_len: match quality {
                Quality::Low => 64,
                Quality::Medium => 128,
                Quality::High => 256,
            },
            f_cutoff: 0.95,
            interpolation: rubato::SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: rubato::WindowFunction::BlackmanHarris2,
        };
        let inner = rubato::SincFixedIn::<f32>::new(1.0, 2.0, params, chunk_size, channels as usize)
            .map_err(|e| ResampleError::Backend(e.to_string()))?;
        Ok(Self {
            channels,
            in_rate: 48_000,
            out_rate: 48_000,
            chunk_size,
            inner,
            in_scratch: vec![vec![0.0; chunk_size]; channels as usize],
            in_fill: 0,
            out_scratch: vec![Vec::new(); channels as usize],
            pending: std::collections::VecDeque::new(),
        })
    }

    fn run_chunk(&mut self) -> Result<(), ResampleError> {
        use rubato::Resampler as _;
        let in_refs: Vec<&[f32]> = self.in_scratch.iter().map(|v| v.as_slice()).collect();
        let out_frames = self.inner.output_frames_max();
        for buf in self.out_scratch.iter_mut() {
            buf.resize(out_frames, 0.0);
        }
        let mut out_refs: Vec<&mut [f32]> =
            self.out_scratch.iter_mut().map(|v| v.as_mut_slice()).collect();
        let (_, produced) = self
            .inner
            .process_into_buffer(&in_refs, &mut out_refs, None)
            .map_err(|e| ResampleError::Backend(e.to_string()))?;
        for frame in 0..produced {
            for ch in 0..self.channels as usize {
                self.pending.push_back(self.out_scratch[ch][frame]);
            }
        }
        self.in_fill = 0;
        Ok(())
    }
}

impl Resampler for RubatoResampler {
    fn set_rates(&mut self, in_rate: u32, out_rate: u32) -> Result<(), ResampleError> {
        if in_rate == 0 {
            return Err(ResampleError::InvalidSampleRate(in_rate));
        }
        if out_rate == 0 {
            return Err(ResampleError::InvalidSampleRate(out_rate));
        }
        let ratio = out_rate as f64 / in_rate as f64;
        self.inner
            .set_resample_ratio(ratio, false)
            .map_err(|e| ResampleError::Backend(e.to_string()))?;
        self.in_rate = in_rate;
        self.out_rate = out_rate;
        debug!(in_rate, out_rate, "rubato resampler rates set");
        Ok(())
    }

    fn process(
        &mut self,
        eof: bool,
        input: &[f32],
        output: &mut [f32],
    ) -> Result<(usize, usize), ResampleError> {
        let ch = self.channels as usize;
        if input.len() % ch != 0 || output.len() % ch != 0 {
            return Err(ResampleError::BufferSizeMismatch {
                expected: 0,
                got: input.len(),
            });
        }
        let in_frames = input.len() / ch;
        let mut consumed = 0usize;

        while consumed < in_frames && self.in_fill < self.chunk_size {
            let take = (in_frames - consumed).min(self.chunk_size - self.in_fill);
            for f in 0..take {
                for c in 0..ch {
                    self.in_scratch[c][self.in_fill + f] = input[(consumed + f) * ch + c];
                }
            }
            self.in_fill += take;
            consumed += take;
            if self.in_fill == self.chunk_size {
                self.run_chunk()?;
            }
        }

        if eof && self.in_fill > 0 {
            for c in 0..ch {
                for f in self.in_fill..self.chunk_size {
                    self.in_scratch[c][f] = 0.0;
                }
            }
            self.run_chunk()?;
        }

        let out_frames_max = output.len() / ch;
        let mut produced = 0usize;
        while produced < out_frames_max && !self.pending.is_empty() {
            for c in 0..ch {
                output[produced * ch + c] = self.pending.pop_front().unwrap_or(0.0);
            }
            produced += 1;
        }
        Ok((consumed, produced))
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.in_fill = 0;
        self.pending.clear();
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}
