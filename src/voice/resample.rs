//! Sample rate conversion for devices that cannot run at the session rates

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input block size handed to the FFT resampler
const CHUNK_FRAMES: usize = 1024;

/// Streaming mono resampler
///
/// Accepts arbitrarily sized pushes and emits output as whole input
/// blocks become available.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a mono resampler from `from` Hz to `to` Hz
    ///
    /// # Errors
    ///
    /// Returns error if the rates are rejected by the resampler
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK_FRAMES, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler setup failed: {e}")))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
        })
    }

    /// Feed samples, returning whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let block: Vec<f32> = self.pending.drain(..needed).collect();
            let resampled = self
                .inner
                .process(std::slice::from_ref(&block), None)
                .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
            out.extend(resampled.into_iter().next().unwrap_or_default());
        }

        Ok(out)
    }

    /// Output frames the filter lags behind the input
    #[must_use]
    pub fn output_delay(&self) -> usize {
        self.inner.output_delay()
    }
}

/// Resample a complete mono buffer to exactly `frames` output frames
///
/// The filter delay is trimmed from the front and the tail is padded or cut,
/// so buffers resampled back to back line up sample for sample.
///
/// # Errors
///
/// Returns error if resampling fails
pub fn resample_exact(samples: &[f32], from: u32, to: u32, frames: usize) -> Result<Vec<f32>> {
    let mut out = if from == to || samples.is_empty() {
        samples.to_vec()
    } else {
        let mut resampler = StreamResampler::new(from, to)?;
        let delay = resampler.output_delay();
        let mut out = resampler.push(samples)?;
        // silence pushes the filter tail out
        while out.len() < delay + frames {
            out.extend(resampler.push(&[0.0; CHUNK_FRAMES])?);
        }
        out.drain(..delay);
        out
    };

    out.resize(frames, 0.0);
    Ok(out)
}

/// Average interleaved frames down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
