//! PCM16 codec and base64 transport encoding
//!
//! The remote session speaks 16-bit little-endian mono PCM, base64 encoded
//! inside JSON envelopes. Everything else in the pipeline works on `f32`
//! samples in `[-1.0, 1.0]`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::{Error, Result};

/// Full scale of a signed 16-bit sample
const I16_SCALE: f32 = 32768.0;

/// A block of decoded samples ready to be scheduled for playback
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedChunk {
    /// Wrap interleaved samples
    ///
    /// # Errors
    ///
    /// Returns a decode error if the rate or channel count is zero, or the
    /// sample count does not fill a whole number of frames
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Decode("sample rate must be non-zero".to_string()));
        }
        if channels == 0 {
            return Err(Error::Decode("channel count must be non-zero".to_string()));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(Error::Decode(format!(
                "{} samples do not divide into {channels} channels",
                samples.len()
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Average the channels down to mono
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }

        let channels = usize::from(self.channels);
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Quantize one sample to signed 16-bit
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn sample_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * I16_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Encode float samples as 16-bit little-endian PCM
#[must_use]
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Decode 16-bit little-endian PCM into a playable chunk
///
/// # Errors
///
/// Returns a decode error for empty or truncated input, or input that does
/// not fill a whole number of frames
pub fn decode(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedChunk> {
    if bytes.is_empty() {
        return Err(Error::Decode("empty audio chunk".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "truncated PCM16 chunk: {} bytes",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / I16_SCALE)
        .collect();

    DecodedChunk::new(samples, sample_rate, channels)
}

/// Base64-encode a binary buffer for a JSON envelope
#[must_use]
pub fn to_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode a base64 payload from a JSON envelope
///
/// # Errors
///
/// Returns a decode error if the text is not valid base64
pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    Ok(B64.decode(text)?)
}
