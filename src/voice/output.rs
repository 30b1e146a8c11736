//! Audio output to speakers
//!
//! The output callback renders a timeline of scheduled chunks. Device time
//! is the number of frames rendered so far, so it only moves forward while
//! the stream is running.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleRate, StreamConfig};

use super::codec::DecodedChunk;
use super::device::{AudioOutput, Completion, PlaybackId, StreamWorker, classify_build_error};
use super::resample::resample_exact;
use crate::{Error, Result};

/// Sample rate for playback (matches the model's audio output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

struct Voice {
    id: PlaybackId,
    start_frame: u64,
    samples: Vec<f32>,
    completion: Completion,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Frame index of `seconds` on a clock running at `rate`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn frame_index(seconds: f64, rate: u32) -> u64 {
    (seconds.max(0.0) * f64::from(rate)).round() as u64
}

/// Convert a chunk to mono at `device_rate`, sized to the frames it occupies
///
/// The length is the distance between the start and end frame indices, so a
/// chunk starting where the previous one ended lands on the next frame with
/// no gap or overlap.
///
/// # Errors
///
/// Returns error if resampling fails
pub fn fit_to_device(chunk: &DecodedChunk, start: f64, device_rate: u32) -> Result<Vec<f32>> {
    let first = frame_index(start, device_rate);
    let last = frame_index(start + chunk.duration(), device_rate);
    let frames = usize::try_from(last.saturating_sub(first))
        .map_err(|_| Error::Audio("chunk too long to schedule".to_string()))?;

    resample_exact(&chunk.to_mono(), chunk.sample_rate(), device_rate, frames)
}

/// Renders scheduled mono chunks onto an interleaved output buffer
pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    position: u64,
    voices: Vec<Voice>,
    // buffers of finished voices, freed off the render thread
    retired: Vec<Vec<f32>>,
}

impl Mixer {
    /// Create a mixer for a device running at `sample_rate` with `channels`
    #[must_use]
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            position: 0,
            voices: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// Device time in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn now(&self) -> f64 {
        self.position as f64 / f64::from(self.sample_rate)
    }

    /// Device sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Add mono samples (already at device rate) starting at `start` seconds
    ///
    /// A start time in the past plays immediately.
    pub fn schedule(
        &mut self,
        id: PlaybackId,
        start: f64,
        samples: Vec<f32>,
        completion: Completion,
    ) {
        // render only retires voices scheduled here, so its pushes never grow this
        self.retired.clear();
        self.retired.reserve(self.voices.len() + 1);

        let requested = frame_index(start, self.sample_rate);
        self.voices.push(Voice {
            id,
            start_frame: requested.max(self.position),
            samples,
            completion,
        });
    }

    /// Forget a chunk without signalling completion
    pub fn stop(&mut self, id: PlaybackId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    /// Forget every chunk
    pub fn clear(&mut self) {
        self.voices.clear();
        self.retired.clear();
    }

    /// Number of chunks waiting or playing
    #[must_use]
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Fill `out` with the next frames and advance device time
    #[allow(clippy::cast_possible_truncation)]
    pub fn render(&mut self, out: &mut [f32]) {
        for frame in out.chunks_mut(self.channels) {
            let pos = self.position;
            let mut sample = 0.0f32;
            for voice in &self.voices {
                if pos >= voice.start_frame && pos < voice.end_frame() {
                    sample += voice.samples[(pos - voice.start_frame) as usize];
                }
            }

            let sample = sample.clamp(-1.0, 1.0);
            for out in frame.iter_mut() {
                *out = sample;
            }
            self.position += 1;
        }

        let position = self.position;
        for voice in self.voices.extract_if(.., |v| v.end_frame() <= position) {
            voice.completion.finished();
            self.retired.push(voice.samples);
        }
    }
}

/// Plays scheduled chunks on the default output device
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    worker: Option<StreamWorker>,
}

impl CpalOutput {
    /// Open the default output device and start its render stream
    ///
    /// Prefers a mono config at `sample_rate`, then stereo, then the device
    /// default with chunks resampled on schedule.
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let supports = |channels: u16| -> Result<Option<StreamConfig>> {
            Ok(device
                .supported_output_configs()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
                .find(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
                .map(|c| c.with_sample_rate(SampleRate(sample_rate)).config()))
        };

        let config = match supports(1)? {
            Some(config) => config,
            None => match supports(2)? {
                Some(config) => config,
                None => device
                    .default_output_config()
                    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
                    .config(),
            },
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(
            config.sample_rate.0,
            usize::from(config.channels),
        )));

        let render_mixer = Arc::clone(&mixer);
        let worker = StreamWorker::spawn("tutor-playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| Error::DeviceUnavailable("no output device".to_string()))?;

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if let Ok(mut mixer) = render_mixer.lock() {
                            mixer.render(data);
                        } else {
                            data.fill(0.0);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| classify_build_error(&e))
        })?;

        Ok(Self {
            mixer,
            worker: Some(worker),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.now())
    }

    fn schedule_at(
        &mut self,
        id: PlaybackId,
        start: f64,
        chunk: DecodedChunk,
        completion: Completion,
    ) -> Result<()> {
        if self.worker.is_none() {
            return Err(Error::Audio("output device is closed".to_string()));
        }

        let device_rate = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("playback mixer poisoned".to_string()))?
            .sample_rate();
        let samples = fit_to_device(&chunk, start, device_rate)?;

        self.mixer
            .lock()
            .map_err(|_| Error::Audio("playback mixer poisoned".to_string()))?
            .schedule(id, start, samples, completion);
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.clear();
            }
            tracing::debug!("audio playback closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
