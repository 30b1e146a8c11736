//! Audio capture from microphone
//!
//! Samples are cut into fixed-size frames. Every frame produces a loudness
//! reading for the UI and a PCM16 payload for the outbound channel.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::codec;
use super::device::{AudioInput, StreamWorker, classify_build_error};
use super::resample::{StreamResampler, downmix};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per capture frame
pub const FRAME_SIZE: usize = 4096;

/// Scale applied to frame RMS before it reaches the level callback
pub const LEVEL_SCALE: f32 = 100.0;

/// Fire-and-forget loudness callback
pub type LevelCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// One fixed-size block of mono capture samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    /// Wrap captured samples
    #[must_use]
    pub const fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Raw samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Root-mean-square loudness
    #[must_use]
    pub fn rms(&self) -> f32 {
        calculate_rms(&self.samples)
    }

    /// Loudness as reported to the UI
    #[must_use]
    pub fn level(&self) -> f32 {
        self.rms() * LEVEL_SCALE
    }

    /// PCM16 payload for transmission
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        codec::encode(&self.samples)
    }
}

/// Frames captured samples and forwards them downstream
///
/// Handed to an [`AudioInput`] when capture starts; dropping it closes the
/// outbound frame channel.
pub struct CaptureTap {
    frame_size: usize,
    pending: Vec<f32>,
    on_level: LevelCallback,
    frames: mpsc::UnboundedSender<Vec<u8>>,
}

impl CaptureTap {
    /// Create a tap emitting `frame_size` sample frames
    #[must_use]
    pub fn new(
        frame_size: usize,
        on_level: LevelCallback,
        frames: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
            on_level,
            frames,
        }
    }

    /// Feed mono samples at the session input rate
    ///
    /// Returns false once the downstream channel has closed.
    pub fn push(&mut self, mut samples: &[f32]) -> bool {
        while !samples.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size && !self.emit() {
                return false;
            }
        }

        !self.frames.is_closed()
    }

    /// Number of samples waiting for the current frame to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn emit(&mut self) -> bool {
        let frame = AudioFrame::new(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.frame_size),
        ));

        (self.on_level)(frame.level());
        self.frames.send(frame.encode()).is_ok()
    }
}

/// Captures audio from the default input device
pub struct CpalInput {
    config: StreamConfig,
    target_rate: u32,
    worker: Option<StreamWorker>,
}

impl CpalInput {
    /// Acquire the default input device for capture at `target_rate`
    ///
    /// Prefers a native mono config at the target rate and falls back to the
    /// device default, which is then down-mixed and resampled.
    ///
    /// # Errors
    ///
    /// Returns error if there is no usable input device
    pub fn open(target_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let native = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(target_rate)
                    && c.max_sample_rate() >= SampleRate(target_rate)
            });

        let config = if let Some(supported) = native {
            supported.with_sample_rate(SampleRate(target_rate)).config()
        } else {
            device
                .default_input_config()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
                .config()
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            target_rate,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            target_rate,
            worker: None,
        })
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, mut tap: CaptureTap) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let config = self.config.clone();
        let channels = usize::from(config.channels);
        let device_rate = config.sample_rate.0;
        let mut resampler = if device_rate == self.target_rate {
            None
        } else {
            Some(StreamResampler::new(device_rate, self.target_rate)?)
        };

        let worker = StreamWorker::spawn("tutor-capture", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no input device".to_string()))?;

            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, channels);
                        let samples = match resampler.as_mut() {
                            Some(r) => match r.push(&mono) {
                                Ok(out) => out,
                                Err(e) => {
                                    tracing::warn!(error = %e, "dropping capture block");
                                    return;
                                }
                            },
                            None => mono,
                        };
                        tap.push(&samples);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio capture error");
                    },
                    None,
                )
                .map_err(|e| classify_build_error(&e))
        })?;

        self.worker = Some(worker);
        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Calculate RMS energy
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(codec::sample_to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    type Levels = Arc<Mutex<Vec<f32>>>;

    fn recording_tap(frame_size: usize) -> (CaptureTap, Levels, mpsc::UnboundedReceiver<Vec<u8>>) {
        let levels = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&levels);
        let (tx, rx) = mpsc::unbounded_channel();
        let tap = CaptureTap::new(
            frame_size,
            Arc::new(move |level| sink.lock().unwrap().push(level)),
            tx,
        );
        (tap, levels, rx)
    }

    #[test]
    fn test_silent_frame() {
        let (mut tap, levels, mut rx) = recording_tap(FRAME_SIZE);

        assert!(tap.push(&vec![0.0; FRAME_SIZE]));

        assert_eq!(*levels.lock().unwrap(), vec![0.0]);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), FRAME_SIZE * 2);
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frames_split_across_pushes() {
        let (mut tap, levels, mut rx) = recording_tap(4);

        tap.push(&[0.5, 0.5, 0.5]);
        assert!(rx.try_recv().is_err());
        assert_eq!(tap.pending(), 3);

        tap.push(&[0.5, 0.5, 0.5, 0.5, 0.5, 0.5]);
        assert_eq!(rx.try_recv().unwrap().len(), 8);
        assert_eq!(rx.try_recv().unwrap().len(), 8);
        assert!(rx.try_recv().is_err());
        assert_eq!(tap.pending(), 1);

        let levels = levels.lock().unwrap();
        assert_eq!(levels.len(), 2);
        assert!((levels[0] - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_push_reports_closed_channel() {
        let (mut tap, _levels, rx) = recording_tap(2);
        drop(rx);
        assert!(!tap.push(&[0.1, 0.1]));
    }

    #[test]
    fn test_rms() {
        assert!(calculate_rms(&[]).abs() < f32::EPSILON);
        assert!((calculate_rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert!((AudioFrame::new(vec![1.0; 8]).level() - 100.0).abs() < 1e-4);
    }
}
