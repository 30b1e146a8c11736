//! Voice processing module
//!
//! Handles microphone capture, PCM coding and gapless playback.
//! Device access goes through [`AudioDevices`] and friends so the pipeline runs
//! against cpal in production and fakes in tests.

mod capture;
pub mod codec;
mod device;
mod output;
mod playback;
mod resample;

pub use capture::{
    AudioFrame, CaptureTap, CpalInput, FRAME_SIZE, LEVEL_SCALE, LevelCallback, SAMPLE_RATE,
    calculate_rms, samples_to_wav,
};
pub use codec::DecodedChunk;
pub use device::{AudioDevices, AudioInput, AudioOutput, Completion, CpalDevices, PlaybackId};
pub use output::{CpalOutput, Mixer, PLAYBACK_SAMPLE_RATE, fit_to_device};
pub use playback::{PlaybackHandle, PlaybackScheduler};
pub use resample::{StreamResampler, downmix, resample_exact};
