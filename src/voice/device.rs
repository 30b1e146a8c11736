//! Audio device seams
//!
//! The session orchestrator only talks to these traits, so it can run
//! against the cpal backend in production and against fakes in tests.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::capture::{CaptureTap, CpalInput};
use super::codec::DecodedChunk;
use super::output::CpalOutput;
use crate::{Error, Result};

/// Identifier of one scheduled playback chunk
pub type PlaybackId = u64;

/// Fired by an output sink once a scheduled chunk has played to the end
#[derive(Debug, Clone)]
pub struct Completion {
    id: PlaybackId,
    tx: mpsc::UnboundedSender<PlaybackId>,
}

impl Completion {
    /// Bind a completion to the scheduler's notification channel
    #[must_use]
    pub const fn new(id: PlaybackId, tx: mpsc::UnboundedSender<PlaybackId>) -> Self {
        Self { id, tx }
    }

    /// Chunk this completion belongs to
    #[must_use]
    pub const fn id(&self) -> PlaybackId {
        self.id
    }

    /// Report natural completion; never blocks
    pub fn finished(self) {
        // receiver gone means the scheduler was torn down
        let _ = self.tx.send(self.id);
    }
}

/// Factory for the two device contexts a session needs
#[async_trait]
pub trait AudioDevices: Send {
    /// Acquire exclusive access to a microphone at the given rate
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if access is refused, or
    /// `DeviceUnavailable` if there is no input device
    async fn request_microphone(&mut self, sample_rate: u32) -> Result<Box<dyn AudioInput>>;

    /// Open the output device context at the given rate
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if there is no output device
    async fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn AudioOutput>>;
}

/// An acquired microphone
pub trait AudioInput: Send {
    /// Start delivering mono samples at the requested rate to `tap`
    ///
    /// # Errors
    ///
    /// Returns error if the capture stream cannot be started
    fn start(&mut self, tap: CaptureTap) -> Result<()>;

    /// Disconnect the tap and release the device; safe to call repeatedly
    fn stop(&mut self);
}

/// A schedulable output sink driven by a monotonic device clock
pub trait AudioOutput: Send {
    /// Current output device time in seconds
    fn now(&self) -> f64;

    /// Schedule `chunk` to start playing at `start` seconds of device time
    ///
    /// # Errors
    ///
    /// Returns error if the chunk cannot be handed to the device
    fn schedule_at(
        &mut self,
        id: PlaybackId,
        start: f64,
        chunk: DecodedChunk,
        completion: Completion,
    ) -> Result<()>;

    /// Stop a scheduled chunk; unknown or finished ids are ignored
    fn stop(&mut self, id: PlaybackId);

    /// Release the output device; safe to call repeatedly
    fn close(&mut self);
}

/// Device backend built on cpal's default host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl CpalDevices {
    /// Create the cpal backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioDevices for CpalDevices {
    async fn request_microphone(&mut self, sample_rate: u32) -> Result<Box<dyn AudioInput>> {
        let input = tokio::task::spawn_blocking(move || CpalInput::open(sample_rate))
            .await
            .map_err(|e| Error::Audio(format!("microphone open task failed: {e}")))??;
        Ok(Box::new(input))
    }

    async fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
        let output = tokio::task::spawn_blocking(move || CpalOutput::open(sample_rate))
            .await
            .map_err(|e| Error::Audio(format!("output open task failed: {e}")))??;
        Ok(Box::new(output))
    }
}

/// Owns a cpal stream on a dedicated thread
///
/// cpal streams are not `Send`, so the stream is built, played and dropped
/// on its own thread. Dropping the worker stops the stream and joins.
pub(crate) struct StreamWorker {
    shutdown: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Build and start a stream on a new thread, waiting until it plays
    pub(crate) fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        use cpal::traits::StreamTrait;

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Blocks until signalled or the worker is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        let mut worker = Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.stop();
                Err(e)
            }
            Err(_) => {
                worker.stop();
                Err(Error::Audio(format!("{name} thread exited early")))
            }
        }
    }

    /// Stop the stream and join the thread
    pub(crate) fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("audio stream thread panicked");
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map a cpal stream build failure onto the session error taxonomy
pub(crate) fn classify_build_error(err: &cpal::BuildStreamError) -> Error {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => Error::DeviceUnavailable(err.to_string()),
        cpal::BuildStreamError::BackendSpecific { err: backend } => {
            let description = backend.description.to_lowercase();
            if description.contains("permission")
                || description.contains("denied")
                || description.contains("not authorized")
            {
                Error::PermissionDenied(backend.description.clone())
            } else {
                Error::Audio(backend.description.clone())
            }
        }
        other => Error::Audio(other.to_string()),
    }
}
