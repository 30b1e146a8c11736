//! Live session orchestration
//!
//! [`VoiceSession`] owns one bidirectional session at a time. It wires the
//! microphone to the outbound link, decodes inbound audio into the playback
//! scheduler, and answers mode switch tool calls.
//!
//! ```text
//!  mic ─► CaptureTap ─► frames ─┐                 ┌─► PlaybackScheduler ─► speaker
//!                               ▼                 │
//!                         VoiceSession ◄─ inbound ┤
//!                               │                 └─► ModeProtocol ─► on_mode_change
//!                               ▼
//!                            LiveLink ─► remote endpoint
//! ```
//!
//! All three event sources are drained by [`VoiceSession::step`], one event
//! at a time, so inbound messages are handled strictly in arrival order.

pub mod protocol;
mod transport;
mod websocket;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::mode::{AssistantMode, ModeProtocol};
use crate::voice::{
    AudioDevices, AudioInput, CaptureTap, PlaybackId, PlaybackScheduler, codec,
};
use crate::{Error, Result};
use protocol::{
    Blob, Content, FunctionCall, GenerationConfig, PrebuiltVoiceConfig, ServerMessage, Setup,
    SpeechConfig, Tool, VoiceConfig,
};

pub use transport::{Credentials, Inbound, LiveLink, Transport};
pub use websocket::WebSocketTransport;

/// Lifecycle of a [`VoiceSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected
    Idle,
    /// Waiting for the microphone and the handshake
    Connecting,
    /// Streaming in both directions
    Open,
    /// Ended cleanly
    Closed,
    /// Ended by an unrecoverable error; `disconnect` resets to `Closed`
    Failed,
}

/// Callbacks for the UI layer
///
/// Every method is fire-and-forget. `on_audio_level` runs on the capture
/// thread and must not block.
pub trait SessionObserver: Send + Sync {
    /// The session is open and the microphone is streaming
    fn on_open(&self) {}

    /// The session ended without error
    fn on_close(&self, _reason: &str) {}

    /// The session ended with an error
    fn on_error(&self, _error: &Error) {}

    /// Loudness of the last captured frame (RMS x 100)
    fn on_audio_level(&self, _volume: f32) {}

    /// The model switched the assistant mode
    fn on_mode_change(&self, _mode: AssistantMode) {}
}

/// Observer that ignores every callback
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Resources that only exist while a session is open
struct Live {
    link: Box<dyn LiveLink>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    input: Box<dyn AudioInput>,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    playback: PlaybackScheduler,
    completions: mpsc::UnboundedReceiver<PlaybackId>,
}

enum LoopEvent {
    Inbound(Inbound),
    Frame(Vec<u8>),
    Finished(PlaybackId),
}

/// Orchestrates one live voice session
pub struct VoiceSession<T, D> {
    transport: T,
    devices: D,
    config: SessionConfig,
    modes: ModeProtocol,
    observer: Arc<dyn SessionObserver>,
    state: SessionState,
    mode: AssistantMode,
    session_id: Option<Uuid>,
    span: tracing::Span,
    live: Option<Live>,
}

impl<T: Transport, D: AudioDevices> VoiceSession<T, D> {
    /// Create an idle session
    #[must_use]
    pub fn new(
        transport: T,
        devices: D,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let modes = config.mode_protocol();
        Self {
            transport,
            devices,
            config,
            modes,
            observer,
            state: SessionState::Idle,
            mode: AssistantMode::General,
            session_id: None,
            span: tracing::Span::none(),
            live: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current assistant mode
    #[must_use]
    pub const fn mode(&self) -> AssistantMode {
        self.mode
    }

    /// Id of the current or last session attempt
    #[must_use]
    pub const fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Setup envelope sent during the handshake
    #[must_use]
    pub fn setup(&self) -> Setup {
        Setup {
            model: self.config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content::text(self.config.system_instruction.clone()),
            tools: vec![Tool {
                function_declarations: vec![self.modes.declaration()],
            }],
        }
    }

    /// Acquire the microphone, open the session and start streaming
    ///
    /// Allowed from `Idle` or `Closed`. On failure every acquired resource
    /// is released, the session moves to `Failed` and the error is also
    /// reported through `on_error`.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` or `DeviceUnavailable` for microphone
    /// problems, and `Connection` for transport or handshake failures
    pub async fn connect(&mut self, credentials: &Credentials) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::Closed => {}
            SessionState::Connecting | SessionState::Open => {
                return Err(Error::Connection("session already active".to_string()));
            }
            SessionState::Failed => {
                return Err(Error::Connection(
                    "previous session failed; disconnect before reconnecting".to_string(),
                ));
            }
        }

        let id = Uuid::new_v4();
        self.session_id = Some(id);
        self.span = tracing::info_span!("session", id = %id);
        self.mode = AssistantMode::General;
        self.state = SessionState::Connecting;

        let span = self.span.clone();
        let opened = self.open_live(credentials).instrument(span.clone()).await;

        let _entered = span.enter();
        match opened {
            Ok(live) => {
                self.live = Some(live);
                self.state = SessionState::Open;
                tracing::info!("session open");
                self.observer.on_open();
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                tracing::error!(error = %e, "session failed to open");
                self.observer.on_error(&e);
                Err(e)
            }
        }
    }

    async fn open_live(&mut self, credentials: &Credentials) -> Result<Live> {
        let mut input = self
            .devices
            .request_microphone(self.config.input_sample_rate)
            .await?;

        let output = match self
            .devices
            .open_output(self.config.output_sample_rate)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                input.stop();
                return Err(e);
            }
        };
        let (mut playback, completions) = PlaybackScheduler::new(output);

        let setup = self.setup();
        let (mut link, inbound) = match self.transport.open(credentials, &setup).await {
            Ok(opened) => opened,
            Err(e) => {
                input.stop();
                playback.shutdown();
                return Err(into_connection_error(e));
            }
        };

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let observer = Arc::clone(&self.observer);
        let tap = CaptureTap::new(
            self.config.frame_size,
            Arc::new(move |volume| observer.on_audio_level(volume)),
            frames_tx,
        );

        if let Err(e) = input.start(tap) {
            input.stop();
            playback.shutdown();
            if let Err(close_err) = link.close().await {
                tracing::debug!(error = %close_err, "close after failed capture start");
            }
            return Err(e);
        }

        Ok(Live {
            link,
            inbound,
            input,
            frames,
            playback,
            completions,
        })
    }

    /// Process exactly one event: an inbound message, a captured frame or a
    /// playback completion
    ///
    /// Returns immediately when the session is not open.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session; the session is
    /// `Failed` and resources are released by then
    pub async fn step(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.step_inner().instrument(span).await
    }

    async fn step_inner(&mut self) -> Result<()> {
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };

        let event = tokio::select! {
            inbound = live.inbound.recv() => LoopEvent::Inbound(
                inbound.unwrap_or_else(|| Inbound::Closed("connection ended".to_string())),
            ),
            Some(frame) = live.frames.recv() => LoopEvent::Frame(frame),
            Some(id) = live.completions.recv() => LoopEvent::Finished(id),
        };

        match event {
            LoopEvent::Inbound(Inbound::Message(message)) => match self.dispatch(message).await {
                Ok(()) => Ok(()),
                Err(e) => self.fail(e).await,
            },
            LoopEvent::Inbound(Inbound::Closed(reason)) => {
                self.teardown().await;
                self.state = SessionState::Closed;
                self.mode = AssistantMode::General;
                tracing::info!(%reason, "session closed by endpoint");
                self.observer.on_close(&reason);
                Ok(())
            }
            LoopEvent::Inbound(Inbound::Failed(reason)) => {
                self.fail(Error::Connection(reason)).await
            }
            LoopEvent::Frame(frame) => {
                let sent = match self.live.as_mut() {
                    Some(live) => live.link.send_audio_frame(&frame).await,
                    None => Ok(()),
                };
                match sent {
                    Ok(()) => Ok(()),
                    Err(e) => self.fail(into_connection_error(e)).await,
                }
            }
            LoopEvent::Finished(id) => {
                if let Some(live) = self.live.as_mut() {
                    live.playback.complete(id);
                }
                Ok(())
            }
        }
    }

    /// Step until the session leaves `Open`
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session
    pub async fn run(&mut self) -> Result<()> {
        while self.state == SessionState::Open {
            self.step().await?;
        }
        Ok(())
    }

    /// Handle one inbound message
    ///
    /// Tool calls, audio and the interruption flag are independent and all
    /// checked, in that order.
    async fn dispatch(&mut self, message: ServerMessage) -> Result<()> {
        let calls = message.function_calls();
        if !calls.is_empty() {
            self.handle_tool_calls(calls).await?;
        }

        for blob in message.audio_parts() {
            self.play_blob(blob);
        }

        if message.is_interrupted()
            && let Some(live) = self.live.as_mut()
        {
            let stopped = live.playback.interrupt();
            tracing::debug!(stopped, "barge-in");
        }

        if message.is_turn_complete() {
            tracing::debug!("model turn complete");
        }
        if let Some(cancellation) = &message.tool_call_cancellation {
            tracing::info!(ids = ?cancellation.ids, "tool calls cancelled by endpoint");
        }
        if let Some(go_away) = &message.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "endpoint will close the session soon");
        }

        Ok(())
    }

    async fn handle_tool_calls(&mut self, calls: &[FunctionCall]) -> Result<()> {
        let observer = Arc::clone(&self.observer);
        let mut mode = self.mode;
        let acks = self.modes.handle_batch(calls, |next| {
            mode = next;
            observer.on_mode_change(next);
        });
        self.mode = mode;

        if acks.is_empty() {
            return Ok(());
        }
        match self.live.as_mut() {
            Some(live) => live
                .link
                .send_tool_response(acks)
                .await
                .map_err(into_connection_error),
            None => Ok(()),
        }
    }

    /// Decode and enqueue one audio part; failures drop the chunk only
    fn play_blob(&mut self, blob: &Blob) {
        let Some(live) = self.live.as_mut() else {
            return;
        };

        let sample_rate = blob.sample_rate().unwrap_or(self.config.output_sample_rate);
        let chunk = codec::from_base64(&blob.data)
            .and_then(|bytes| codec::decode(&bytes, sample_rate, 1));

        match chunk {
            Ok(chunk) => {
                if let Err(e) = live.playback.enqueue(chunk) {
                    tracing::warn!(error = %e, "dropping audio chunk the output refused");
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    len = blob.data.len(),
                    "dropping undecodable audio chunk"
                );
            }
        }
    }

    /// Release everything and report a fatal error
    async fn fail(&mut self, error: Error) -> Result<()> {
        self.teardown().await;
        self.state = SessionState::Failed;
        self.mode = AssistantMode::General;
        tracing::error!(error = %error, "session failed");
        self.observer.on_error(&error);
        Err(error)
    }

    /// Stop playback, release both devices and close the link
    async fn teardown(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };

        live.playback.interrupt();
        live.input.stop();
        live.playback.shutdown();
        if let Err(e) = live.link.close().await {
            tracing::debug!(error = %e, "error closing live link");
        }
        tracing::debug!("session resources released");
    }

    /// End the session and release every device
    ///
    /// Idempotent: a no-op when idle or already closed, and resets a failed
    /// session to `Closed`.
    pub async fn disconnect(&mut self) {
        let span = self.span.clone();
        async {
            match self.state {
                SessionState::Idle | SessionState::Closed => {
                    tracing::debug!(state = ?self.state, "disconnect: nothing to release");
                }
                SessionState::Connecting | SessionState::Open | SessionState::Failed => {
                    let was_open = self.state == SessionState::Open;
                    self.teardown().await;
                    self.state = SessionState::Closed;
                    self.mode = AssistantMode::General;
                    tracing::info!("session disconnected");
                    if was_open {
                        self.observer.on_close("client disconnected");
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }
}

fn into_connection_error(error: Error) -> Error {
    match error {
        Error::Connection(_) => error,
        other => Error::Connection(other.to_string()),
    }
}
