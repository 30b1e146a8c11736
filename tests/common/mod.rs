//! Shared test utilities
//!
//! In-memory stand-ins for the audio devices and the live transport, so
//! sessions can be driven step by step without hardware or network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;

use tutor_voice::session::protocol::{FunctionResponse, ServerMessage, Setup};
use tutor_voice::voice::{
    AudioDevices, AudioInput, AudioOutput, CaptureTap, Completion, DecodedChunk, PlaybackId, codec,
};
use tutor_voice::{
    AssistantMode, Credentials, Error, Inbound, LiveLink, Result, SessionConfig, SessionObserver,
    Transport, VoiceSession,
};

/// Session wired to fakes
pub type TestSession = VoiceSession<FakeTransport, FakeDevices>;

/// Credentials accepted by the fake transport
#[must_use]
pub fn test_credentials() -> Credentials {
    Credentials::new(SecretString::from("test-key"))
}

/// Build a session plus handles on every fake it talks to
#[must_use]
pub fn test_session() -> (TestSession, FakeRemote, FakeDevices, Arc<RecordingObserver>) {
    let (transport, remote) = FakeTransport::new();
    let devices = FakeDevices::new();
    let observer = Arc::new(RecordingObserver::default());
    let session = VoiceSession::new(
        transport,
        devices.clone(),
        SessionConfig::default(),
        observer.clone(),
    );
    (session, remote, devices, observer)
}

/// Parse a server message from JSON
#[must_use]
pub fn server_message(json: &serde_json::Value) -> ServerMessage {
    ServerMessage::parse(json.to_string().as_bytes()).expect("invalid server message")
}

/// Model turn carrying one PCM chunk of `seconds` of silence at 24 kHz
#[must_use]
pub fn audio_message(seconds: f64) -> serde_json::Value {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let samples = vec![0.0f32; (24000.0 * seconds) as usize];
    serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": codec::to_base64(&codec::encode(&samples)),
                    }
                }]
            }
        }
    })
}

/// Tool call message with one `switch_mode` call per `(id, mode)` pair
#[must_use]
pub fn switch_mode_message(calls: &[(&str, &str)]) -> serde_json::Value {
    let calls: Vec<_> = calls
        .iter()
        .map(|(id, mode)| {
            serde_json::json!({ "id": id, "name": "switch_mode", "args": { "mode": mode } })
        })
        .collect();
    serde_json::json!({ "toolCall": { "functionCalls": calls } })
}

/// Everything the fake endpoint saw
#[derive(Debug, Default)]
pub struct LinkLog {
    pub opens: usize,
    pub setups: Vec<Setup>,
    pub frames: Vec<Vec<u8>>,
    pub tool_responses: Vec<Vec<FunctionResponse>>,
    pub closes: usize,
}

/// Test-side handle on the fake endpoint
#[derive(Clone)]
pub struct FakeRemote {
    pub log: Arc<Mutex<LinkLog>>,
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<Inbound>>>>,
    fail_open: Arc<Mutex<Option<Error>>>,
    fail_sends: Arc<AtomicBool>,
}

impl FakeRemote {
    /// Deliver an inbound event to the open session
    pub fn send(&self, event: Inbound) {
        let guard = self.inbound.lock().unwrap();
        guard
            .as_ref()
            .expect("no open session")
            .send(event)
            .expect("session dropped its receiver");
    }

    /// Deliver a server message parsed from JSON
    pub fn send_json(&self, json: &serde_json::Value) {
        self.send(Inbound::Message(server_message(json)));
    }

    /// Make the next `open` fail with `error`
    pub fn fail_next_open(&self, error: Error) {
        *self.fail_open.lock().unwrap() = Some(error);
    }

    /// Make every outbound send fail
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().frames.clone()
    }

    pub fn tool_responses(&self) -> Vec<Vec<FunctionResponse>> {
        self.log.lock().unwrap().tool_responses.clone()
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }
}

/// Transport that records the handshake and hands out [`FakeLink`]s
pub struct FakeTransport {
    remote: FakeRemote,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> (Self, FakeRemote) {
        let remote = FakeRemote {
            log: Arc::new(Mutex::new(LinkLog::default())),
            inbound: Arc::new(Mutex::new(None)),
            fail_open: Arc::new(Mutex::new(None)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        };
        (
            Self {
                remote: remote.clone(),
            },
            remote,
        )
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(
        &mut self,
        _credentials: &Credentials,
        setup: &Setup,
    ) -> Result<(Box<dyn LiveLink>, mpsc::UnboundedReceiver<Inbound>)> {
        if let Some(error) = self.remote.fail_open.lock().unwrap().take() {
            return Err(error);
        }

        {
            let mut log = self.remote.log.lock().unwrap();
            log.opens += 1;
            log.setups.push(setup.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.remote.inbound.lock().unwrap() = Some(tx);

        Ok((
            Box::new(FakeLink {
                log: Arc::clone(&self.remote.log),
                fail_sends: Arc::clone(&self.remote.fail_sends),
            }),
            rx,
        ))
    }
}

struct FakeLink {
    log: Arc<Mutex<LinkLog>>,
    fail_sends: Arc<AtomicBool>,
}

impl FakeLink {
    fn check(&self) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Connection("broken pipe".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LiveLink for FakeLink {
    async fn send_audio_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.check()?;
        self.log.lock().unwrap().frames.push(frame.to_vec());
        Ok(())
    }

    async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.check()?;
        self.log.lock().unwrap().tool_responses.push(responses);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// One chunk handed to the fake output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: PlaybackId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct DeviceLog {
    pub deny_microphone: bool,
    pub mic_requests: usize,
    pub mic_stops: usize,
    pub outputs_opened: usize,
    pub outputs_closed: usize,
    pub scheduled: Vec<Scheduled>,
    pub stopped: Vec<PlaybackId>,
    pub now: f64,
    tap: Option<CaptureTap>,
    pending: Vec<Completion>,
}

/// Microphone and speaker fakes sharing one log
#[derive(Clone, Default)]
pub struct FakeDevices {
    pub log: Arc<Mutex<DeviceLog>>,
}

impl FakeDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next microphone requests
    pub fn deny_microphone(&self) {
        self.log.lock().unwrap().deny_microphone = true;
    }

    /// Feed samples through the started capture tap
    pub fn push_samples(&self, samples: &[f32]) -> bool {
        let mut log = self.log.lock().unwrap();
        log.tap.as_mut().expect("capture not started").push(samples)
    }

    /// Whether a capture tap is attached
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.log.lock().unwrap().tap.is_some()
    }

    /// Move the output clock
    pub fn set_now(&self, now: f64) {
        self.log.lock().unwrap().now = now;
    }

    /// Report every pending chunk as finished
    pub fn finish_all(&self) -> usize {
        let pending = std::mem::take(&mut self.log.lock().unwrap().pending);
        let count = pending.len();
        for completion in pending {
            completion.finished();
        }
        count
    }

    #[must_use]
    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.log.lock().unwrap().scheduled.clone()
    }

    #[must_use]
    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.log.lock().unwrap().stopped.clone()
    }
}

#[async_trait]
impl AudioDevices for FakeDevices {
    async fn request_microphone(&mut self, _sample_rate: u32) -> Result<Box<dyn AudioInput>> {
        let mut log = self.log.lock().unwrap();
        log.mic_requests += 1;
        if log.deny_microphone {
            return Err(Error::PermissionDenied("user declined".to_string()));
        }
        Ok(Box::new(FakeInput {
            log: Arc::clone(&self.log),
        }))
    }

    async fn open_output(&mut self, _sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
        self.log.lock().unwrap().outputs_opened += 1;
        Ok(Box::new(FakeOutput {
            log: Arc::clone(&self.log),
            closed: false,
        }))
    }
}

struct FakeInput {
    log: Arc<Mutex<DeviceLog>>,
}

impl AudioInput for FakeInput {
    fn start(&mut self, tap: CaptureTap) -> Result<()> {
        self.log.lock().unwrap().tap = Some(tap);
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        if log.tap.take().is_some() {
            log.mic_stops += 1;
        }
    }
}

struct FakeOutput {
    log: Arc<Mutex<DeviceLog>>,
    closed: bool,
}

impl AudioOutput for FakeOutput {
    fn now(&self) -> f64 {
        self.log.lock().unwrap().now
    }

    fn schedule_at(
        &mut self,
        id: PlaybackId,
        start: f64,
        chunk: DecodedChunk,
        completion: Completion,
    ) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.scheduled.push(Scheduled {
            id,
            start,
            duration: chunk.duration(),
        });
        log.pending.push(completion);
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        let mut log = self.log.lock().unwrap();
        log.stopped.push(id);
        log.pending.retain(|completion| completion.id() != id);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().outputs_closed += 1;
        }
    }
}

/// Observer callback, as recorded
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Open,
    Close(String),
    Error(String),
    Level(f32),
    Mode(AssistantMode),
}

/// Observer that records every callback in order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().unwrap().clone()
    }

    #[must_use]
    pub fn levels(&self) -> Vec<f32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObserverEvent::Level(level) => Some(level),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn modes(&self) -> Vec<AssistantMode> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObserverEvent::Mode(mode) => Some(mode),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn count(&self, pred: impl Fn(&ObserverEvent) -> bool) -> usize {
        self.events().iter().filter(|&event| pred(event)).count()
    }

    fn record(&self, event: ObserverEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_open(&self) {
        self.record(ObserverEvent::Open);
    }

    fn on_close(&self, reason: &str) {
        self.record(ObserverEvent::Close(reason.to_string()));
    }

    fn on_error(&self, error: &Error) {
        self.record(ObserverEvent::Error(error.to_string()));
    }

    fn on_audio_level(&self, volume: f32) {
        self.record(ObserverEvent::Level(volume));
    }

    fn on_mode_change(&self, mode: AssistantMode) {
        self.record(ObserverEvent::Mode(mode));
    }
}
