//! Transport seam between the orchestrator and the remote endpoint

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;

use super::protocol::{FunctionResponse, ServerMessage, Setup};
use crate::Result;

/// Credentials for the live endpoint
#[derive(Debug, Clone)]
pub struct Credentials {
    api_key: SecretString,
}

impl Credentials {
    /// Wrap an API key
    #[must_use]
    pub const fn new(api_key: SecretString) -> Self {
        Self { api_key }
    }

    /// The API key; expose only when building the request
    #[must_use]
    pub const fn api_key(&self) -> &SecretString {
        &self.api_key
    }
}

/// Event delivered by the transport after the handshake
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A parsed server message
    Message(ServerMessage),
    /// The endpoint closed the session
    Closed(String),
    /// The connection failed
    Failed(String),
}

/// Opens live sessions
#[async_trait]
pub trait Transport: Send {
    /// Connect, send `setup` and wait for the endpoint to acknowledge it
    ///
    /// The returned link is usable only after the handshake resolved; the
    /// receiver yields inbound events in arrival order.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the socket or handshake fails
    async fn open(
        &mut self,
        credentials: &Credentials,
        setup: &Setup,
    ) -> Result<(Box<dyn LiveLink>, mpsc::UnboundedReceiver<Inbound>)>;
}

/// Outbound half of an open session
#[async_trait]
pub trait LiveLink: Send {
    /// Send one PCM16 microphone frame
    ///
    /// # Errors
    ///
    /// Returns a connection error if the frame cannot be sent
    async fn send_audio_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Send tool call acknowledgements
    ///
    /// # Errors
    ///
    /// Returns a connection error if the response cannot be sent
    async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> Result<()>;

    /// Close the session
    ///
    /// # Errors
    ///
    /// Returns a connection error if the close handshake fails
    async fn close(&mut self) -> Result<()>;
}
