//! WebSocket transport for the live endpoint

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::protocol::{
    ClientMessage, FunctionResponse, RealtimeInput, ServerMessage, Setup, ToolResponse,
};
use super::transport::{Credentials, Inbound, LiveLink, Transport};
use crate::config::SessionConfig;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens live sessions over a WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    endpoint: Url,
    timeout: Duration,
    input_sample_rate: u32,
}

impl WebSocketTransport {
    /// Create a transport for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns a config error if the endpoint is not a valid URL
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", config.endpoint)))?;

        Ok(Self {
            endpoint,
            timeout: config.connect_timeout,
            input_sample_rate: config.input_sample_rate,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &mut self,
        credentials: &Credentials,
        setup: &Setup,
    ) -> Result<(Box<dyn LiveLink>, mpsc::UnboundedReceiver<Inbound>)> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", credentials.api_key().expose_secret());

        tracing::debug!(endpoint = %self.endpoint, model = %setup.model, "opening live session");

        let (ws, _response) = tokio::time::timeout(self.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::Connection("timed out connecting".to_string()))??;
        let (mut sink, mut stream) = ws.split();

        let payload = serde_json::to_string(&ClientMessage::Setup(setup.clone()))?;
        sink.send(Message::Text(payload.into())).await?;

        tokio::time::timeout(self.timeout, await_setup_complete(&mut stream))
            .await
            .map_err(|_| Error::Connection("timed out waiting for setup".to_string()))??;

        tracing::debug!("live session setup complete");

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(stream, tx));

        Ok((
            Box::new(WebSocketLink {
                sink,
                reader,
                input_sample_rate: self.input_sample_rate,
                closed: false,
            }),
            rx,
        ))
    }
}

/// A decoded WebSocket frame
enum Frame {
    Message(ServerMessage),
    Closed(String),
    Skip,
}

fn classify(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => parse(text.as_str().as_bytes()),
        Message::Binary(bytes) => parse(&bytes),
        Message::Close(frame) => Frame::Closed(frame.map_or_else(
            || "closed by server".to_string(),
            |f| {
                if f.reason.as_str().is_empty() {
                    format!("closed with code {}", u16::from(f.code))
                } else {
                    f.reason.as_str().to_string()
                }
            },
        )),
        _ => Frame::Skip,
    }
}

fn parse(bytes: &[u8]) -> Frame {
    match ServerMessage::parse(bytes) {
        Ok(message) => Frame::Message(message),
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "skipping unparsable server frame");
            Frame::Skip
        }
    }
}

async fn await_setup_complete(stream: &mut SplitStream<WsStream>) -> Result<()> {
    while let Some(next) = stream.next().await {
        match classify(next?) {
            Frame::Message(message) if message.setup_complete.is_some() => return Ok(()),
            Frame::Message(_) | Frame::Skip => {}
            Frame::Closed(reason) => {
                return Err(Error::Connection(format!(
                    "closed during handshake: {reason}"
                )));
            }
        }
    }
    Err(Error::Connection("connection ended during handshake".to_string()))
}

async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::UnboundedSender<Inbound>) {
    while let Some(next) = stream.next().await {
        let event = match next {
            Ok(msg) => match classify(msg) {
                Frame::Message(message) => Inbound::Message(message),
                Frame::Closed(reason) => {
                    let _ = tx.send(Inbound::Closed(reason));
                    return;
                }
                Frame::Skip => continue,
            },
            Err(e) => {
                let _ = tx.send(Inbound::Failed(e.to_string()));
                return;
            }
        };

        if tx.send(event).is_err() {
            return;
        }
    }

    let _ = tx.send(Inbound::Closed("connection ended".to_string()));
}

struct WebSocketLink {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    input_sample_rate: u32,
    closed: bool,
}

impl WebSocketLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if self.closed {
            return Err(Error::Connection("session is closed".to_string()));
        }
        let payload = serde_json::to_string(message)?;
        self.sink.send(Message::Text(payload.into())).await?;
        Ok(())
    }
}

#[async_trait]
impl LiveLink for WebSocketLink {
    async fn send_audio_frame(&mut self, frame: &[u8]) -> Result<()> {
        let input = RealtimeInput::pcm(frame, self.input_sample_rate);
        self.send(&ClientMessage::RealtimeInput(input)).await
    }

    async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send(&ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        }))
        .await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.sink.send(Message::Close(None)).await;
        self.reader.abort();
        result?;
        Ok(())
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    #[test]
    fn test_binary_json_frames_are_parsed() {
        let frame = classify(Message::Binary(br#"{"setupComplete":{}}"#.to_vec().into()));
        assert!(matches!(frame, Frame::Message(m) if m.setup_complete.is_some()));
    }

    #[test]
    fn test_garbage_frames_are_skipped() {
        assert!(matches!(classify(Message::Text("not json".into())), Frame::Skip));
        assert!(matches!(classify(Message::Ping(Vec::new().into())), Frame::Skip));
    }

    #[test]
    fn test_close_reason() {
        let frame = classify(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "quota exceeded".into(),
        })));
        assert!(matches!(frame, Frame::Closed(reason) if reason == "quota exceeded"));

        let frame = classify(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })));
        assert!(matches!(frame, Frame::Closed(reason) if reason == "closed with code 1000"));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let config = SessionConfig {
            endpoint: "not a url".to_string(),
            ..SessionConfig::default()
        };
        assert!(matches!(WebSocketTransport::new(&config), Err(Error::Config(_))));
    }
}
