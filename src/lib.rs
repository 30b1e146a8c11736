//! Tutor Voice - Real-time voice tutor client
//!
//! This library provides the client side of a spoken tutoring session:
//! - PCM16 codec and microphone capture with level metering
//! - Gapless playback scheduling with barge-in
//! - Live session orchestration over a bidirectional WebSocket
//! - Assistant mode switching driven by model tool calls
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Binary (tutor)                    │
//! │       run  │  test-mic  │  test-speaker             │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  VoiceSession                        │
//! │   Capture  │  Playback  │  ModeProtocol  │  Link    │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼───────────┐   ┌─────────────▼────────────┐
//! │   cpal devices       │   │   Live endpoint (wss)    │
//! └──────────────────────┘   └──────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod mode;
pub mod session;
pub mod voice;

pub use config::{Config, SessionConfig};
pub use error::{Error, Result};
pub use mode::{AssistantMode, ModeProtocol};
pub use session::{
    Credentials, Inbound, LiveLink, NoopObserver, SessionObserver, SessionState, Transport,
    VoiceSession, WebSocketTransport,
};
