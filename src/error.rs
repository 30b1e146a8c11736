//! Error types for the voice tutor client

use thiserror::Error;

/// Result type alias for voice tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice tutor client
#[derive(Debug, Error)]
pub enum Error {
    /// The user declined microphone access
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device exists
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transport, handshake or endpoint-reported failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or truncated audio chunk
    #[error("decode error: {0}")]
    Decode(String),

    /// Tool call named a mode outside the known set
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio backend error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error ends the session it occurred in
    ///
    /// Decode and mode errors are recovered per chunk or per tool call.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_) | Self::InvalidMode(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Self::Decode(err.to_string())
    }
}
