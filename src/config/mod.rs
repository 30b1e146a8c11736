//! Configuration management for the voice tutor

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::mode::{DEFAULT_TOOL_DESCRIPTION, DEFAULT_TOOL_NAME, ModeProtocol};
use crate::session::Credentials;
use crate::voice::{FRAME_SIZE, PLAYBACK_SAMPLE_RATE, SAMPLE_RATE};
use crate::{Error, Result};

pub use file::{TutorConfigFile, config_file_path, load_config_file};

/// Default live endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Puck";

/// Default connect and handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default system instruction
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly, patient tutor for school children. \
Keep answers short and spoken-friendly. You can work in four modes: GENERAL for open conversation, \
HOMEWORK for step-by-step homework help without giving away answers, GK_QUIZ for general knowledge \
quizzes, and SCIENCE for explaining science ideas and simple experiments. Whenever the conversation \
clearly moves into one of these, call the switch_mode tool with that mode before you answer.";

/// Voice tutor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the live endpoint
    pub api_key: Option<SecretString>,

    /// Session configuration
    pub session: SessionConfig,
}

/// Everything a session needs besides credentials
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint URL
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// System instruction text
    pub system_instruction: String,

    /// Name of the mode switch tool
    pub tool_name: String,

    /// Description of the mode switch tool
    pub tool_description: String,

    /// Microphone rate sent to the endpoint
    pub input_sample_rate: u32,

    /// Rate of audio received from the endpoint when the chunk omits one
    pub output_sample_rate: u32,

    /// Samples per capture frame
    pub frame_size: usize,

    /// Connect and handshake timeout
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            tool_name: DEFAULT_TOOL_NAME.to_string(),
            tool_description: DEFAULT_TOOL_DESCRIPTION.to_string(),
            input_sample_rate: SAMPLE_RATE,
            output_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Mode protocol handler for the configured tool
    #[must_use]
    pub fn mode_protocol(&self) -> ModeProtocol {
        ModeProtocol::new(&self.tool_name, &self.tool_description)
    }

    /// Reject values the pipeline cannot run with
    ///
    /// # Errors
    ///
    /// Returns a config error naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(Error::Config("frame_size must be non-zero".to_string()));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".to_string()));
        }
        if self.tool_name.trim().is_empty() {
            return Err(Error::Config("tool_name must not be empty".to_string()));
        }
        url::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        Ok(())
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a referenced file cannot be read or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = load_config_file(path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a referenced file cannot be read or a value is invalid
    pub fn from_sources<F>(fc: TutorConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SessionConfig::default();

        let api_key = env("GEMINI_API_KEY")
            .or(fc.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let instruction_file = env("TUTOR_SYSTEM_INSTRUCTION_FILE")
            .map(std::path::PathBuf::from)
            .or(fc.session.system_instruction_file);
        let system_instruction = match instruction_file {
            Some(path) => std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!(
                    "failed to read system instruction {}: {e}",
                    path.display()
                ))
            })?,
            None => fc
                .session
                .system_instruction
                .unwrap_or(defaults.system_instruction),
        };

        let session = SessionConfig {
            endpoint: env("TUTOR_ENDPOINT")
                .or(fc.session.endpoint)
                .unwrap_or(defaults.endpoint),
            model: env("TUTOR_MODEL")
                .or(fc.session.model)
                .unwrap_or(defaults.model),
            voice: env("TUTOR_VOICE")
                .or(fc.session.voice)
                .unwrap_or(defaults.voice),
            system_instruction,
            tool_name: fc.session.tool_name.unwrap_or(defaults.tool_name),
            tool_description: fc
                .session
                .tool_description
                .unwrap_or(defaults.tool_description),
            input_sample_rate: fc
                .audio
                .input_sample_rate
                .unwrap_or(defaults.input_sample_rate),
            output_sample_rate: fc
                .audio
                .output_sample_rate
                .unwrap_or(defaults.output_sample_rate),
            frame_size: fc.audio.frame_size.unwrap_or(defaults.frame_size),
            connect_timeout: fc
                .session
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
        };

        session.validate()?;

        Ok(Self { api_key, session })
    }

    /// Credentials for opening a session
    ///
    /// # Errors
    ///
    /// Returns a config error if no API key is configured
    pub fn credentials(&self) -> Result<Credentials> {
        self.api_key
            .clone()
            .map(Credentials::new)
            .ok_or_else(|| {
                Error::Config(
                    "no API key configured (set GEMINI_API_KEY or api_key in config.toml)"
                        .to_string(),
                )
            })
    }
}
