//! TOML configuration file loading
//!
//! Supports `~/.config/tutor-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TutorConfigFile {
    /// API key for the live endpoint
    #[serde(default)]
    pub api_key: Option<String>,

    /// Remote session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Audio pipeline configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Remote session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// WebSocket endpoint URL
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "models/gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Puck")
    pub voice: Option<String>,

    /// Inline system instruction
    pub system_instruction: Option<String>,

    /// File to read the system instruction from
    pub system_instruction_file: Option<PathBuf>,

    /// Name of the mode switch tool
    pub tool_name: Option<String>,

    /// Description of the mode switch tool
    pub tool_description: Option<String>,

    /// Connect and handshake timeout
    pub connect_timeout_secs: Option<u64>,
}

/// Audio pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per capture frame
    pub frame_size: Option<usize>,

    /// Microphone sample rate sent to the endpoint
    pub input_sample_rate: Option<u32>,

    /// Sample rate of audio received from the endpoint
    pub output_sample_rate: Option<u32>,
}

/// Load the TOML config file from `path`, or the standard path if `None`
///
/// Returns `TutorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> TutorConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return TutorConfigFile::default();
    };

    if !path.exists() {
        return TutorConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TutorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TutorConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/tutor-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("tutor-voice").join("config.toml"))
}
