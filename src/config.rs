//! Live session configuration
//!
//! A [`SessionConfig`] is a plain struct with working defaults; an
//! optional TOML file acts as a partial overlay, and the API key falls
//! back to the `GEMINI_API_KEY` environment variable. The key is held as
//! a [`SecretString`] so it never appears in debug output or logs.

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::audio::{CAPTURE_SAMPLE_RATE, DEFAULT_BLOCK_SIZE, PLAYBACK_SAMPLE_RATE};
use crate::transport::DEFAULT_ENDPOINT;
use crate::{Error, Result};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Default model for native-audio live sessions
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default voice for audio responses
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Default system instruction
const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful, friendly voice assistant. Keep your responses concise and conversational.";

/// Configuration for one live voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the inference service
    pub endpoint: String,

    /// Capability credential, treated as opaque
    pub api_key: SecretString,

    /// Model identifier
    pub model: String,

    /// Voice for audio responses
    pub voice: String,

    /// System instruction string
    pub system_instruction: String,

    /// Request transcription of captured speech
    pub transcribe_input: bool,

    /// Request transcription of response audio
    pub transcribe_output: bool,

    /// Microphone sample rate in Hz
    pub capture_sample_rate: u32,

    /// Response audio sample rate in Hz
    pub playback_sample_rate: u32,

    /// Samples per captured block
    pub block_size: usize,
}

impl SessionConfig {
    /// Create a configuration with defaults and the given API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: SecretString::from(api_key.into()),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            transcribe_input: true,
            transcribe_output: true,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Create a configuration from the `GEMINI_API_KEY` environment variable
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::Config(format!("{API_KEY_ENV} is not set")))?;
        let config = Self::new(key);
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    ///
    /// All fields are optional; the file is a partial overlay on top of
    /// defaults. If the file carries no key, `GEMINI_API_KEY` is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if no
    /// API key is available after the overlay.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let overlay: ConfigFile = toml::from_str(&raw)?;

        let key = match overlay.api_key {
            Some(ref key) if !key.is_empty() => key.clone(),
            _ => std::env::var(API_KEY_ENV).unwrap_or_default(),
        };

        let mut config = Self::new(key);
        if let Some(endpoint) = overlay.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(model) = overlay.model {
            config.model = model;
        }
        if let Some(voice) = overlay.voice {
            config.voice = voice;
        }
        if let Some(instruction) = overlay.system_instruction {
            config.system_instruction = instruction;
        }
        if let Some(transcribe_input) = overlay.transcribe_input {
            config.transcribe_input = transcribe_input;
        }
        if let Some(transcribe_output) = overlay.transcribe_output {
            config.transcribe_output = transcribe_output;
        }
        if let Some(block_size) = overlay.block_size {
            config.block_size = block_size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration before a session start
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.expose_secret().is_empty() {
            return Err(Error::Config("API key is required".to_string()));
        }
        if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            return Err(Error::Config(format!(
                "endpoint must be a ws:// or wss:// URL, got {}",
                self.endpoint
            )));
        }
        if self.model.is_empty() {
            return Err(Error::Config("model is required".to_string()));
        }
        if self.block_size == 0 {
            return Err(Error::Config("block size must be non-zero".to_string()));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// TOML configuration file schema (partial overlay)
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    endpoint: Option<String>,

    #[serde(default)]
    api_key: Option<String>,

    #[serde(default)]
    model: Option<String>,

    #[serde(default)]
    voice: Option<String>,

    #[serde(default)]
    system_instruction: Option<String>,

    #[serde(default)]
    transcribe_input: Option<bool>,

    #[serde(default)]
    transcribe_output: Option<bool>,

    #[serde(default)]
    block_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new("test-key");
        assert_eq!(config.capture_sample_rate, 16000);
        assert_eq!(config.playback_sample_rate, 24000);
        assert_eq!(config.block_size, 1600);
        assert_eq!(config.voice, "Zephyr");
        assert!(config.transcribe_input);
        assert!(config.transcribe_output);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        let config = SessionConfig::new("");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_non_ws_endpoint_rejected() {
        let mut config = SessionConfig::new("key");
        config.endpoint = "https://example.com".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = SessionConfig::new("super-secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_file_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "api_key = \"file-key\"\nvoice = \"Puck\"\nblock_size = 3200\ntranscribe_output = false"
        )
        .unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api_key.expose_secret(), "file-key");
        assert_eq!(config.voice, "Puck");
        assert_eq!(config.block_size, 3200);
        assert!(!config.transcribe_output);
        // Untouched fields keep their defaults
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_file_with_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "voice = [unclosed").unwrap();
        assert!(matches!(
            SessionConfig::from_file(file.path()),
            Err(Error::Toml(_))
        ));
    }
}
