//! Error types for voicelink

use thiserror::Error;

/// Result type alias for voicelink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a live voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture or playback device cannot be opened
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transport could not be opened (connect or setup handshake failed)
    #[error("transport open failed: {0}")]
    TransportOpen(String),

    /// Remote endpoint closed the connection. Normal terminal event,
    /// not an application error.
    #[error("transport closed by remote")]
    TransportClosed,

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame encode/decode fault (malformed sample block)
    #[error("codec error: {0}")]
    Codec(String),

    /// Session lifecycle error (e.g. start while already active)
    #[error("session error: {0}")]
    Session(String),

    /// History store error
    #[error("history error: {0}")]
    History(String),

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
