//! Voicelink - Real-time bidirectional voice sessions with AI endpoints
//!
//! This library provides the core functionality for a live voice session:
//! - Microphone capture and PCM16 framing
//! - Duplex WebSocket transport to the inference endpoint
//! - Ordered playback of response audio with barge-in interruption
//! - Session lifecycle with mute, level metering, and transcription history
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   LiveSession                        │
//! │   start/stop  │  mute  │  level  │  transcripts     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Session worker                       │
//! │   Capture ──► PCM16 encode ──► WsTransport ──►      │
//! │   ◄── PlaybackQueue ◄── PCM16 decode ◄── events     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │          Inference endpoint (WebSocket)              │
//! │   setup  │  realtimeInput  │  serverContent         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod history;
pub mod session;
pub mod transport;

pub use audio::{
    CAPTURE_SAMPLE_RATE, CaptureSource, CapturedBlock, DEFAULT_BLOCK_SIZE, LevelCell,
    PLAYBACK_SAMPLE_RATE, PlaybackQueue, PlaybackSink, WireFrame, pcm_mime_type, rms_level,
};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use history::{EntryRole, HistoryEntry, HistoryStore, SharedHistory, SqliteHistory};
pub use session::{LiveSession, SessionState, Transcript};
pub use transport::{DEFAULT_ENDPOINT, ServerEvent, WsTransport};
