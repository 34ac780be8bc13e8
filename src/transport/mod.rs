//! Duplex transport to the remote inference endpoint

pub mod wire;
pub mod ws;

pub use ws::WsTransport;

/// Default live-session WebSocket endpoint (Gemini Live API,
/// `BidiGenerateContent`)
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// An event delivered by the transport, in the order the remote endpoint
/// emitted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Response audio, PCM16-LE bytes
    AudioChunk(Vec<u8>),

    /// Transcription of the user's captured speech
    InputTranscript(String),

    /// Transcription of the model's response audio
    OutputTranscript(String),

    /// The endpoint detected the user speaking over a response; local
    /// playback must stop immediately
    Interrupted,

    /// The current response has fully arrived
    TurnComplete,

    /// The remote endpoint closed the connection
    Closed,

    /// Transport failure
    Error(String),
}
