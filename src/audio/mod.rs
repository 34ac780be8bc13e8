//! Audio capture, playback, metering, and PCM16 framing

pub mod capture;
pub mod level;
pub mod pcm;
pub mod playback;

pub use capture::CaptureSource;
pub use level::{LevelCell, rms_level};
pub use pcm::{CapturedBlock, WireFrame, pcm_mime_type};
pub use playback::{PlaybackQueue, PlaybackSink};

/// Sample rate for microphone capture (16 kHz mono speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of response audio from the inference endpoint
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Default capture block size (100ms at 16 kHz)
pub const DEFAULT_BLOCK_SIZE: usize = 1600;
