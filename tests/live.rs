//! Live session pipeline integration tests
//!
//! Tests the public surface without requiring audio hardware

use voicelink::audio::pcm;
use voicelink::{
    CAPTURE_SAMPLE_RATE, EntryRole, Error, HistoryEntry, HistoryStore, LiveSession, PlaybackQueue,
    SessionConfig, SessionState, SqliteHistory, pcm_mime_type, rms_level,
};

/// Initialize test logging; honors RUST_LOG, safe to call repeatedly
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (CAPTURE_SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / CAPTURE_SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

#[test]
fn test_pcm_roundtrip_preserves_sine() {
    let original = generate_sine_samples(440.0, 0.1, 0.8);

    let encoded = pcm::encode(&original);
    assert_eq!(encoded.len(), original.len() * 2);

    let decoded = pcm::decode(&encoded).unwrap();
    assert_eq!(decoded.len(), original.len());
    for (a, b) in original.iter().zip(decoded.iter()) {
        assert!((a - b).abs() <= 1.0 / 32767.0);
    }
}

#[test]
fn test_pcm_rejects_odd_byte_stream() {
    let mut encoded = pcm::encode(&generate_sine_samples(440.0, 0.01, 0.5));
    encoded.pop();
    assert!(matches!(pcm::decode(&encoded), Err(Error::Codec(_))));
}

#[test]
fn test_mime_type_follows_capture_rate() {
    assert_eq!(pcm_mime_type(16000), "audio/pcm;rate=16000");
    assert_eq!(pcm_mime_type(24000), "audio/pcm;rate=24000");
}

#[test]
fn test_sine_level_matches_expected_rms() {
    let samples = generate_sine_samples(440.0, 1.0, 1.0);
    let level = rms_level(&samples);
    assert!((level - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);

    let quiet = generate_sine_samples(440.0, 1.0, 0.1);
    assert!(rms_level(&quiet) < level);
}

#[test]
fn test_playback_queue_ordered_drain_and_flush() {
    let queue = PlaybackQueue::new();
    queue.enqueue(generate_sine_samples(200.0, 0.01, 0.5));
    queue.enqueue(generate_sine_samples(400.0, 0.01, 0.5));
    assert_eq!(queue.depth(), 2);

    // Drain part of the first frame, then flush mid-playback
    let mut out = vec![0.0; 16];
    queue.fill_into(&mut out, 1);
    queue.flush();
    assert!(queue.is_idle());

    // A frame enqueued after the flush plays from its first sample
    queue.enqueue(vec![0.9, 0.9]);
    let mut out = vec![0.0; 2];
    queue.fill_into(&mut out, 1);
    assert!((out[0] - 0.9).abs() < 0.001);
}

#[test]
fn test_history_records_conversation_order() {
    let store = SqliteHistory::open_in_memory().unwrap();

    let mut question = HistoryEntry::new("session-1", EntryRole::User, "what time is it?");
    let mut answer = HistoryEntry::new("session-1", EntryRole::Model, "it is noon");
    question.created_at = chrono::Utc::now() - chrono::Duration::seconds(1);
    answer.created_at = chrono::Utc::now();

    store.append(&question).unwrap();
    store.append(&answer).unwrap();

    let entries = store.list("session-1").unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, EntryRole::User);
    assert_eq!(entries[1].role, EntryRole::Model);
}

#[tokio::test]
async fn test_new_session_starts_idle() {
    init_tracing();
    let mut session = LiveSession::new();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_muted());
    assert!(!session.is_responding());
    assert!(session.level() < f32::EPSILON);
    assert!(session.session_id().is_none());

    // Stop with no session is a no-op
    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_mute_is_valid_in_any_state() {
    let session = LiveSession::new();

    session.mute();
    assert!(session.is_muted());
    session.mute();
    assert!(session.is_muted());
    session.unmute();
    assert!(!session.is_muted());
}

#[tokio::test]
async fn test_start_with_invalid_config_reports_error() {
    let mut session = LiveSession::new();
    let result = session.start(SessionConfig::new("")).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_start_with_unreachable_endpoint_reports_error() {
    // Requires audio hardware for the capture side, so only the
    // transport-refused path is asserted when a device exists; without
    // one the device error surfaces first. Either way start must fail
    // cleanly and stop must return the session to Idle.
    init_tracing();
    let mut config = SessionConfig::new("test-key");
    config.endpoint = "ws://127.0.0.1:9".to_string();

    let mut session = LiveSession::new();
    let result = session.start(config).await;
    assert!(result.is_err());
    assert!(matches!(session.state(), SessionState::Error(_)));

    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
}
