//! Live session controller
//!
//! Orchestrates capture → encode → send and receive → decode → queue →
//! play, plus interruption and lifecycle. One worker task multiplexes the
//! capture-block channel and the transport event channel, so there is a
//! single authoritative state value and no reachable inconsistent
//! combination of connection, device, and queue state.
//!
//! State machine: `Idle → Connecting → Active → Closing → Idle`, with
//! `Error` reachable from `Connecting` or `Active`; the only transition
//! out of `Error` is back to `Idle` via `stop()`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{
    CaptureSource, CapturedBlock, LevelCell, PlaybackQueue, PlaybackSink, WireFrame, pcm,
    pcm_mime_type, rms_level,
};
use crate::config::SessionConfig;
use crate::history::{EntryRole, HistoryEntry, SharedHistory};
use crate::transport::{ServerEvent, WsTransport, ws};
use crate::{Error, Result};

/// Connection state of the live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session; resources released
    Idle,
    /// Opening devices and transport
    Connecting,
    /// Streaming in both directions
    Active,
    /// Teardown in progress
    Closing,
    /// Terminal failure; `stop()` returns to `Idle`
    Error(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Error(cause) => write!(f, "error: {cause}"),
        }
    }
}

/// A transcription segment surfaced to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Which side of the conversation was transcribed
    pub role: EntryRole,
    pub text: String,
}

/// State shared between the controller handle and the worker task
struct Shared {
    state: watch::Sender<SessionState>,
    muted: AtomicBool,
    responding: AtomicBool,
    /// Cleared the moment stop is requested; in-flight callbacks check
    /// this before sending or enqueueing
    live: AtomicBool,
    seq: AtomicU64,
    level: LevelCell,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(SessionState::Idle),
            muted: AtomicBool::new(false),
            responding: AtomicBool::new(false),
            live: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            level: LevelCell::new(),
        }
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(state = %state, "session state");
        self.state.send_replace(state);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

struct ActiveSession {
    session_id: String,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// The live voice session controller
///
/// Exclusively owns the capture device, playback device, and transport
/// for its session. At most one session is active per controller; `start`
/// while active is an error, `stop` is idempotent.
pub struct LiveSession {
    shared: Arc<Shared>,
    history: Option<SharedHistory>,
    transcripts: Option<UnboundedReceiver<Transcript>>,
    active: Option<ActiveSession>,
}

impl Default for LiveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSession {
    /// Create an idle controller
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            history: None,
            transcripts: None,
            active: None,
        }
    }

    /// Attach a history store; transcription segments are appended to it
    /// under the session id
    #[must_use]
    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Id of the active session, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    /// Stop forwarding captured audio, starting with the next block
    ///
    /// Capture keeps running so the level meter stays live and unmuting
    /// is instant. Valid in any state.
    pub fn mute(&self) {
        self.shared.muted.store(true, Ordering::SeqCst);
    }

    /// Resume forwarding captured audio
    pub fn unmute(&self) {
        self.shared.muted.store(false, Ordering::SeqCst);
    }

    /// Whether the outbound path is muted
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Latest captured audio level (RMS, roughly [0, 1])
    ///
    /// Safe to poll from a UI thread; plain atomic read.
    #[must_use]
    pub fn level(&self) -> f32 {
        self.shared.level.get()
    }

    /// Whether response audio is currently arriving or playing
    #[must_use]
    pub fn is_responding(&self) -> bool {
        self.shared.responding.load(Ordering::SeqCst)
    }

    /// Take the transcript receiver; yields `None` on second call
    pub fn take_transcripts(&mut self) -> Option<UnboundedReceiver<Transcript>> {
        self.transcripts.take()
    }

    /// Start a live session
    ///
    /// Opens the capture device and the transport concurrently; if either
    /// fails the other is closed again, the state becomes `Error`, and
    /// the error is returned — a failed start never leaves a half-open
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if a session is already active,
    /// [`Error::Config`] for an invalid configuration,
    /// [`Error::DeviceUnavailable`] or [`Error::TransportOpen`] for
    /// resource failures.
    pub async fn start(&mut self, config: SessionConfig) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Session("a session is already active".to_string()));
        }
        config.validate()?;

        self.shared.set_state(SessionState::Connecting);

        // Capture and transport open concurrently; either failure aborts
        // the other.
        let sample_rate = config.capture_sample_rate;
        let block_size = config.block_size;
        let capture_task =
            tokio::task::spawn_blocking(move || CaptureSource::open(sample_rate, block_size));
        let (capture_result, transport_result) = tokio::join!(capture_task, ws::connect(&config));

        let capture_result = capture_result
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))
            .and_then(|r| r);

        let (capture, blocks, mut transport) = match (capture_result, transport_result) {
            (Ok((capture, blocks)), Ok(transport)) => (capture, blocks, transport),
            (Ok((capture, _)), Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || capture.close()).await;
                return Err(self.fail_start(e));
            }
            (Err(e), Ok(transport)) => {
                transport.close().await;
                return Err(self.fail_start(e));
            }
            (Err(e), Err(transport_err)) => {
                tracing::debug!(error = %transport_err, "transport also failed during start");
                return Err(self.fail_start(e));
            }
        };

        let queue = PlaybackQueue::new();
        let playback_queue = queue.clone();
        let playback_rate = config.playback_sample_rate;
        let playback = match tokio::task::spawn_blocking(move || {
            PlaybackSink::open(playback_queue, playback_rate)
        })
        .await
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))
        .and_then(|r| r)
        {
            Ok(playback) => playback,
            Err(e) => {
                let _ = tokio::task::spawn_blocking(move || capture.close()).await;
                transport.close().await;
                return Err(self.fail_start(e));
            }
        };

        let Some(events) = transport.take_events() else {
            // Same ordered cleanup as the other failure arms
            let _ = tokio::task::spawn_blocking(move || capture.close()).await;
            transport.close().await;
            let _ = tokio::task::spawn_blocking(move || playback.close()).await;
            return Err(self.fail_start(Error::Transport(
                "transport events already consumed".to_string(),
            )));
        };
        let outbound = transport.frame_sender();

        let session_id = Uuid::new_v4().to_string();
        let (transcripts_tx, transcripts_rx) = unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.shared.seq.store(0, Ordering::SeqCst);
        self.shared.responding.store(false, Ordering::SeqCst);
        self.shared.live.store(true, Ordering::SeqCst);

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            mime_type: pcm_mime_type(config.capture_sample_rate),
            block_size: config.block_size,
            blocks,
            blocks_open: true,
            events,
            outbound: Some(outbound),
            queue,
            transcripts: transcripts_tx,
            history: self.history.clone(),
            session_id: session_id.clone(),
            shutdown: shutdown_rx,
            capture: Some(capture),
            playback: Some(playback),
            transport: Some(transport),
        };

        let handle = tokio::spawn(worker.run());

        self.transcripts = Some(transcripts_rx);
        self.active = Some(ActiveSession {
            session_id: session_id.clone(),
            shutdown: shutdown_tx,
            worker: handle,
        });
        self.shared.set_state(SessionState::Active);

        tracing::info!(session_id = %session_id, "live session started");
        Ok(())
    }

    /// Stop the session and release all resources
    ///
    /// Teardown order: capture first (no further outbound frames), then
    /// transport, then playback and queue, then level reset. Idempotent:
    /// calling from `Idle` is a no-op; calling from `Error` completes the
    /// transition back to `Idle`. Safe to race against event processing —
    /// stop takes precedence.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            if matches!(self.state(), SessionState::Error(_)) {
                self.shared.set_state(SessionState::Idle);
            }
            return;
        };

        // After a remote-initiated failure the worker has already
        // published Error; the only transition out of Error is Idle.
        if !matches!(self.state(), SessionState::Error(_)) {
            self.shared.set_state(SessionState::Closing);
        }
        self.shared.live.store(false, Ordering::SeqCst);
        let _ = active.shutdown.send(true);
        let _ = active.worker.await;

        self.shared.set_state(SessionState::Idle);
        tracing::info!(session_id = %active.session_id, "live session stopped");
    }

    fn fail_start(&self, error: Error) -> Error {
        self.shared.set_state(SessionState::Error(error.to_string()));
        error
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            // Best effort: let the detached worker tear the session down
            self.shared.live.store(false, Ordering::SeqCst);
            let _ = active.shutdown.send(true);
        }
    }
}

/// Why the worker loop ended
enum ExitReason {
    /// Local stop request; `stop()` finalizes the state
    Shutdown,
    /// Remote endpoint closed the connection
    RemoteClosed,
    /// Transport failure
    TransportError(String),
}

/// The session worker: one task, both directions
struct Worker {
    shared: Arc<Shared>,
    mime_type: String,
    block_size: usize,
    blocks: UnboundedReceiver<CapturedBlock>,
    blocks_open: bool,
    events: UnboundedReceiver<ServerEvent>,
    outbound: Option<UnboundedSender<WireFrame>>,
    queue: PlaybackQueue,
    transcripts: UnboundedSender<Transcript>,
    history: Option<SharedHistory>,
    session_id: String,
    shutdown: watch::Receiver<bool>,
    capture: Option<CaptureSource>,
    playback: Option<PlaybackSink>,
    transport: Option<WsTransport>,
}

impl Worker {
    async fn run(mut self) {
        let exit = self.event_loop().await;
        self.teardown().await;

        match exit {
            ExitReason::Shutdown => {}
            ExitReason::RemoteClosed => {
                // Normal terminal event, not an application error
                tracing::debug!(session_id = %self.session_id, "transport closed by remote");
                self.shared
                    .set_state(SessionState::Error(Error::TransportClosed.to_string()));
            }
            ExitReason::TransportError(cause) => {
                tracing::error!(session_id = %self.session_id, error = %cause, "transport failed");
                self.shared.set_state(SessionState::Error(cause));
            }
        }
    }

    async fn event_loop(&mut self) -> ExitReason {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => return ExitReason::Shutdown,

                block = self.blocks.recv(), if self.blocks_open => {
                    match block {
                        Some(block) => self.handle_block(&block),
                        None => self.blocks_open = false,
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            if let Some(exit) = self.handle_event(event) {
                                return exit;
                            }
                        }
                        None => return ExitReason::RemoteClosed,
                    }
                }
            }
        }
    }

    /// Capture path: level always, encode+send only when live and unmuted
    fn handle_block(&self, block: &CapturedBlock) {
        self.shared.level.set(rms_level(&block.samples));

        if !self.shared.is_live() || self.shared.muted.load(Ordering::SeqCst) {
            return;
        }

        if block.samples.len() != self.block_size {
            tracing::warn!(
                got = block.samples.len(),
                expected = self.block_size,
                "dropping malformed capture block"
            );
            return;
        }

        let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst);
        let frame = WireFrame {
            seq,
            data: pcm::encode(&block.samples),
            mime_type: self.mime_type.clone(),
        };

        if let Some(outbound) = &self.outbound
            && outbound.send(frame).is_err()
        {
            tracing::debug!("outbound channel closed, frame dropped");
        }
    }

    /// Inbound path: decode → queue, plus interruption and lifecycle
    fn handle_event(&mut self, event: ServerEvent) -> Option<ExitReason> {
        match event {
            ServerEvent::AudioChunk(bytes) => match pcm::decode(&bytes) {
                Ok(samples) => {
                    if self.shared.is_live() {
                        self.queue.enqueue(samples);
                        self.shared.responding.store(true, Ordering::SeqCst);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed audio chunk");
                }
            },
            ServerEvent::Interrupted => {
                // Barge-in: stop playback immediately; capture continues
                self.queue.flush();
                self.shared.responding.store(false, Ordering::SeqCst);
                tracing::debug!("response interrupted by user speech");
            }
            ServerEvent::TurnComplete => {
                self.shared.responding.store(false, Ordering::SeqCst);
                tracing::debug!("turn complete");
            }
            ServerEvent::InputTranscript(text) => {
                self.record_transcript(EntryRole::User, text);
            }
            ServerEvent::OutputTranscript(text) => {
                self.record_transcript(EntryRole::Model, text);
            }
            ServerEvent::Closed => return Some(ExitReason::RemoteClosed),
            ServerEvent::Error(cause) => return Some(ExitReason::TransportError(cause)),
        }
        None
    }

    fn record_transcript(&self, role: EntryRole, text: String) {
        let _ = self.transcripts.send(Transcript {
            role,
            text: text.clone(),
        });

        if let Some(history) = &self.history {
            let entry = HistoryEntry::new(self.session_id.clone(), role, text);
            if let Err(e) = history.append(&entry) {
                // History is best effort; never fatal to the session
                tracing::warn!(error = %e, "failed to append transcript to history");
            }
        }
    }

    /// All-or-nothing teardown, same order on every exit path
    async fn teardown(&mut self) {
        self.shared.live.store(false, Ordering::SeqCst);

        // 1. Stop capture: guarantees no further outbound frames
        if let Some(capture) = self.capture.take() {
            let _ = tokio::task::spawn_blocking(move || capture.close()).await;
        }

        // 2. Close transport (our frame sender must go first so the
        //    writer can emit its close frame)
        self.outbound.take();
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }

        // 3. Release playback and clear the queue
        if let Some(playback) = self.playback.take() {
            let _ = tokio::task::spawn_blocking(move || playback.close()).await;
        }
        self.queue.flush();

        // 4. Reset observable session outputs
        self.shared.level.reset();
        self.shared.responding.store(false, Ordering::SeqCst);

        tracing::debug!(session_id = %self.session_id, "session resources released");
    }
}
