//! WebSocket transport for the live session
//!
//! Connects to the inference endpoint, performs the setup handshake, and
//! splits into a writer task (outbound frames, strict FIFO) and a reader
//! task (inbound events, delivery order preserved). Both directions
//! progress independently; sends queue behind one another rather than
//! interleave.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio::WireFrame;
use crate::config::SessionConfig;
use crate::transport::{ServerEvent, wire};
use crate::{Error, Result};

/// Time allowed for the setup handshake to complete
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a graceful close before tasks are aborted
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Duplex channel to the remote endpoint
///
/// Created by [`connect`]; owns the writer and reader tasks for the
/// lifetime of the session.
pub struct WsTransport {
    outbound: UnboundedSender<WireFrame>,
    events: Option<UnboundedReceiver<ServerEvent>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Sender for outbound frames
    ///
    /// Frames are transmitted in the exact order they are sent here.
    #[must_use]
    pub fn frame_sender(&self) -> UnboundedSender<WireFrame> {
        self.outbound.clone()
    }

    /// Take the inbound event receiver; yields `None` on second call
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<ServerEvent>> {
        self.events.take()
    }

    /// Close the connection
    ///
    /// Dropping the outbound channel lets the writer send a close frame
    /// once every frame sender clone is gone; both tasks are given a
    /// grace period, then aborted.
    pub async fn close(self) {
        let Self {
            outbound,
            events,
            mut writer,
            mut reader,
        } = self;
        drop(outbound);
        drop(events);

        if timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
        if timeout(CLOSE_TIMEOUT, &mut reader).await.is_err() {
            reader.abort();
        }

        tracing::debug!("transport closed");
    }
}

/// Connect to the endpoint and perform the setup handshake
///
/// Resolves once the endpoint acknowledges the session configuration, so
/// a successful return means the transport is open and live.
///
/// # Errors
///
/// Returns [`Error::TransportOpen`] if the connection, the handshake
/// send, or the acknowledgement fails or times out.
pub async fn connect(config: &SessionConfig) -> Result<WsTransport> {
    let url = format!(
        "{}?key={}",
        config.endpoint,
        config.api_key.expose_secret()
    );

    let (mut socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| Error::TransportOpen(e.to_string()))?;

    tracing::debug!(endpoint = %config.endpoint, model = %config.model, "websocket connected");

    let setup = wire::setup_message(config)?;
    socket
        .send(Message::Text(setup))
        .await
        .map_err(|e| Error::TransportOpen(e.to_string()))?;

    // Events that arrive before the acknowledgement are forwarded after
    // the channels exist.
    let mut early_events = Vec::new();

    timeout(SETUP_TIMEOUT, async {
        while let Some(message) = socket.next().await {
            let message = message.map_err(|e| Error::TransportOpen(e.to_string()))?;
            let payload = match &message {
                Message::Text(text) => text.as_bytes(),
                Message::Binary(bytes) => bytes.as_slice(),
                Message::Close(_) => {
                    return Err(Error::TransportOpen(
                        "connection closed during setup".to_string(),
                    ));
                }
                _ => continue,
            };

            match wire::parse_server_message(payload) {
                Ok(parsed) => {
                    early_events.extend(parsed.events);
                    if parsed.setup_complete {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable message during setup");
                }
            }
        }
        Err(Error::TransportOpen(
            "connection ended during setup".to_string(),
        ))
    })
    .await
    .map_err(|_| Error::TransportOpen("setup handshake timed out".to_string()))??;

    tracing::debug!("setup acknowledged, session live");

    let (outbound_tx, outbound_rx) = unbounded_channel();
    let (events_tx, events_rx) = unbounded_channel();

    for event in early_events {
        let _ = events_tx.send(event);
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(run_writer(sink, outbound_rx));
    let reader = tokio::spawn(run_reader(stream, events_tx));

    Ok(WsTransport {
        outbound: outbound_tx,
        events: Some(events_rx),
        writer,
        reader,
    })
}

/// Drain outbound frames into the socket, preserving send order
async fn run_writer(mut sink: WsSink, mut outbound: UnboundedReceiver<WireFrame>) {
    while let Some(frame) = outbound.recv().await {
        let message = match wire::realtime_input_message(&frame) {
            Ok(json) => Message::Text(json),
            Err(e) => {
                tracing::warn!(seq = frame.seq, error = %e, "dropping unencodable frame");
                continue;
            }
        };

        if let Err(e) = sink.send(message).await {
            tracing::debug!(error = %e, "outbound send failed, writer stopping");
            return;
        }
        tracing::trace!(seq = frame.seq, bytes = frame.data.len(), "frame sent");
    }

    // Producer side dropped the channel: graceful local close
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.flush().await;
}

/// Deliver inbound messages as ordered events
async fn run_reader(mut stream: WsStream, events: UnboundedSender<ServerEvent>) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                let _ = events.send(ServerEvent::Error(e.to_string()));
                return;
            }
        };

        let payload = match &message {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(bytes) => bytes.as_slice(),
            Message::Close(_) => {
                let _ = events.send(ServerEvent::Closed);
                return;
            }
            _ => continue,
        };

        match wire::parse_server_message(payload) {
            Ok(parsed) => {
                for event in parsed.events {
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "unparseable server message");
            }
        }
    }

    let _ = events.send(ServerEvent::Closed);
}
