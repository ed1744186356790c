//! WebSocket transport and socket task.
//!
//! [`Transport::connect`] returns immediately with a handle and an event
//! receiver; a spawned task owns the socket and reports its lifecycle.
//!
//! # Socket Task
//!
//! The task handles:
//!
//! - The client handshake (bounded by a 30s connect timeout)
//! - Outgoing text frames from [`Transport::send`]
//! - Incoming frames, forwarded as [`TransportEvent::Message`]
//! - The close handshake, on either side
//!
//! Exactly one [`TransportEvent::Closed`] is delivered, and it is always
//! the last event.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Close code for a graceful, locally initiated close.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the peer's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the socket ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Timeout for the WebSocket client handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the peer to acknowledge our close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

// ============================================================================
// TransportState
// ============================================================================

/// Lifecycle state of a [`Transport`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Handshake in progress.
    Connecting = 0,
    /// Ready to send and receive.
    Open = 1,
    /// Close requested locally, handshake in progress.
    Closing = 2,
    /// Socket ended.
    Closed = 3,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Lifecycle events emitted by the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed; sends are now accepted.
    Opened,
    /// One inbound text frame.
    Message(String),
    /// A socket-level failure. Teardown follows only via [`Self::Closed`].
    Error(String),
    /// The socket ended.
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

// ============================================================================
// TransportCommand
// ============================================================================

/// Internal commands for the socket task.
#[derive(Debug)]
pub(crate) enum TransportCommand {
    /// Write one text frame.
    Send(String),
    /// Run the close handshake and stop.
    Close { code: u16, reason: String },
}

// ============================================================================
// Transport
// ============================================================================

/// Handle to one duplex WebSocket connection.
///
/// Cheap to clone; all clones drive the same socket task.
#[derive(Clone)]
pub struct Transport {
    /// Channel for sending commands to the socket task.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    /// Shared lifecycle state.
    state: Arc<AtomicU8>,
}

impl Transport {
    /// Starts connecting to `url`.
    ///
    /// Spawns the socket task internally and must be called within a
    /// tokio runtime. Progress is reported on the returned receiver.
    pub fn connect(url: Url) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(TransportState::Connecting as u8));

        tokio::spawn(Self::run_socket(
            url,
            command_rx,
            Arc::clone(&state),
            event_tx,
        ));

        (Self { command_tx, state }, event_rx)
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` if sends are currently accepted.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Queues one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] unless the transport is open.
    pub fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }

        self.command_tx
            .send(TransportCommand::Send(text))
            .map_err(|_| Error::NotOpen)
    }

    /// Requests a close with the given code and reason.
    ///
    /// Only the first call issues a close instruction; it returns `true`.
    /// Later calls, or calls after the socket ended, return `false`.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            match TransportState::from_u8(current) {
                TransportState::Closing | TransportState::Closed => return false,
                TransportState::Connecting | TransportState::Open => {}
            }

            match self.state.compare_exchange(
                current,
                TransportState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let reason = reason.into();
        debug!(code, %reason, "Transport close requested");

        let _ = self
            .command_tx
            .send(TransportCommand::Close { code, reason });
        true
    }

    /// Socket task: connect, then pump frames until either side closes.
    async fn run_socket(
        url: Url,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        state: Arc<AtomicU8>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (code, reason) = match Self::establish(&url, &mut command_rx).await {
            Ok(socket) => {
                if state
                    .compare_exchange(
                        TransportState::Connecting as u8,
                        TransportState::Open as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    info!(%url, "WebSocket connection established");
                    let _ = events.send(TransportEvent::Opened);
                }

                Self::pump(socket, &mut command_rx, &events).await
            }
            Err(Established::Aborted { code, reason }) => {
                debug!(%url, "Connect aborted by close request");
                (code, reason)
            }
            Err(Established::Failed(message)) => {
                warn!(%url, error = %message, "WebSocket connect failed");
                let _ = events.send(TransportEvent::Error(message.clone()));
                (ABNORMAL_CLOSURE, message)
            }
        };

        state.store(TransportState::Closed as u8, Ordering::Release);
        debug!(code, %reason, "Socket task terminated");
        let _ = events.send(TransportEvent::Closed { code, reason });
    }

    /// Runs the client handshake, honouring close requests meanwhile.
    async fn establish(
        url: &Url,
        command_rx: &mut mpsc::UnboundedReceiver<TransportCommand>,
    ) -> std::result::Result<Socket, Established> {
        let connecting = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()));
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(Ok((socket, _response))) => Ok(socket),
                        Ok(Err(e)) => Err(Established::Failed(e.to_string())),
                        Err(_) => Err(Established::Failed(format!(
                            "Connection timeout after {}ms",
                            CONNECT_TIMEOUT.as_millis()
                        ))),
                    };
                }

                command = command_rx.recv() => match command {
                    Some(TransportCommand::Close { code, reason }) => {
                        return Err(Established::Aborted { code, reason });
                    }
                    Some(TransportCommand::Send(_)) => {
                        warn!("Dropping frame queued before the socket opened");
                    }
                    None => {
                        return Err(Established::Aborted {
                            code: NORMAL_CLOSURE,
                            reason: "Transport dropped".to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Frame loop for an open socket. Returns the final close code and reason.
    async fn pump(
        socket: Socket,
        command_rx: &mut mpsc::UnboundedReceiver<TransportCommand>,
        events: &mpsc::UnboundedSender<TransportEvent>,
    ) -> (u16, String) {
        let (mut ws_write, mut ws_read) = socket.split();

        loop {
            tokio::select! {
                // Incoming frames from the server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(len = text.len(), "Frame received");
                            let _ = events.send(TransportEvent::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => {
                                let _ = events.send(TransportEvent::Message(text));
                            }
                            Err(_) => warn!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                        },

                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                                .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                            debug!(code, %reason, "WebSocket closed by remote");

                            // Flushes the automatic close reply.
                            let _ = ws_write.close().await;
                            return (code, reason);
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            return (ABNORMAL_CLOSURE, e.to_string());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            return (ABNORMAL_CLOSURE, "Connection reset".to_string());
                        }

                        // Ping/Pong are answered by tungstenite
                        Some(Ok(_)) => {}
                    }
                }

                // Commands from the handle
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(error = %e, "Failed to write frame");
                                let _ = events.send(TransportEvent::Error(e.to_string()));
                            }
                        }

                        Some(TransportCommand::Close { code, reason }) => {
                            Self::close_handshake(&mut ws_write, &mut ws_read, code, &reason).await;
                            return (code, reason);
                        }

                        None => {
                            let reason = "Transport dropped".to_string();
                            Self::close_handshake(&mut ws_write, &mut ws_read, NORMAL_CLOSURE, &reason).await;
                            return (NORMAL_CLOSURE, reason);
                        }
                    }
                }
            }
        }
    }

    /// Sends a close frame and waits briefly for the acknowledgement.
    async fn close_handshake(
        ws_write: &mut SocketSink,
        ws_read: &mut SocketStream,
        code: u16,
        reason: &str,
    ) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };

        if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "Failed to send close frame");
            return;
        }

        let acknowledged = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
            while let Some(Ok(message)) = ws_read.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await;

        if acknowledged.is_err() {
            debug!("Close handshake timed out");
        }
    }
}

// ============================================================================
// Established
// ============================================================================

/// Why [`Transport::establish`] did not produce a socket.
enum Established {
    /// A close was requested before the handshake finished.
    Aborted { code: u16, reason: String },
    /// The handshake failed.
    Failed(String),
}

// ============================================================================
// Test Support
// ============================================================================

#[cfg(test)]
impl Transport {
    /// Creates an open transport with no socket behind it.
    ///
    /// Outgoing commands land on the returned receiver.
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let transport = Self {
            command_tx,
            state: Arc::new(AtomicU8::new(TransportState::Open as u8)),
        };
        (transport, command_rx)
    }

    /// Forces the lifecycle state.
    pub(crate) fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================
