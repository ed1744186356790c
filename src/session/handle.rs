//! Caller-facing connection handle and session driver.
//!
//! Each [`ConnectionHandle`] owns one transport/correlator pair. A driver
//! task reacts to transport events one at a time:
//!
//! | Transport event | Reaction |
//! |-----------------|----------|
//! | `Opened` | Spawn the handshake |
//! | `Message` | Parse and route to the correlator |
//! | `Error` | Publish [`ConnectionEvent::Error`] |
//! | `Closed` | Tear down (exactly once) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Inbound;
use crate::transport::{
    ABNORMAL_CLOSURE, Correlator, NORMAL_CLOSURE, Transport, TransportEvent,
};

use super::auth::AuthSequencer;
use super::config::ConnectionConfig;
use super::event::{ConnectionEvent, ConnectionState};
use super::keepalive::Keepalive;

// ============================================================================
// Constants
// ============================================================================

/// Close code sent when sign-in is rejected.
pub const AUTH_FAILED_CLOSE_CODE: u16 = 4001;

/// Close reason for [`ConnectionHandle::close`].
const CLOSED_BY_USER: &str = "Closed by user";

// ============================================================================
// Types
// ============================================================================

/// Why the handshake stopped short of ready.
#[derive(Debug, Clone)]
enum Failure {
    /// The socket never opened.
    Connect(String),
    Authentication(String),
    Selection(String),
}

/// Internal shared state for a connection.
pub(crate) struct HandleInner {
    /// Connection identifier.
    id: ConnectionId,
    /// Configuration this connection was opened with.
    config: ConnectionConfig,
    /// Request correlation (owns the transport).
    correlator: Correlator,
    /// Keepalive, present while queries are accepted.
    keepalive: Mutex<Option<Keepalive>>,
    /// Observable lifecycle state.
    state: watch::Sender<ConnectionState>,
    /// Set by the first close request.
    closing: AtomicBool,
    /// Set by the first teardown.
    torn_down: AtomicBool,
    /// Handshake failure, if any.
    failure: Mutex<Option<Failure>>,
    /// Lifecycle event publisher.
    events: broadcast::Sender<ConnectionEvent>,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// A handle to one database connection.
///
/// Clones share the same connection. Obtain one from
/// [`ConnectionManager::open`](crate::ConnectionManager::open).
///
/// # Example
///
/// ```no_run
/// # use surreal_rpc::ConnectionHandle;
/// # async fn example(handle: ConnectionHandle) -> surreal_rpc::Result<()> {
/// handle.ready().await?;
///
/// let info = handle
///     .query("query", vec!["INFO FOR DB".into()])
///     .await?;
///
/// handle.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Shared inner state.
    pub(crate) inner: Arc<HandleInner>,
}

// ============================================================================
// ConnectionHandle - Display
// ============================================================================

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionHandle - Constructor
// ============================================================================

impl ConnectionHandle {
    /// Starts connecting and spawns the session driver.
    pub(crate) fn open(
        id: ConnectionId,
        config: ConnectionConfig,
        url: Url,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        info!(connection = %id, %url, "Opening connection");

        let (transport, transport_events) = Transport::connect(url);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let inner = Arc::new(HandleInner {
            id,
            config,
            correlator: Correlator::new(transport),
            keepalive: Mutex::new(None),
            state,
            closing: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            failure: Mutex::new(None),
            events,
        });

        tokio::spawn(Self::drive(Arc::clone(&inner), transport_events));

        Self { inner }
    }
}

// ============================================================================
// ConnectionHandle - Public API
// ============================================================================

impl ConnectionHandle {
    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the configuration this connection was opened with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver that observes state changes.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Returns `true` once the handshake has fully succeeded.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Waits until the handshake settles.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the socket could not be established
    /// - [`Error::AuthenticationFailed`] if sign-in was rejected
    /// - [`Error::SelectionFailed`] if namespace/database selection was
    ///   rejected; queries are still accepted afterwards
    /// - [`Error::ConnectionClosed`] if the connection ended first
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let state = *rx
            .wait_for(|state| state.is_settled())
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        match (state, self.inner.failure.lock().clone()) {
            (ConnectionState::Ready, _) => Ok(()),
            (_, Some(Failure::Connect(message))) => Err(Error::connection(message)),
            (_, Some(Failure::Authentication(message))) => {
                Err(Error::authentication_failed(message))
            }
            (_, Some(Failure::Selection(message))) => Err(Error::selection_failed(message)),
            (_, None) => Err(Error::ConnectionClosed),
        }
    }

    /// Sends a request using the configured query timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the transport is not open
    /// - [`Error::NotAuthenticated`] before the handshake completes
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Remote`] if the server answers with an error
    /// - [`Error::ConnectionClosed`] if the connection tears down meanwhile
    pub async fn query(&self, method: impl Into<String>, params: Vec<Value>) -> Result<Value> {
        self.query_with_timeout(method, params, self.inner.config.query_timeout)
            .await
    }

    /// Sends a request with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`Self::query`].
    pub async fn query_with_timeout(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        request_timeout: Duration,
    ) -> Result<Value> {
        if !self.inner.correlator.transport().is_open() {
            return Err(Error::NotOpen);
        }
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        if !self.state().accepts_queries() {
            return Err(Error::NotAuthenticated);
        }

        self.inner
            .correlator
            .send(method, params, request_timeout)
            .await
    }

    /// Closes the connection gracefully.
    ///
    /// Cancels the keepalive, rejects all pending requests and sends one
    /// close frame with code 1000. Further calls are no-ops.
    pub fn close(&self) {
        self.inner.shutdown(NORMAL_CLOSURE, CLOSED_BY_USER);
    }

    /// Closes gracefully with a custom reason.
    pub(crate) fn close_with_reason(&self, reason: &str) {
        self.inner.shutdown(NORMAL_CLOSURE, reason);
    }
}

// ============================================================================
// Session Driver
// ============================================================================

impl ConnectionHandle {
    /// Reacts to transport events until the socket ends.
    async fn drive(inner: Arc<HandleInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => {
                    debug!(connection = %inner.id, "Transport opened");
                    tokio::spawn(Self::handshake(Arc::clone(&inner)));
                }

                TransportEvent::Message(text) => inner.route(&text),

                TransportEvent::Error(message) => {
                    warn!(connection = %inner.id, error = %message, "Transport error");
                    inner.publish(ConnectionEvent::Error {
                        connection: inner.id,
                        message,
                    });
                }

                TransportEvent::Closed { code, reason } => {
                    inner.teardown(code, &reason);
                    break;
                }
            }
        }

        // No-op unless the socket task vanished without a Closed event.
        inner.teardown(ABNORMAL_CLOSURE, "Transport task ended");
    }

    /// Runs sign-in and selection, then marks the connection ready.
    async fn handshake(inner: Arc<HandleInner>) {
        inner.advance(ConnectionState::Authenticating);
        let mut sequencer = AuthSequencer::new(&inner.config, &inner.correlator);

        if let Err(e) = sequencer.authenticate().await {
            match e {
                Error::AuthenticationFailed { ref message } => {
                    *inner.failure.lock() = Some(Failure::Authentication(message.clone()));
                    inner.publish(ConnectionEvent::Error {
                        connection: inner.id,
                        message: e.to_string(),
                    });
                    inner.shutdown(AUTH_FAILED_CLOSE_CODE, "Authentication failed");
                }
                other => debug!(connection = %inner.id, error = %other, "Handshake interrupted"),
            }
            return;
        }

        inner.advance(ConnectionState::Selecting);

        if let Err(e) = sequencer.select().await {
            match e {
                Error::SelectionFailed { ref message } => {
                    *inner.failure.lock() = Some(Failure::Selection(message.clone()));
                    inner.publish(ConnectionEvent::Error {
                        connection: inner.id,
                        message: e.to_string(),
                    });
                    if inner.advance(ConnectionState::SelectionFailed) {
                        inner.start_keepalive();
                    }
                }
                other => debug!(connection = %inner.id, error = %other, "Handshake interrupted"),
            }
            return;
        }

        if !inner.advance(ConnectionState::Ready) {
            return;
        }

        inner.start_keepalive();

        info!(connection = %inner.id, "Connection ready");
        inner.publish(ConnectionEvent::Connected {
            connection: inner.id,
        });
    }
}

// ============================================================================
// HandleInner
// ============================================================================

impl HandleInner {
    /// Routes one inbound frame.
    fn route(&self, text: &str) {
        match Inbound::parse(text) {
            Ok(Inbound::Response(response)) => {
                self.correlator.resolve(response);
            }
            Ok(Inbound::Notification(notification)) => {
                trace!(connection = %self.id, method = ?notification.method, "Notification dropped");
            }
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Discarding malformed frame");
            }
        }
    }

    /// Moves to `next` unless already closing or closed.
    ///
    /// Returns `true` if the state changed.
    fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            let allowed = match *current {
                ConnectionState::Closed => false,
                ConnectionState::Closing => next == ConnectionState::Closed,
                _ => true,
            };

            if allowed && *current != next {
                trace!(connection = %self.id, from = ?*current, to = ?next, "State changed");
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Publishes an event; having no subscribers is fine.
    fn publish(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    /// Starts the keepalive unless a close already began.
    fn start_keepalive(&self) {
        let mut keepalive = self.keepalive.lock();
        if !self.closing.load(Ordering::Acquire) {
            *keepalive = Some(Keepalive::start(
                self.correlator.clone(),
                self.config.keepalive_interval,
                self.config.query_timeout,
            ));
        }
    }

    fn stop_keepalive(&self) {
        if let Some(keepalive) = self.keepalive.lock().take() {
            keepalive.cancel();
        }
    }

    /// Starts a local close. Only the first call has any effect.
    fn shutdown(&self, code: u16, reason: &str) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(connection = %self.id, code, reason, "Closing connection");

        self.stop_keepalive();
        self.correlator.fail_all();
        self.advance(ConnectionState::Closing);
        self.correlator.transport().close(code, reason);
    }

    /// Releases everything once the socket has ended.
    fn teardown(&self, code: u16, reason: &str) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.closing.store(true, Ordering::Release);
        self.stop_keepalive();
        self.correlator.fail_all();

        if *self.state.borrow() == ConnectionState::Connecting {
            self.failure
                .lock()
                .get_or_insert_with(|| Failure::Connect(reason.to_owned()));
        }

        info!(connection = %self.id, code, reason, "Connection closed");

        if code != NORMAL_CLOSURE {
            self.publish(ConnectionEvent::Disconnected {
                connection: self.id,
                code,
                reason: reason.to_owned(),
            });
        }

        self.advance(ConnectionState::Closed);
    }
}

// ============================================================================
// Tests
// ============================================================================
