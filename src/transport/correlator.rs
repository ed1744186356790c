//! Request/response correlation.
//!
//! Every outgoing request gets a fresh [`RequestId`] and a pending entry
//! holding a single-use resolution slot. Inbound responses, deadlines and
//! teardown all race to remove that entry; whoever removes it resolves
//! the caller, so each request resolves exactly once.
//!
//! # Flow
//!
//! ```text
//! dispatch ──► register entry ──► Transport::send
//!                    │
//!   resolve(id) ─────┼──► remove ──► Ok(result) / Err(Remote)
//!   deadline    ─────┼──► remove ──► Err(RequestTimeout)
//!   fail_all    ─────┘──► drain  ──► Err(ConnectionClosed)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, to_string};
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Request, Response};

use super::Transport;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to pending entries.
type PendingMap = FxHashMap<RequestId, PendingEntry>;

/// One in-flight request.
struct PendingEntry {
    /// Resolution slot.
    tx: oneshot::Sender<Result<Value>>,
    /// Method name, for diagnostics.
    method: String,
}

// ============================================================================
// Correlator
// ============================================================================

/// Matches responses to the requests that caused them.
///
/// Cheap to clone; clones share the pending set.
#[derive(Clone)]
pub struct Correlator {
    /// Transport used for outgoing frames.
    transport: Transport,
    /// Pending requests by id.
    pending: Arc<Mutex<PendingMap>>,
    /// Set once the owning connection has torn down.
    closed: Arc<AtomicBool>,
}

impl Correlator {
    /// Creates a correlator sending through `transport`.
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(PendingMap::default())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sends a request and waits for its response or deadline.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the transport is not open
    /// - [`Error::ConnectionClosed`] if the connection tears down first
    /// - [`Error::RequestTimeout`] if no response arrives within `request_timeout`
    /// - [`Error::Remote`] if the server answers with an error
    pub async fn send(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        request_timeout: Duration,
    ) -> Result<Value> {
        self.dispatch(method, params, request_timeout)?.wait().await
    }

    /// Registers and sends a request without waiting.
    ///
    /// The entry is registered before the frame is handed to the
    /// transport, so a response can never arrive ahead of its entry.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after teardown
    /// - [`Error::NotOpen`] if the transport is not open
    /// - [`Error::Config`] if `request_timeout` overflows the clock
    pub fn dispatch(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        request_timeout: Duration,
    ) -> Result<PendingResponse> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        if !self.transport.is_open() {
            return Err(Error::NotOpen);
        }

        let deadline = Instant::now().checked_add(request_timeout).ok_or_else(|| {
            Error::config(format!(
                "Request timeout of {}s is out of range",
                request_timeout.as_secs()
            ))
        })?;

        let method = method.into();
        let (tx, rx) = oneshot::channel();

        let request = {
            let mut pending = self.pending.lock();
            let mut id = RequestId::generate();
            while pending.contains_key(&id) {
                id = RequestId::generate();
            }

            pending.insert(
                id.clone(),
                PendingEntry {
                    tx,
                    method: method.clone(),
                },
            );
            Request::with_id(id, method, params)
        };

        let sent = to_string(&request)
            .map_err(Error::from)
            .and_then(|json| self.transport.send(json));

        if let Err(e) = sent {
            self.pending.lock().remove(&request.id);
            return Err(e);
        }

        trace!(id = %request.id, method = %request.method, "Request sent");

        Ok(PendingResponse {
            id: request.id,
            rx,
            deadline,
            timeout: request_timeout,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Delivers a response to its waiting request.
    ///
    /// Returns `false` if no request with that id is pending; the frame is
    /// logged and discarded and the connection carries on.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(entry) = self.pending.lock().remove(&response.id) else {
            warn!(id = %response.id, "Response for unknown request");
            return false;
        };

        trace!(id = %response.id, method = %entry.method, "Response matched");
        let _ = entry.tx.send(response.into_result());
        true
    }

    /// Rejects every pending request with [`Error::ConnectionClosed`].
    ///
    /// Later dispatches fail immediately. Safe to call more than once.
    pub fn fail_all(&self) {
        self.closed.store(true, Ordering::Release);

        let pending: Vec<_> = self.pending.lock().drain().collect();
        let count = pending.len();

        for (_, entry) in pending {
            let _ = entry.tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on teardown");
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the transport this correlator sends through.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

// ============================================================================
// PendingResponse
// ============================================================================

/// A dispatched request awaiting its outcome.
///
/// Dropping it without waiting unregisters the request; a response that
/// arrives afterwards is treated as unknown.
#[must_use = "a pending response does nothing unless waited on"]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
    deadline: Instant,
    timeout: Duration,
    pending: Arc<Mutex<PendingMap>>,
}

impl PendingResponse {
    /// Returns the request id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Returns the instant after which the request times out.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the response, the deadline, or teardown.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send`].
    pub async fn wait(mut self) -> Result<Value> {
        match timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                if self.pending.lock().remove(&self.id).is_some() {
                    debug!(id = %self.id, "Request timed out");
                    return Err(Error::request_timeout(
                        self.id.clone(),
                        self.timeout.as_millis() as u64,
                    ));
                }

                // A resolver removed the entry first and is delivering now.
                match (&mut self.rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::ConnectionClosed),
                }
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

// ============================================================================
// Tests
// ============================================================================
