//! Connection manager: owns at most one live connection.
//!
//! Opening a new connection supersedes the previous one, which is closed
//! gracefully (code 1000, reason `"superseded"`) before the new socket
//! starts connecting.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use surreal_rpc::{AuthMode, ConnectionConfig, ConnectionManager};
//!
//! # async fn example() -> surreal_rpc::Result<()> {
//! let manager = ConnectionManager::new();
//! let mut events = manager.subscribe();
//!
//! let config = ConnectionConfig::builder()
//!     .endpoint("localhost:8000")
//!     .namespace("test")
//!     .database("test")
//!     .credentials("root", "root")
//!     .auth_mode(AuthMode::Root)
//!     .query_timeout(Duration::from_secs(30))
//!     .build()?;
//!
//! let handle = manager.open(config)?;
//! handle.ready().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::config::ConnectionConfig;
use super::event::ConnectionEvent;
use super::handle::ConnectionHandle;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Close reason used when a newer connection replaces the current one.
pub const SUPERSEDED_REASON: &str = "superseded";

// ============================================================================
// ConnectionManager
// ============================================================================

/// Opens connections and tracks the current one.
pub struct ConnectionManager {
    /// The live connection, if any.
    current: Mutex<Option<ConnectionHandle>>,
    /// Lifecycle events for every connection opened here.
    events: broadcast::Sender<ConnectionEvent>,
    /// Last assigned connection id.
    next_id: AtomicU64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("current", &self.current.lock().as_ref().map(ConnectionHandle::id))
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManager - Public API
// ============================================================================

impl ConnectionManager {
    /// Creates a manager with no connection.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            current: Mutex::new(None),
            events,
            next_id: AtomicU64::new(0),
        }
    }

    /// Subscribes to lifecycle events of every connection.
    ///
    /// Only events published after subscribing are received.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Opens a new connection, superseding the current one.
    ///
    /// Returns immediately; await [`ConnectionHandle::ready`] to learn how
    /// the handshake went. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid. The current
    /// connection is left untouched in that case.
    pub fn open(&self, config: ConnectionConfig) -> Result<ConnectionHandle> {
        config.validate()?;
        let url = config.rpc_url()?;

        let mut current = self.current.lock();

        if let Some(previous) = current.take() {
            info!(connection = %previous.id(), "Superseding connection");
            previous.close_with_reason(SUPERSEDED_REASON);
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = ConnectionHandle::open(id, config, url, self.events.clone());
        *current = Some(handle.clone());

        Ok(handle)
    }

    /// Returns the current connection, if any.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<ConnectionHandle> {
        self.current.lock().clone()
    }

    /// Returns the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConnection`] if nothing has been opened, or the
    /// last connection was closed through [`Self::close`].
    pub fn active(&self) -> Result<ConnectionHandle> {
        self.current().ok_or(Error::NoConnection)
    }

    /// Closes and forgets the current connection. No-op without one.
    pub fn close(&self) {
        if let Some(handle) = self.current.lock().take() {
            debug!(connection = %handle.id(), "Closing current connection");
            handle.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
