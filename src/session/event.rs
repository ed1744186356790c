//! Connection lifecycle events and states.
//!
//! Events are published on a broadcast channel owned by the
//! [`ConnectionManager`](crate::ConnectionManager), so any number of
//! subscribers can observe every connection it opens.
//!
//! | Event | Published when |
//! |-------|----------------|
//! | [`ConnectionEvent::Connected`] | Handshake reached ready |
//! | [`ConnectionEvent::Disconnected`] | Socket ended with a non-normal code |
//! | [`ConnectionEvent::Error`] | Transport error, or a rejected handshake step |

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::ConnectionId;

// ============================================================================
// ConnectionEvent
// ============================================================================

/// A lifecycle notification for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is authenticated and accepts queries.
    Connected {
        /// Connection the event belongs to.
        connection: ConnectionId,
    },

    /// The connection ended abnormally. Published at most once.
    Disconnected {
        /// Connection the event belongs to.
        connection: ConnectionId,
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Something went wrong. Does not imply teardown by itself.
    Error {
        /// Connection the event belongs to.
        connection: ConnectionId,
        /// Human-readable description.
        message: String,
    },
}

impl ConnectionEvent {
    /// Returns the connection the event belongs to.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::Connected { connection }
            | Self::Disconnected { connection, .. }
            | Self::Error { connection, .. } => *connection,
        }
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable state of a [`ConnectionHandle`](crate::ConnectionHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket handshake in progress.
    Connecting,
    /// Signing in.
    Authenticating,
    /// Selecting namespace and database.
    Selecting,
    /// Queries accepted.
    Ready,
    /// Selection was rejected; the socket stays open and queries are still
    /// accepted, against whatever namespace the server defaults to.
    SelectionFailed,
    /// Close requested locally.
    Closing,
    /// Torn down.
    Closed,
}

impl ConnectionState {
    /// Returns `true` once the handshake has finished, one way or another.
    #[inline]
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::SelectionFailed | Self::Closing | Self::Closed
        )
    }

    /// Returns `true` if caller requests may be sent.
    #[inline]
    #[must_use]
    pub fn accepts_queries(self) -> bool {
        matches!(self, Self::Ready | Self::SelectionFailed)
    }
}

// ============================================================================
// Tests
// ============================================================================
