//! Error types for the RPC transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use surreal_rpc::{ConnectionHandle, Result};
//!
//! async fn example(handle: &ConnectionHandle) -> Result<()> {
//!     let info = handle.query("info", vec![]).await?;
//!     println!("{info}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::NoConnection`] |
//! | Connection | [`Error::Connection`], [`Error::NotOpen`], [`Error::ConnectionClosed`] |
//! | Handshake | [`Error::AuthenticationFailed`], [`Error::SelectionFailed`], [`Error::NotAuthenticated`] |
//! | Request | [`Error::RequestTimeout`], [`Error::Remote`], [`Error::Protocol`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a connection config is incomplete or its endpoint
    /// cannot be normalized into an RPC URL.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// No connection has been opened on the manager.
    #[error("No database connection")]
    NoConnection,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The WebSocket could not be established.
    ///
    /// Carries the reason reported by the socket layer.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The transport is not in the open state.
    ///
    /// Returned synchronously by sends attempted while connecting,
    /// closing or closed.
    #[error("Connection is not open")]
    NotOpen,

    /// The connection was torn down while the request was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Sign-in was rejected by the server.
    ///
    /// Fatal to the connection: the transport is closed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Message reported by the server.
        message: String,
    },

    /// Namespace/database selection was rejected by the server.
    ///
    /// The transport stays open and keeps accepting queries, but the
    /// handle never becomes ready.
    #[error("Failed to select namespace and database: {message}")]
    SelectionFailed {
        /// Message reported by the server.
        message: String,
    },

    /// A caller request was issued before the handshake completed.
    #[error("Connection is not yet authenticated")]
    NotAuthenticated,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No response arrived before the request deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The server answered with an error envelope.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Error code reported by the server (0 when absent).
        code: i64,
        /// Error message reported by the server.
        message: String,
        /// The full error object as received.
        payload: Value,
    },

    /// Malformed frame or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an authentication failure.
    #[inline]
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Creates a selection failure.
    #[inline]
    pub fn selection_failed(message: impl Into<String>) -> Self {
        Self::SelectionFailed {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a remote error from the `error` field of a response.
    ///
    /// Accepts both the usual `{code, message}` object and bare strings.
    pub fn remote(payload: Value) -> Self {
        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = match &payload {
            Value::String(text) => text.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| other.to_string()),
        };

        Self::Remote {
            code,
            message,
            payload,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if the server rejected the request.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::NotOpen
                | Self::ConnectionClosed
                | Self::NoConnection
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors leave the connection usable; retrying is up to
    /// the caller.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::Remote { .. } | Self::NotAuthenticated
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
