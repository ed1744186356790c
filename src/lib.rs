//! SurrealDB RPC - Multiplexed WebSocket transport for database clients.
//!
//! This library opens one WebSocket to a SurrealDB-compatible `/rpc`
//! endpoint, signs in, selects a namespace and database, and then lets any
//! number of concurrent requests share that socket.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager ──owns──► ConnectionHandle ──► Correlator ──► Transport ──► socket task
//!                                   │
//!                                   ├── AuthSequencer (signin → use)
//!                                   └── Keepalive (ping every 30s)
//! ```
//!
//! Key design principles:
//!
//! - At most one live connection per [`ConnectionManager`]
//! - Requests are matched to responses by id, never by order
//! - Every request settles exactly once: result, error, timeout or close
//! - Teardown runs once, whichever side closes first
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use surreal_rpc::{AuthMode, ConnectionConfig, ConnectionManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ConnectionManager::new();
//!
//!     let config = ConnectionConfig::builder()
//!         .endpoint("http://localhost:8000")
//!         .namespace("test")
//!         .database("test")
//!         .credentials("root", "root")
//!         .auth_mode(AuthMode::Root)
//!         .query_timeout(Duration::from_secs(30))
//!         .build()?;
//!
//!     let handle = manager.open(config)?;
//!     handle.ready().await?;
//!
//!     let info = handle.query("query", vec!["INFO FOR DB".into()]).await?;
//!     println!("{info}");
//!
//!     manager.close();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | RPC envelope types |
//! | [`session`] | Configuration, handshake and lifecycle |
//! | [`transport`] | WebSocket transport and request correlation |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for requests and connections.
pub mod identifiers;

/// RPC envelope types.
///
/// Request encoding and inbound frame classification.
pub mod protocol;

/// Connection sessions.
///
/// Use [`ConnectionManager::open`] to obtain a [`ConnectionHandle`].
pub mod session;

/// WebSocket transport layer.
///
/// Socket ownership and request/response correlation.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    AuthMode, ConnectionConfig, ConnectionConfigBuilder, ConnectionEvent, ConnectionHandle,
    ConnectionManager, ConnectionState, ScopeField,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, RequestId};
