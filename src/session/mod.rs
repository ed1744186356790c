//! Connection sessions: configuration, handshake and lifecycle.
//!
//! # Handshake
//!
//! ```text
//! Connecting ──Opened──► Authenticating ──signin ok──► Selecting ──use ok──► Ready
//!                              │                           │
//!                        signin rejected              use rejected
//!                              ▼                           ▼
//!                   Closing (code 4001) ──► Closed    SelectionFailed
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `auth` | Sign-in payloads and the handshake sequencer |
//! | `config` | [`ConnectionConfig`] and its builder |
//! | `event` | [`ConnectionEvent`] and [`ConnectionState`] |
//! | `handle` | [`ConnectionHandle`] and the session driver |
//! | `keepalive` | Periodic `ping` |
//! | `manager` | [`ConnectionManager`] |

// ============================================================================
// Submodules
// ============================================================================

/// Handshake sequencing.
pub mod auth;

/// Connection configuration.
pub mod config;

/// Lifecycle events and states.
pub mod event;

/// Connection handle.
pub mod handle;

/// Keepalive timer.
pub mod keepalive;

/// Connection manager.
pub mod manager;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::{AuthRequest, AuthSequencer, AuthStage};
pub use config::{AuthMode, ConnectionConfig, ConnectionConfigBuilder, ScopeField};
pub use event::{ConnectionEvent, ConnectionState};
pub use handle::{AUTH_FAILED_CLOSE_CODE, ConnectionHandle};
pub use keepalive::Keepalive;
pub use manager::{ConnectionManager, SUPERSEDED_REASON};
