//! WebSocket RPC message types.
//!
//! This module defines the JSON envelopes exchanged with the database
//! server over the RPC endpoint.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Server | Method call `{id, method, params}` |
//! | `Response` | Server → Client | `{id, result}` or `{id, error}` |
//! | `Notification` | Server → Client | Uncorrelated push (`method: "notify"` or no `id`) |
//!
//! Payload contents are opaque here; only the envelope fields needed for
//! correlation are interpreted.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Request type and transport-issued methods |
//! | `response` | Inbound parsing into responses and notifications |

// ============================================================================
// Submodules
// ============================================================================

/// Request message type and RPC method names.
pub mod request;

/// Inbound message types.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use request::{Method, Request};
pub use response::{Inbound, Notification, Outcome, Response};
