//! WebSocket transport layer.
//!
//! This module owns the single duplex connection to the database server
//! and multiplexes concurrent requests over it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                         ┌─────────────────┐
//! │  Client (Rust)       │                         │  Database       │
//! │                      │        WebSocket        │  Server         │
//! │  Correlator          │◄───────────────────────►│                 │
//! │   → Transport        │     ws://host/rpc       │  /rpc endpoint  │
//! │      → socket task   │                         │                 │
//! └──────────────────────┘                         └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::connect` - Spawn socket task, state `Connecting`
//! 2. `TransportEvent::Opened` - Handshake done, sends accepted
//! 3. `Correlator::send` - Request out, response matched by id
//! 4. `Transport::close` - Close handshake with code 1000
//! 5. `TransportEvent::Closed` - Always the final event
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlator` | Pending requests, deadlines and response matching |
//! | `socket` | WebSocket handle and socket task |

// ============================================================================
// Submodules
// ============================================================================

/// Request/response correlation.
pub mod correlator;

/// WebSocket handle and socket task.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlator::{Correlator, PendingResponse};
pub use socket::{
    ABNORMAL_CLOSURE, NO_STATUS_RECEIVED, NORMAL_CLOSURE, Transport, TransportEvent,
    TransportState,
};
