//! Request message type and well-known RPC methods.
//!
//! Requests flow from the client to the server and are the only
//! envelope kind the client ever writes.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::identifiers::RequestId;

// ============================================================================
// Request
// ============================================================================

/// A request from client to server.
///
/// # Format
///
/// ```json
/// {
///   "id": "0f5c9c2d4b0e4c1d9d1b2f3e4a5b6c7d",
///   "method": "signin",
///   "params": [ { "user": "root", "pass": "root" } ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// RPC method name.
    pub method: String,

    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Request {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    /// Creates a new request with specific ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Method
// ============================================================================

/// RPC methods issued by the transport itself.
///
/// Caller traffic may use any method name; these are the ones the
/// handshake and keepalive depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// No-op used as keepalive.
    Ping,
    /// Credential sign-in.
    Signin,
    /// Scope sign-up.
    Signup,
    /// Token authentication.
    Authenticate,
    /// Namespace/database selection.
    Use,
}

impl Method {
    /// Returns the wire name of the method.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Signin => "signin",
            Self::Signup => "signup",
            Self::Authenticate => "authenticate",
            Self::Use => "use",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_owned()
    }
}

// ============================================================================
// Tests
// ============================================================================
