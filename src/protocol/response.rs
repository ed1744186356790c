//! Inbound message types.
//!
//! Every frame received from the server is parsed into an [`Inbound`]
//! at the boundary, so malformed frames are rejected before the
//! correlator ever sees them.
//!
//! | Shape | Parsed as |
//! |-------|-----------|
//! | `{"method": "notify", ...}` | [`Inbound::Notification`] |
//! | object without `id` | [`Inbound::Notification`] |
//! | `{"id", "error"}` | [`Inbound::Response`] with [`Outcome::Error`] |
//! | `{"id", "result"}` or `{"id"}` | [`Inbound::Response`] with [`Outcome::Result`] |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Method name the server uses for out-of-band notifications.
const NOTIFY_METHOD: &str = "notify";

// ============================================================================
// Inbound
// ============================================================================

/// A message received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to a request issued by this client.
    Response(Response),
    /// Uncorrelated server push.
    Notification(Notification),
}

impl Inbound {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is not a JSON object or
    /// carries an `id` that is neither a string nor a number.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("Malformed frame: {e}")))?;
        if !value.is_object() {
            return Err(Error::protocol("Frame is not a JSON object"));
        }

        let raw: RawInbound = serde_json::from_value(value)
            .map_err(|e| Error::protocol(format!("Malformed frame: {e}")))?;

        if raw.method.as_deref() == Some(NOTIFY_METHOD) {
            return Ok(Self::Notification(raw.into_notification()));
        }

        let id = match raw.id {
            None => return Ok(Self::Notification(raw.into_notification())),
            Some(Value::String(id)) => RequestId::from(id),
            Some(Value::Number(id)) => RequestId::from(id.to_string()),
            Some(other) => {
                return Err(Error::protocol(format!("Invalid response id: {other}")));
            }
        };

        let outcome = match raw.error {
            Some(error) => Outcome::Error(error),
            None => Outcome::Result(raw.result.unwrap_or(Value::Null)),
        };

        Ok(Self::Response(Response { id, outcome }))
    }
}

// ============================================================================
// Response
// ============================================================================

/// A correlated answer from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,
    /// Success value or remote error.
    pub outcome: Outcome,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, error: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Extracts the result value, returning error if response was error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] carrying the server's error object.
    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => Err(Error::remote(error)),
        }
    }
}

/// Payload of a [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `result` field, `Null` when the server omitted it.
    Result(Value),
    /// `error` field as received.
    Error(Value),
}

// ============================================================================
// Notification
// ============================================================================

/// An out-of-band message with no correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name, if the server supplied one.
    pub method: Option<String>,
    /// `params` or `result` body, whichever was present.
    pub body: Value,
}

// ============================================================================
// Wire Representation
// ============================================================================

/// Loose wire shape, narrowed into [`Inbound`] by [`Inbound::parse`].
#[derive(Deserialize)]
struct RawInbound {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    error: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
}

impl RawInbound {
    fn into_notification(self) -> Notification {
        Notification {
            method: self.method,
            body: self.params.or(self.result).unwrap_or(Value::Null),
        }
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)` instead of `None`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn response(text: &str) -> Response {
        match Inbound::parse(text).expect("parse") {
            Inbound::Response(response) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_success_response() {
        let response = response(r#"{"id": "a1", "result": {"tables": {}}}"#);
        assert_eq!(response.id, RequestId::from("a1"));
        assert_eq!(response.outcome, Outcome::Result(json!({"tables": {}})));
    }

    #[test]
    fn test_null_result_is_a_result() {
        let response = response(r#"{"id": "a1", "result": null}"#);
        assert_eq!(response.outcome, Outcome::Result(Value::Null));
        assert_eq!(response.into_result().expect("ok"), Value::Null);
    }

    #[test]
    fn test_missing_result_resolves_to_null() {
        let response = response(r#"{"id": "a1"}"#);
        assert_eq!(response.outcome, Outcome::Result(Value::Null));
    }

    #[test]
    fn test_error_response() {
        let response = response(
            r#"{"id": "a1", "error": {"code": -32000, "message": "There was a problem with authentication"}}"#,
        );
        assert!(matches!(response.outcome, Outcome::Error(_)));

        let err = response.into_result().expect_err("should be remote error");
        match err {
            Error::Remote { code, message, .. } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "There was a problem with authentication");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_takes_precedence_over_result() {
        let response = response(r#"{"id": "a1", "result": 1, "error": {"message": "x"}}"#);
        assert!(matches!(response.outcome, Outcome::Error(_)));
    }

    #[test]
    fn test_numeric_id_accepted() {
        let response = response(r#"{"id": 42, "result": true}"#);
        assert_eq!(response.id.as_str(), "42");
    }

    #[test]
    fn test_notify_method_is_notification_even_with_id() {
        let inbound = Inbound::parse(r#"{"id": "x", "method": "notify", "params": [1]}"#)
            .expect("parse");
        match inbound {
            Inbound::Notification(n) => {
                assert_eq!(n.method.as_deref(), Some("notify"));
                assert_eq!(n.body, json!([1]));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_id_is_notification() {
        let inbound = Inbound::parse(r#"{"result": {"action": "CREATE"}}"#).expect("parse");
        match inbound {
            Inbound::Notification(n) => {
                assert!(n.method.is_none());
                assert_eq!(n.body, json!({"action": "CREATE"}));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(Inbound::parse("not json"), Err(Error::Protocol { .. })));
        assert!(matches!(Inbound::parse("[1, 2]"), Err(Error::Protocol { .. })));
        assert!(matches!(
            Inbound::parse(r#"{"id": {"nested": true}, "result": 1}"#),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_response_constructors() {
        let ok = Response::success(RequestId::from("a"), json!(1));
        assert_eq!(ok.into_result().expect("ok"), json!(1));

        let err = Response::failure(RequestId::from("a"), json!({"message": "nope"}));
        assert!(err.into_result().expect_err("err").is_remote());
    }
}
