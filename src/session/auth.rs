//! Authentication handshake.
//!
//! Runs once per connection, right after the socket opens:
//!
//! ```text
//! Unauthenticated ──signin/signup/authenticate──► Selecting ──use──► Ready
//!        │                                            │
//!        └──── rejected ──► Failed                    └── rejected ──► Failed
//! ```
//!
//! With [`AuthMode::None`] the first step is skipped. With an empty
//! namespace or database the second step is skipped.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::Method;
use crate::transport::Correlator;

use super::config::{AuthMode, ConnectionConfig};

// ============================================================================
// AuthStage
// ============================================================================

/// Stage of the handshake state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Waiting to sign in.
    Unauthenticated,
    /// Signed in (or no auth), selecting namespace/database.
    Selecting,
    /// Handshake complete.
    Ready,
    /// A step was rejected.
    Failed,
}

// ============================================================================
// AuthRequest
// ============================================================================

/// The sign-in call for a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    /// `signin`, `signup` or `authenticate`.
    pub method: Method,
    /// Positional params: one payload object, or the token.
    pub params: Vec<Value>,
}

impl AuthRequest {
    /// Builds the sign-in call, or `None` for [`AuthMode::None`].
    #[must_use]
    pub fn for_config(config: &ConnectionConfig) -> Option<Self> {
        let (method, params) = match config.auth_mode {
            AuthMode::None => return None,
            AuthMode::Token => (Method::Authenticate, vec![json!(config.token)]),
            AuthMode::ScopeSignup => (Method::Signup, vec![Value::Object(signin_payload(config))]),
            AuthMode::Root | AuthMode::Namespace | AuthMode::Database | AuthMode::Scope => {
                (Method::Signin, vec![Value::Object(signin_payload(config))])
            }
        };

        Some(Self { method, params })
    }
}

/// Builds the sign-in payload object for the configured mode.
///
/// Scope modes carry `NS`, `DB`, `SC` and the scope fields but never the
/// user credentials; every other mode carries `user` and `pass`.
#[must_use]
pub fn signin_payload(config: &ConnectionConfig) -> Map<String, Value> {
    let mut payload = Map::new();

    match config.auth_mode {
        AuthMode::Namespace => {
            payload.insert("NS".into(), json!(config.namespace));
        }
        AuthMode::Database => {
            payload.insert("NS".into(), json!(config.namespace));
            payload.insert("DB".into(), json!(config.database));
        }
        AuthMode::Scope | AuthMode::ScopeSignup => {
            payload.insert("NS".into(), json!(config.namespace));
            payload.insert("DB".into(), json!(config.database));
            payload.insert("SC".into(), json!(config.scope));

            for field in &config.scope_fields {
                payload.insert(field.subject.clone(), json!(field.value));
            }
            return payload;
        }
        AuthMode::None | AuthMode::Root | AuthMode::Token => {}
    }

    payload.insert("user".into(), json!(config.username));
    payload.insert("pass".into(), json!(config.password));
    payload
}

// ============================================================================
// AuthSequencer
// ============================================================================

/// Drives the handshake for one connection.
pub struct AuthSequencer<'a> {
    config: &'a ConnectionConfig,
    correlator: &'a Correlator,
    stage: AuthStage,
}

impl<'a> AuthSequencer<'a> {
    /// Creates a sequencer in [`AuthStage::Unauthenticated`].
    #[must_use]
    pub fn new(config: &'a ConnectionConfig, correlator: &'a Correlator) -> Self {
        Self {
            config,
            correlator,
            stage: AuthStage::Unauthenticated,
        }
    }

    /// Returns the current stage.
    #[inline]
    #[must_use]
    pub fn stage(&self) -> AuthStage {
        self.stage
    }

    /// Runs both steps.
    ///
    /// # Errors
    ///
    /// See [`Self::authenticate`] and [`Self::select`].
    pub async fn run(&mut self) -> Result<()> {
        self.authenticate().await?;
        self.select().await
    }

    /// Signs in according to the auth mode.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthenticationFailed`] if the server rejects the sign-in
    ///   or it times out
    /// - [`Error::ConnectionClosed`] / [`Error::NotOpen`] if the connection
    ///   went away meanwhile
    /// - [`Error::Protocol`] if called out of order
    pub async fn authenticate(&mut self) -> Result<()> {
        self.expect_stage(AuthStage::Unauthenticated)?;

        let Some(request) = AuthRequest::for_config(self.config) else {
            debug!("No authentication configured");
            self.stage = AuthStage::Selecting;
            return Ok(());
        };

        debug!(mode = ?self.config.auth_mode, method = %request.method, "Signing in");

        match self
            .correlator
            .send(request.method, request.params, self.config.query_timeout)
            .await
        {
            Ok(_) => {
                self.stage = AuthStage::Selecting;
                Ok(())
            }
            Err(e) => {
                self.stage = AuthStage::Failed;
                warn!(error = %e, "Sign-in rejected");
                Err(classify(e, |message| Error::authentication_failed(message)))
            }
        }
    }

    /// Selects the configured namespace and database.
    ///
    /// # Errors
    ///
    /// - [`Error::SelectionFailed`] if the server rejects the selection
    /// - [`Error::ConnectionClosed`] / [`Error::NotOpen`] if the connection
    ///   went away meanwhile
    /// - [`Error::Protocol`] if called out of order
    pub async fn select(&mut self) -> Result<()> {
        self.expect_stage(AuthStage::Selecting)?;

        if !self.config.has_selection() {
            self.stage = AuthStage::Ready;
            return Ok(());
        }

        let params = vec![json!(self.config.namespace), json!(self.config.database)];
        match self
            .correlator
            .send(Method::Use, params, self.config.query_timeout)
            .await
        {
            Ok(_) => {
                debug!(namespace = %self.config.namespace, database = %self.config.database, "Selected");
                self.stage = AuthStage::Ready;
                Ok(())
            }
            Err(e) => {
                self.stage = AuthStage::Failed;
                warn!(error = %e, "Namespace/database selection rejected");
                Err(classify(e, |message| Error::selection_failed(message)))
            }
        }
    }

    fn expect_stage(&self, expected: AuthStage) -> Result<()> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "Handshake step requires stage {expected:?}, currently {:?}",
                self.stage
            )))
        }
    }
}

/// Keeps teardown errors as-is and wraps everything else.
fn classify(error: Error, wrap: fn(String) -> Error) -> Error {
    match error {
        Error::ConnectionClosed | Error::NotOpen => error,
        Error::Remote { message, .. } => wrap(message),
        other => wrap(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::sync::mpsc;

    use crate::identifiers::RequestId;
    use crate::protocol::Response;
    use crate::session::config::ScopeField;
    use crate::transport::Transport;
    use crate::transport::socket::TransportCommand;

    fn base_config(mode: AuthMode) -> ConnectionConfig {
        ConnectionConfig::builder()
            .endpoint("localhost:8000")
            .namespace("ns")
            .database("db")
            .credentials("root", "secret")
            .auth_mode(mode)
            .query_timeout(Duration::from_secs(5))
            .build()
            .expect("valid config")
    }

    /// Answers every frame via `answer(method)`, recording methods seen.
    fn spawn_server(
        correlator: Correlator,
        mut commands: mpsc::UnboundedReceiver<TransportCommand>,
        answer: fn(&str) -> Response,
    ) -> mpsc::UnboundedReceiver<String> {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(TransportCommand::Send(text)) = commands.recv().await {
                let frame: Value = serde_json::from_str(&text).expect("json");
                let method = frame["method"].as_str().expect("method").to_owned();
                let mut response = answer(&method);
                response.id = RequestId::from(frame["id"].as_str().expect("id"));
                let _ = seen_tx.send(method);
                correlator.resolve(response);
            }
        });
        seen_rx
    }

    fn accept(_method: &str) -> Response {
        Response::success(RequestId::from(""), Value::Null)
    }

    fn reject_signin(method: &str) -> Response {
        if method == "signin" {
            Response::failure(RequestId::from(""), json!({"code": -32000, "message": "No record"}))
        } else {
            accept(method)
        }
    }

    fn reject_use(method: &str) -> Response {
        if method == "use" {
            Response::failure(RequestId::from(""), json!({"message": "Namespace not allowed"}))
        } else {
            accept(method)
        }
    }

    fn drain(seen: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut methods = Vec::new();
        while let Ok(method) = seen.try_recv() {
            methods.push(method);
        }
        methods
    }

    #[test]
    fn test_root_payload() {
        let payload = signin_payload(&base_config(AuthMode::Root));
        assert_eq!(Value::Object(payload), json!({"user": "root", "pass": "secret"}));
    }

    #[test]
    fn test_namespace_payload() {
        let payload = signin_payload(&base_config(AuthMode::Namespace));
        assert_eq!(
            Value::Object(payload),
            json!({"NS": "ns", "user": "root", "pass": "secret"})
        );
    }

    #[test]
    fn test_database_payload() {
        let payload = signin_payload(&base_config(AuthMode::Database));
        assert_eq!(
            Value::Object(payload),
            json!({"NS": "ns", "DB": "db", "user": "root", "pass": "secret"})
        );
    }

    #[test]
    fn test_scope_payload_scenario() {
        let mut config = base_config(AuthMode::Scope);
        config.scope = "user_scope".to_string();
        config.scope_fields = vec![ScopeField::new("email", "a@b.com")];

        let request = AuthRequest::for_config(&config).expect("scope signs in");
        assert_eq!(request.method, Method::Signin);
        assert_eq!(
            request.params,
            vec![json!({"NS": "ns", "DB": "db", "SC": "user_scope", "email": "a@b.com"})]
        );
    }

    #[test]
    fn test_scope_signup_uses_signup_method() {
        let mut config = base_config(AuthMode::ScopeSignup);
        config.scope = "account".to_string();

        let request = AuthRequest::for_config(&config).expect("signup");
        assert_eq!(request.method, Method::Signup);
        assert!(request.params[0].get("user").is_none());
        assert_eq!(request.params[0]["SC"], "account");
    }

    #[test]
    fn test_token_mode_authenticates() {
        let mut config = base_config(AuthMode::Token);
        config.token = "eyJ0".to_string();

        let request = AuthRequest::for_config(&config).expect("token");
        assert_eq!(request.method, Method::Authenticate);
        assert_eq!(request.params, vec![json!("eyJ0")]);
    }

    #[test]
    fn test_none_mode_has_no_request() {
        assert!(AuthRequest::for_config(&base_config(AuthMode::None)).is_none());
    }

    proptest! {
        #[test]
        fn prop_scope_payload_never_has_credentials(
            scope in "[a-z_]{1,12}",
            fields in proptest::collection::vec(("[a-z]{1,8}", "[ -~]{0,16}"), 0..6),
        ) {
            let mut config = base_config(AuthMode::Scope);
            config.scope = scope.clone();
            config.scope_fields = fields
                .iter()
                .filter(|(subject, _)| subject != "user" && subject != "pass")
                .map(|(subject, value)| ScopeField::new(subject.as_str(), value.as_str()))
                .collect();

            let payload = signin_payload(&config);

            prop_assert!(!payload.contains_key("user"));
            prop_assert!(!payload.contains_key("pass"));
            prop_assert_eq!(payload.get("SC"), Some(&json!(scope)));
            for field in &config.scope_fields {
                prop_assert!(payload.contains_key(&field.subject));
            }
        }
    }

    #[tokio::test]
    async fn test_none_mode_skips_signin() {
        let (transport, commands) = Transport::detached();
        let correlator = Correlator::new(transport);
        let mut seen = spawn_server(correlator.clone(), commands, accept);

        let config = base_config(AuthMode::None);
        let mut sequencer = AuthSequencer::new(&config, &correlator);

        sequencer.authenticate().await.expect("no-op");
        assert_eq!(sequencer.stage(), AuthStage::Selecting);

        sequencer.select().await.expect("use accepted");
        assert_eq!(sequencer.stage(), AuthStage::Ready);
        assert_eq!(drain(&mut seen), vec!["use"]);
    }

    #[tokio::test]
    async fn test_signin_then_use_in_order() {
        let (transport, commands) = Transport::detached();
        let correlator = Correlator::new(transport);
        let mut seen = spawn_server(correlator.clone(), commands, accept);

        let config = base_config(AuthMode::Root);
        let mut sequencer = AuthSequencer::new(&config, &correlator);
        sequencer.run().await.expect("handshake");

        assert_eq!(sequencer.stage(), AuthStage::Ready);
        assert_eq!(drain(&mut seen), vec!["signin", "use"]);
    }

    #[tokio::test]
    async fn test_no_selection_skips_use() {
        let (transport, commands) = Transport::detached();
        let correlator = Correlator::new(transport);
        let mut seen = spawn_server(correlator.clone(), commands, accept);

        let mut config = base_config(AuthMode::Root);
        config.database.clear();
        let mut sequencer = AuthSequencer::new(&config, &correlator);
        sequencer.run().await.expect("handshake");

        assert_eq!(sequencer.stage(), AuthStage::Ready);
        assert_eq!(drain(&mut seen), vec!["signin"]);
    }

    #[tokio::test]
    async fn test_rejected_signin_fails_without_select() {
        let (transport, commands) = Transport::detached();
        let correlator = Correlator::new(transport);
        let mut seen = spawn_server(correlator.clone(), commands, reject_signin);

        let config = base_config(AuthMode::Root);
        let mut sequencer = AuthSequencer::new(&config, &correlator);
        let err = sequencer.run().await.expect_err("rejected");

        assert!(matches!(err, Error::AuthenticationFailed { ref message } if message == "No record"));
        assert_eq!(sequencer.stage(), AuthStage::Failed);
        assert_eq!(drain(&mut seen), vec!["signin"]);
    }

    #[tokio::test]
    async fn test_rejected_use_is_selection_failure() {
        let (transport, commands) = Transport::detached();
        let correlator = Correlator::new(transport);
        let _seen = spawn_server(correlator.clone(), commands, reject_use);

        let config = base_config(AuthMode::Root);
        let mut sequencer = AuthSequencer::new(&config, &correlator);
        let err = sequencer.run().await.expect_err("rejected");

        assert!(matches!(err, Error::SelectionFailed { .. }));
        assert_eq!(sequencer.stage(), AuthStage::Failed);
    }

    #[tokio::test]
    async fn test_steps_out_of_order_rejected() {
        let (transport, _commands) = Transport::detached();
        let correlator = Correlator::new(transport);
        let config = base_config(AuthMode::None);
        let mut sequencer = AuthSequencer::new(&config, &correlator);

        assert!(matches!(sequencer.select().await, Err(Error::Protocol { .. })));
        assert_eq!(sequencer.stage(), AuthStage::Unauthenticated);
    }

    #[tokio::test]
    async fn test_teardown_during_signin_is_not_auth_failure() {
        let (transport, _commands) = Transport::detached();
        let correlator = Correlator::new(transport);
        let config = base_config(AuthMode::Root);

        let closer = correlator.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            closer.fail_all();
        });

        let mut sequencer = AuthSequencer::new(&config, &correlator);
        let err = sequencer.authenticate().await.expect_err("closed");
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
