//! Connection configuration.
//!
//! [`ConnectionConfig`] is supplied once per [`open`](crate::ConnectionManager::open)
//! and never mutated afterwards. It can be assembled with
//! [`ConnectionConfigBuilder`] or deserialized from the settings store's
//! camelCase JSON.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use surreal_rpc::{AuthMode, ConnectionConfig};
//!
//! # fn example() -> surreal_rpc::Result<()> {
//! let config = ConnectionConfig::builder()
//!     .endpoint("http://localhost:8000")
//!     .namespace("test")
//!     .database("test")
//!     .credentials("root", "root")
//!     .auth_mode(AuthMode::Root)
//!     .query_timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! assert_eq!(config.rpc_url()?.as_str(), "ws://localhost:8000/rpc");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default interval between keepalive pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for [`ConnectionConfig::query_timeout`].
pub const MAX_QUERY_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound for [`ConnectionConfig::keepalive_interval`].
pub const MAX_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Path segment of the RPC endpoint.
const RPC_PATH: &str = "rpc";

// ============================================================================
// AuthMode
// ============================================================================

/// Authentication strategy run after the socket opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// No sign-in.
    #[default]
    None,
    /// Root user sign-in.
    Root,
    /// Namespace user sign-in.
    Namespace,
    /// Database user sign-in.
    Database,
    /// Scope sign-in with custom fields.
    Scope,
    /// Scope sign-up with custom fields.
    ScopeSignup,
    /// Pre-issued token.
    Token,
}

// ============================================================================
// ScopeField
// ============================================================================

/// One key/value pair merged into a scope sign-in payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeField {
    /// Payload key.
    pub subject: String,
    /// Payload value.
    pub value: String,
}

impl ScopeField {
    /// Creates a scope field.
    #[inline]
    #[must_use]
    pub fn new(subject: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Everything needed to open and authenticate one connection.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Server address, e.g. `http://localhost:8000` or `wss://db.example.com/rpc`.
    pub endpoint: String,

    /// Namespace to select after sign-in.
    #[serde(default)]
    pub namespace: String,

    /// Database to select after sign-in.
    #[serde(default)]
    pub database: String,

    /// Sign-in user (all credential modes except scope).
    #[serde(default)]
    pub username: String,

    /// Sign-in password.
    #[serde(default)]
    pub password: String,

    /// Authentication strategy.
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Scope name for scope modes.
    #[serde(default)]
    pub scope: String,

    /// Extra fields merged into the scope payload, in order.
    #[serde(default)]
    pub scope_fields: Vec<ScopeField>,

    /// Token for [`AuthMode::Token`].
    #[serde(default)]
    pub token: String,

    /// Timeout applied to every request that doesn't carry its own.
    #[serde(with = "duration_secs")]
    pub query_timeout: Duration,

    /// Interval between keepalive pings.
    #[serde(default = "default_keepalive_interval", with = "duration_secs")]
    pub keepalive_interval: Duration,
}

impl ConnectionConfig {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Normalizes the endpoint into the RPC WebSocket URL.
    ///
    /// - a missing scheme defaults to `ws://`
    /// - `http` maps to `ws`, `https` to `wss`
    /// - a trailing `rpc` is trimmed, then `/rpc` is appended
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is empty, unparsable, or
    /// uses another scheme.
    pub fn rpc_url(&self) -> Result<Url> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::config("Endpoint is required"));
        }

        let candidate = if endpoint.contains("://") {
            endpoint.to_owned()
        } else {
            format!("ws://{endpoint}")
        };

        let mut url = Url::parse(&candidate)
            .map_err(|e| Error::config(format!("Invalid endpoint '{endpoint}': {e}")))?;

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(Error::config(format!(
                    "Unsupported endpoint scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::config(format!("Cannot use scheme '{scheme}' for '{endpoint}'")))?;

        let mut path = url.path().to_owned();
        if let Some(trimmed) = path.strip_suffix(RPC_PATH) {
            path = trimmed.to_owned();
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(RPC_PATH);
        url.set_path(&path);
        url.set_fragment(None);

        Ok(url)
    }

    /// Returns `true` if both namespace and database are set.
    #[inline]
    #[must_use]
    pub fn has_selection(&self) -> bool {
        !self.namespace.is_empty() && !self.database.is_empty()
    }

    /// Checks that the configuration can open a connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a bad endpoint or a zero interval.
    pub fn validate(&self) -> Result<()> {
        self.rpc_url()?;

        if self.query_timeout.is_zero() || self.query_timeout > MAX_QUERY_TIMEOUT {
            return Err(Error::config(format!(
                "Query timeout must be greater than zero and at most {}s",
                MAX_QUERY_TIMEOUT.as_secs()
            )));
        }
        if self.keepalive_interval.is_zero() || self.keepalive_interval > MAX_KEEPALIVE_INTERVAL {
            return Err(Error::config(format!(
                "Keepalive interval must be greater than zero and at most {}s",
                MAX_KEEPALIVE_INTERVAL.as_secs()
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("auth_mode", &self.auth_mode)
            .field("scope", &self.scope)
            .field("scope_fields", &self.scope_fields)
            .field("token", &redacted(&self.token))
            .field("query_timeout", &self.query_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}

fn default_keepalive_interval() -> Duration {
    DEFAULT_KEEPALIVE_INTERVAL
}

// ============================================================================
// ConnectionConfigBuilder
// ============================================================================

/// Builder for [`ConnectionConfig`].
///
/// The endpoint and query timeout are required; everything else
/// defaults to empty.
#[derive(Debug, Default, Clone)]
pub struct ConnectionConfigBuilder {
    endpoint: Option<String>,
    namespace: String,
    database: String,
    username: String,
    password: String,
    auth_mode: AuthMode,
    scope: String,
    scope_fields: Vec<ScopeField>,
    token: String,
    query_timeout: Option<Duration>,
    keepalive_interval: Option<Duration>,
}

impl ConnectionConfigBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server address.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the namespace to select.
    #[inline]
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the database to select.
    #[inline]
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the sign-in user and password.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the authentication strategy.
    #[inline]
    #[must_use]
    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    /// Sets the scope name.
    #[inline]
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Appends one scope field.
    #[inline]
    #[must_use]
    pub fn scope_field(mut self, subject: impl Into<String>, value: impl Into<String>) -> Self {
        self.scope_fields.push(ScopeField::new(subject, value));
        self
    }

    /// Sets the token for token authentication.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Sets the default per-request timeout.
    #[inline]
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Sets the keepalive interval.
    #[inline]
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if endpoint or query timeout is not set
    /// - [`Error::Config`] if the endpoint cannot be normalized
    pub fn build(self) -> Result<ConnectionConfig> {
        let endpoint = self.endpoint.ok_or_else(|| {
            Error::config(
                "Endpoint is required. Use .endpoint() to set it.\n\
                 Example: ConnectionConfig::builder().endpoint(\"http://localhost:8000\")",
            )
        })?;
        let query_timeout = self.query_timeout.ok_or_else(|| {
            Error::config("Query timeout is required. Use .query_timeout() to set it.")
        })?;

        let config = ConnectionConfig {
            endpoint,
            namespace: self.namespace,
            database: self.database,
            username: self.username,
            password: self.password,
            auth_mode: self.auth_mode,
            scope: self.scope,
            scope_fields: self.scope_fields,
            token: self.token,
            query_timeout,
            keepalive_interval: self
                .keepalive_interval
                .unwrap_or(DEFAULT_KEEPALIVE_INTERVAL),
        };

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// Durations as (possibly fractional) seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn config(endpoint: &str) -> ConnectionConfig {
        ConnectionConfig::builder()
            .endpoint(endpoint)
            .query_timeout(Duration::from_secs(5))
            .build()
            .expect("valid config")
    }

    #[test]
    fn test_rpc_url_normalization() {
        let cases = [
            ("http://localhost:8000", "ws://localhost:8000/rpc"),
            ("https://db.example.com", "wss://db.example.com/rpc"),
            ("ws://localhost:8000/rpc", "ws://localhost:8000/rpc"),
            ("wss://db.example.com/rpc/", "wss://db.example.com/rpc/rpc"),
            ("http://host/base", "ws://host/base/rpc"),
            ("http://host/base/", "ws://host/base/rpc"),
            ("localhost:8000", "ws://localhost:8000/rpc"),
        ];

        for (endpoint, expected) in cases {
            assert_eq!(config(endpoint).rpc_url().expect("url").as_str(), expected, "{endpoint}");
        }
    }

    #[test]
    fn test_rpc_url_rejects_other_schemes() {
        let mut cfg = config("http://localhost:8000");
        cfg.endpoint = "ftp://localhost".to_string();
        assert!(matches!(cfg.rpc_url(), Err(Error::Config { .. })));

        cfg.endpoint = "   ".to_string();
        assert!(matches!(cfg.rpc_url(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_builder_requires_endpoint_and_timeout() {
        let missing_endpoint = ConnectionConfig::builder()
            .query_timeout(Duration::from_secs(1))
            .build();
        assert!(matches!(missing_endpoint, Err(Error::Config { .. })));

        let missing_timeout = ConnectionConfig::builder().endpoint("localhost:8000").build();
        assert!(matches!(missing_timeout, Err(Error::Config { .. })));

        let zero_timeout = ConnectionConfig::builder()
            .endpoint("localhost:8000")
            .query_timeout(Duration::ZERO)
            .build();
        assert!(matches!(zero_timeout, Err(Error::Config { .. })));
    }

    #[test]
    fn test_builder_defaults() {
        let cfg = config("localhost:8000");
        assert_eq!(cfg.auth_mode, AuthMode::None);
        assert_eq!(cfg.keepalive_interval, DEFAULT_KEEPALIVE_INTERVAL);
        assert!(cfg.scope_fields.is_empty());
        assert!(!cfg.has_selection());
    }

    #[test]
    fn test_builder_keeps_scope_field_order() {
        let cfg = ConnectionConfig::builder()
            .endpoint("localhost:8000")
            .query_timeout(Duration::from_secs(1))
            .auth_mode(AuthMode::Scope)
            .scope("user_scope")
            .scope_field("email", "a@b.com")
            .scope_field("pass", "hunter2")
            .build()
            .expect("valid");

        assert_eq!(
            cfg.scope_fields,
            vec![ScopeField::new("email", "a@b.com"), ScopeField::new("pass", "hunter2")]
        );
    }

    #[test]
    fn test_deserialize_from_settings_json() {
        let cfg: ConnectionConfig = serde_json::from_value(json!({
            "endpoint": "http://localhost:8000",
            "namespace": "test",
            "database": "test",
            "username": "root",
            "password": "root",
            "authMode": "scope-signup",
            "scope": "account",
            "scopeFields": [{"subject": "email", "value": "a@b.com"}],
            "queryTimeout": 2.5
        }))
        .expect("deserialize");

        assert_eq!(cfg.auth_mode, AuthMode::ScopeSignup);
        assert_eq!(cfg.query_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.keepalive_interval, DEFAULT_KEEPALIVE_INTERVAL);
        assert!(cfg.has_selection());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_deserialize_rejects_negative_timeout() {
        let result = serde_json::from_value::<ConnectionConfig>(json!({
            "endpoint": "localhost:8000",
            "queryTimeout": -1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_bounds_durations() {
        let huge: ConnectionConfig = serde_json::from_value(json!({
            "endpoint": "localhost:8000",
            "queryTimeout": 1e12
        }))
        .expect("deserialize");
        assert!(matches!(huge.validate(), Err(Error::Config { .. })));

        let mut cfg = config("localhost:8000");
        cfg.query_timeout = MAX_QUERY_TIMEOUT;
        assert!(cfg.validate().is_ok());

        cfg.keepalive_interval = MAX_KEEPALIVE_INTERVAL + Duration::from_secs(1);
        assert!(matches!(cfg.validate(), Err(Error::Config { .. })));

        let built = ConnectionConfig::builder()
            .endpoint("localhost:8000")
            .query_timeout(Duration::MAX)
            .build();
        assert!(matches!(built, Err(Error::Config { .. })));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cfg = ConnectionConfig::builder()
            .endpoint("localhost:8000")
            .query_timeout(Duration::from_secs(1))
            .credentials("root", "s3cret")
            .token("eyJhbGciOi")
            .build()
            .expect("valid");

        let debug = format!("{cfg:?}");
        assert!(debug.contains("root"));
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("eyJhbGciOi"));
        assert!(debug.contains("<redacted>"));
    }
}
