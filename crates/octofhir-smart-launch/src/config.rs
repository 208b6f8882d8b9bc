//! Context service and resolution configuration.
//!
//! The host configures the launch resolver through a flat set of string
//! properties (the authenticator configuration). [`LaunchSettings`] is that raw
//! surface; [`LaunchSettings::build`] validates it into the typed
//! [`ContextServiceConfig`] and [`ResolutionConfig`] used at runtime.
//!
//! # Example (TOML)
//!
//! ```toml
//! context_api_url = "https://context.example.com/api/context"
//! context_iss_url = "https://context.example.com/oauth/token"
//! context_client_id = "launch-resolver"
//! context_client_secret = "s3cret"
//! context_client_scope = "context.read launch"
//! timeout_ms = 5000
//! retry_max_attempts = 3
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::context::retry::RetryPolicy;

// ============================================================================
// Property Keys
// ============================================================================

/// URL of the context server's launch exchange endpoint.
pub const CONF_CONTEXT_API_URL: &str = "context-api-url";
/// Token endpoint of the context server's token issuer.
pub const CONF_CONTEXT_ISS_URL: &str = "context-iss-url";
/// OAuth2 client ID used against the token issuer.
pub const CONF_CONTEXT_CLIENT_ID: &str = "context-client-id";
/// OAuth2 client secret used against the token issuer.
pub const CONF_CONTEXT_CLIENT_SECRET: &str = "context-client-secret";
/// Space-delimited scopes requested from the token issuer.
pub const CONF_CONTEXT_CLIENT_SCOPE: &str = "context-client-scope";
/// Name of the request field that carries the launch token.
pub const CONF_CONTEXT_LAUNCH_FIELD: &str = "context-launch-field";
/// End-to-end resolution deadline in milliseconds.
pub const CONF_TIMEOUT_MS: &str = "timeout-ms";
/// Total attempts per network leg, including the first.
pub const CONF_RETRY_MAX_ATTEMPTS: &str = "retry-max-attempts";
/// Initial retry backoff in milliseconds.
pub const CONF_RETRY_BACKOFF_MS: &str = "retry-backoff-ms";
/// Enables short-lived access token caching.
pub const CONF_TOKEN_CACHE_ENABLED: &str = "token-cache-enabled";
/// Safety margin subtracted from a cached token's lifetime, in milliseconds.
pub const CONF_TOKEN_EXPIRY_SKEW_MS: &str = "token-expiry-skew-ms";
/// Allows plain HTTP endpoints.
pub const CONF_ALLOW_HTTP: &str = "allow-http";

/// Default request field carrying the launch token.
pub const DEFAULT_LAUNCH_FIELD: &str = "launch";

// ============================================================================
// Client Secret
// ============================================================================

/// OAuth2 client secret.
///
/// `Debug`, `Display` and `Serialize` never reveal the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret(String);

impl ClientSecret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the secret for use on the wire.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the secret is empty or blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret([REDACTED])")
    }
}

impl fmt::Display for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Serialize for ClientSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for ClientSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

// ============================================================================
// Typed Configuration
// ============================================================================

/// Connection settings for the context service.
///
/// Immutable for the lifetime of a resolution; share it behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct ContextServiceConfig {
    /// Token endpoint of the context server's token issuer.
    pub issuer_url: Url,

    /// OAuth2 client ID for the client-credentials grant.
    pub client_id: String,

    /// OAuth2 client secret for the client-credentials grant.
    pub client_secret: ClientSecret,

    /// Scopes requested from the issuer, in order.
    pub scopes: Vec<String>,

    /// Launch exchange endpoint of the context server.
    pub context_api_url: Url,

    /// Request body field carrying the launch token.
    pub launch_field: String,
}

impl ContextServiceConfig {
    /// Creates a configuration with no scopes and the default launch field.
    #[must_use]
    pub fn new(
        issuer_url: Url,
        client_id: impl Into<String>,
        client_secret: ClientSecret,
        context_api_url: Url,
    ) -> Self {
        Self {
            issuer_url,
            client_id: client_id.into(),
            client_secret,
            scopes: Vec::new(),
            context_api_url,
            launch_field: DEFAULT_LAUNCH_FIELD.to_string(),
        }
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the request field carrying the launch token.
    #[must_use]
    pub fn with_launch_field(mut self, field: impl Into<String>) -> Self {
        self.launch_field = field.into();
        self
    }

    /// Returns the scopes as a space-delimited `scope` parameter.
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Validates credentials, launch field and endpoint schemes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for an empty client ID or blank secret,
    /// and `ConfigError::InvalidValue` for an empty launch field or an
    /// endpoint that is not HTTPS (HTTP is accepted when `allow_http` is set).
    pub fn validate(&self, allow_http: bool) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing(CONF_CONTEXT_CLIENT_ID.to_string()));
        }

        if self.client_secret.is_blank() {
            return Err(ConfigError::Missing(CONF_CONTEXT_CLIENT_SECRET.to_string()));
        }

        if self.launch_field.trim().is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "{CONF_CONTEXT_LAUNCH_FIELD} cannot be empty"
            )));
        }

        check_scheme(CONF_CONTEXT_ISS_URL, &self.issuer_url, allow_http)?;
        check_scheme(CONF_CONTEXT_API_URL, &self.context_api_url, allow_http)
    }
}

fn check_scheme(key: &str, url: &Url, allow_http: bool) -> Result<(), ConfigError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        other => Err(ConfigError::InvalidValue(format!(
            "{key}: scheme '{other}' is not allowed (only HTTPS)"
        ))),
    }
}

/// Timing, retry and caching behavior of a resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Deadline spanning both network legs, retries included.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Total attempts per network leg, including the first.
    pub retry_max_attempts: u32,

    /// Initial backoff between attempts; doubles on each retry.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Upper bound for a single backoff sleep.
    #[serde(with = "humantime_serde")]
    pub retry_max_backoff: Duration,

    /// Cache access tokens until shortly before they expire.
    pub token_cache_enabled: bool,

    /// Margin subtracted from a token's lifetime before it is considered stale.
    #[serde(with = "humantime_serde")]
    pub token_expiry_skew: Duration,

    /// Allow plain HTTP endpoints. Only for development and tests.
    pub allow_http: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry_max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            retry_max_backoff: Duration::from_secs(2),
            token_cache_enabled: false,
            token_expiry_skew: Duration::from_secs(30),
            allow_http: false,
        }
    }
}

impl ResolutionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the end-to-end deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of attempts per leg.
    #[must_use]
    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = attempts;
        self
    }

    /// Sets the initial retry backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Enables or disables access token caching.
    #[must_use]
    pub fn with_token_cache(mut self, enabled: bool) -> Self {
        self.token_cache_enabled = enabled;
        self
    }

    /// Sets the token expiry skew.
    #[must_use]
    pub fn with_token_expiry_skew(mut self, skew: Duration) -> Self {
        self.token_expiry_skew = skew;
        self
    }

    /// Allows HTTP (non-HTTPS) endpoints.
    ///
    /// # Warning
    ///
    /// This should only be used for testing. Client secrets and access tokens
    /// travel over these connections.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Returns the retry policy derived from this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_backoff,
            self.retry_max_backoff,
        )
    }
}

/// Validated launch resolver configuration.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchConfig {
    /// Context service connection settings.
    pub context: ContextServiceConfig,
    /// Timing, retry and caching behavior.
    pub resolution: ResolutionConfig,
}

// ============================================================================
// Raw Settings
// ============================================================================

/// Raw launch resolver settings as provided by the host.
///
/// Field names match the host property keys with `-` replaced by `_`, so the
/// same struct deserializes from TOML files and environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// See [`CONF_CONTEXT_API_URL`].
    pub context_api_url: Option<String>,
    /// See [`CONF_CONTEXT_ISS_URL`].
    pub context_iss_url: Option<String>,
    /// See [`CONF_CONTEXT_CLIENT_ID`].
    pub context_client_id: Option<String>,
    /// See [`CONF_CONTEXT_CLIENT_SECRET`].
    pub context_client_secret: Option<ClientSecret>,
    /// See [`CONF_CONTEXT_CLIENT_SCOPE`].
    pub context_client_scope: String,
    /// See [`CONF_CONTEXT_LAUNCH_FIELD`].
    pub context_launch_field: String,
    /// See [`CONF_TIMEOUT_MS`].
    pub timeout_ms: u64,
    /// See [`CONF_RETRY_MAX_ATTEMPTS`].
    pub retry_max_attempts: u32,
    /// See [`CONF_RETRY_BACKOFF_MS`].
    pub retry_backoff_ms: u64,
    /// See [`CONF_TOKEN_CACHE_ENABLED`].
    pub token_cache_enabled: bool,
    /// See [`CONF_TOKEN_EXPIRY_SKEW_MS`].
    pub token_expiry_skew_ms: u64,
    /// See [`CONF_ALLOW_HTTP`].
    pub allow_http: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        let resolution = ResolutionConfig::default();
        Self {
            context_api_url: None,
            context_iss_url: None,
            context_client_id: None,
            context_client_secret: None,
            context_client_scope: String::new(),
            context_launch_field: DEFAULT_LAUNCH_FIELD.to_string(),
            timeout_ms: resolution.timeout.as_millis() as u64,
            retry_max_attempts: resolution.retry_max_attempts,
            retry_backoff_ms: resolution.retry_backoff.as_millis() as u64,
            token_cache_enabled: resolution.token_cache_enabled,
            token_expiry_skew_ms: resolution.token_expiry_skew.as_millis() as u64,
            allow_http: resolution.allow_http,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl LaunchSettings {
    /// Reads settings from the host's authenticator property map.
    ///
    /// Unknown keys are ignored; absent keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric or boolean property
    /// cannot be parsed.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        for (key, value) in properties {
            let value = value.trim();
            match key.as_str() {
                CONF_CONTEXT_API_URL => settings.context_api_url = non_blank(value),
                CONF_CONTEXT_ISS_URL => settings.context_iss_url = non_blank(value),
                CONF_CONTEXT_CLIENT_ID => settings.context_client_id = non_blank(value),
                CONF_CONTEXT_CLIENT_SECRET => {
                    settings.context_client_secret = non_blank(value).map(ClientSecret)
                }
                CONF_CONTEXT_CLIENT_SCOPE => settings.context_client_scope = value.to_string(),
                CONF_CONTEXT_LAUNCH_FIELD => settings.context_launch_field = value.to_string(),
                CONF_TIMEOUT_MS => settings.timeout_ms = parse_property(key, value)?,
                CONF_RETRY_MAX_ATTEMPTS => {
                    settings.retry_max_attempts = parse_property(key, value)?
                }
                CONF_RETRY_BACKOFF_MS => settings.retry_backoff_ms = parse_property(key, value)?,
                CONF_TOKEN_CACHE_ENABLED => {
                    settings.token_cache_enabled = parse_property(key, value)?
                }
                CONF_TOKEN_EXPIRY_SKEW_MS => {
                    settings.token_expiry_skew_ms = parse_property(key, value)?
                }
                CONF_ALLOW_HTTP => settings.allow_http = parse_property(key, value)?,
                other => tracing::debug!(key = other, "Ignoring unknown launch property"),
            }
        }

        Ok(settings)
    }

    /// Validates the settings and builds the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a URL or credential is absent and
    /// `ConfigError::InvalidValue` if:
    /// - A URL cannot be parsed or uses a scheme other than HTTPS
    ///   (HTTP is accepted only with `allow_http`)
    /// - `timeout_ms` or `retry_max_attempts` is zero
    /// - The launch field name is empty
    pub fn build(&self) -> Result<LaunchConfig, ConfigError> {
        let issuer_url = parse_url(CONF_CONTEXT_ISS_URL, self.context_iss_url.as_deref())?;
        let context_api_url = parse_url(CONF_CONTEXT_API_URL, self.context_api_url.as_deref())?;

        let client_id = self
            .context_client_id
            .clone()
            .ok_or_else(|| ConfigError::Missing(CONF_CONTEXT_CLIENT_ID.to_string()))?;

        let client_secret = self
            .context_client_secret
            .clone()
            .ok_or_else(|| ConfigError::Missing(CONF_CONTEXT_CLIENT_SECRET.to_string()))?;

        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{CONF_TIMEOUT_MS} must be > 0"
            )));
        }

        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{CONF_RETRY_MAX_ATTEMPTS} must be > 0"
            )));
        }

        let context = ContextServiceConfig::new(issuer_url, client_id, client_secret, context_api_url)
            .with_scopes(self.context_client_scope.split_whitespace())
            .with_launch_field(self.context_launch_field.trim());
        context.validate(self.allow_http)?;

        let resolution = ResolutionConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            retry_max_attempts: self.retry_max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            token_cache_enabled: self.token_cache_enabled,
            token_expiry_skew: Duration::from_millis(self.token_expiry_skew_ms),
            allow_http: self.allow_http,
            ..ResolutionConfig::default()
        };

        Ok(LaunchConfig {
            context,
            resolution,
        })
    }
}

fn parse_url(key: &str, value: Option<&str>) -> Result<Url, ConfigError> {
    let raw = value.ok_or_else(|| ConfigError::Missing(key.to_string()))?;
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue(format!("{key}: '{raw}' - {e}")))
}

fn non_blank(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_property<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{key}: '{value}' - {e}")))
}
