//! HTTP client for the external context service.
//!
//! Resolution is a two-leg exchange:
//!
//! 1. **Authenticate** - client-credentials grant against the token issuer
//! 2. **Exchange** - POST the launch token to the context API with the access
//!    token as bearer credential, receiving `{patient, encounter, fhirUser}`
//!
//! Both legs share one deadline and retry only transient failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;

use super::ContextResolver;
use super::retry::RetryPolicy;
use super::token_cache::{AccessToken, AccessTokenCache, CacheKey};
use crate::config::{ContextServiceConfig, LaunchConfig, ResolutionConfig};
use crate::error::LaunchError;
use crate::smart::ResolvedContext;

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

// ============================================================================
// Wire Types
// ============================================================================

/// Client-credentials token response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
}

/// Launch exchange response from the context API.
#[derive(Debug, Deserialize)]
struct ContextResponse {
    patient: Option<String>,
    encounter: Option<String>,
    #[serde(rename = "fhirUser")]
    fhir_user: Option<String>,
}

impl From<ContextResponse> for ResolvedContext {
    fn from(response: ContextResponse) -> Self {
        Self {
            patient_id: response.patient,
            encounter_id: response.encounter,
            fhir_user: response.fhir_user,
        }
        .normalized()
    }
}

/// OAuth error response body.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Resolves launch tokens against a configured context service.
///
/// # Example
///
/// ```ignore
/// use octofhir_smart_launch::config::LaunchSettings;
/// use octofhir_smart_launch::context::ContextServiceClient;
///
/// let config = LaunchSettings::from_properties(&properties)?.build()?;
/// let client = ContextServiceClient::from_launch_config(config)?;
///
/// let context = client.resolve("abc123").await?;
/// println!("patient: {:?}", context.patient_id);
/// ```
#[derive(Debug, Clone)]
pub struct ContextServiceClient {
    config: Arc<ContextServiceConfig>,
    resolution: ResolutionConfig,
    retry: RetryPolicy,
    http_client: reqwest::Client,
    token_cache: Option<Arc<AccessTokenCache>>,
}

impl ContextServiceClient {
    /// Creates a client for `config`.
    ///
    /// A token cache is created when `resolution.token_cache_enabled` is set.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Config`] if the configuration fails validation
    /// or the HTTP client cannot be created.
    pub fn new(
        config: Arc<ContextServiceConfig>,
        resolution: ResolutionConfig,
    ) -> Result<Self, LaunchError> {
        config
            .validate(resolution.allow_http)
            .map_err(|e| LaunchError::config(e.to_string()))?;

        // Redirects would re-send client credentials to an unvalidated target.
        let http_client = reqwest::Client::builder()
            .connect_timeout(resolution.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| LaunchError::config(format!("Failed to create HTTP client: {e}")))?;

        let token_cache = resolution
            .token_cache_enabled
            .then(|| Arc::new(AccessTokenCache::new(resolution.token_expiry_skew)));

        Ok(Self {
            config,
            retry: resolution.retry_policy(),
            resolution,
            http_client,
            token_cache,
        })
    }

    /// Creates a client from a validated launch configuration.
    ///
    /// # Errors
    ///
    /// See [`ContextServiceClient::new`].
    pub fn from_launch_config(config: LaunchConfig) -> Result<Self, LaunchError> {
        Self::new(Arc::new(config.context), config.resolution)
    }

    /// Replaces the token cache, e.g. to share one cache between clients.
    #[must_use]
    pub fn with_token_cache(mut self, cache: Arc<AccessTokenCache>) -> Self {
        self.token_cache = Some(cache);
        self
    }

    /// Returns the context service configuration.
    #[must_use]
    pub fn config(&self) -> &ContextServiceConfig {
        &self.config
    }

    /// Returns the resolution settings.
    #[must_use]
    pub fn resolution(&self) -> &ResolutionConfig {
        &self.resolution
    }

    /// Returns the token cache, if caching is enabled.
    #[must_use]
    pub fn token_cache(&self) -> Option<&Arc<AccessTokenCache>> {
        self.token_cache.as_ref()
    }

    /// Resolves a launch token using the client's own configuration.
    ///
    /// # Errors
    ///
    /// See [`ContextServiceClient::resolve_with`].
    pub async fn resolve(&self, launch_token: &str) -> Result<ResolvedContext, LaunchError> {
        self.resolve_with(launch_token, &self.config).await
    }

    /// Resolves a launch token against an explicit context service.
    ///
    /// Both legs, including retries and backoff, run under the configured
    /// deadline. Dropping the returned future cancels in-flight requests.
    ///
    /// # Errors
    ///
    /// - `AuthFailure` if the issuer rejects the credentials or redirects, or
    ///   the context API answers 401/403
    /// - `TransientFailure` if 5xx, 429 or connection errors persist
    /// - `ContextNotFound` if the context API rejects the launch token
    /// - `MalformedResponse` if a response body cannot be interpreted or the
    ///   context API redirects (redirects are never followed)
    /// - `Timeout` if the deadline is exceeded
    /// - `Config` if `config` uses a disallowed scheme or lacks credentials
    pub async fn resolve_with(
        &self,
        launch_token: &str,
        config: &ContextServiceConfig,
    ) -> Result<ResolvedContext, LaunchError> {
        config
            .validate(self.resolution.allow_http)
            .map_err(|e| LaunchError::config(e.to_string()))?;

        let limit = self.resolution.timeout;
        match tokio::time::timeout(limit, self.resolve_inner(launch_token, config)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = limit.as_millis() as u64,
                    context_api = %config.context_api_url,
                    "Launch context resolution timed out"
                );
                Err(LaunchError::Timeout { limit })
            }
        }
    }

    async fn resolve_inner(
        &self,
        launch_token: &str,
        config: &ContextServiceConfig,
    ) -> Result<ResolvedContext, LaunchError> {
        let key = CacheKey::for_config(config);
        let access_token = self.access_token(config, &key).await?;

        let result = self
            .retry
            .run("context", || self.exchange(config, &access_token, launch_token))
            .await;

        if let Err(e) = &result
            && e.invalidates_token()
        {
            self.invalidate(&key).await;
        }

        result
    }

    async fn access_token(
        &self,
        config: &ContextServiceConfig,
        key: &CacheKey,
    ) -> Result<String, LaunchError> {
        let fetch = || self.retry.run("token", || self.request_token(config));

        let result = match &self.token_cache {
            Some(cache) => cache.get_or_fetch(key, fetch).await,
            None => fetch().await.map(|token| token.value),
        };

        if let Err(e) = &result
            && e.invalidates_token()
        {
            self.invalidate(key).await;
        }

        result
    }

    async fn invalidate(&self, key: &CacheKey) {
        if let Some(cache) = &self.token_cache {
            cache.invalidate(key).await;
        }
    }

    /// Leg 1: client-credentials grant.
    async fn request_token(&self, config: &ContextServiceConfig) -> Result<AccessToken, LaunchError> {
        let scope = config.scope_param();
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.expose()),
        ];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        tracing::debug!(
            issuer = %config.issuer_url,
            client_id = %config.client_id,
            "Requesting context service access token"
        );

        let response = self
            .http_client
            .post(config.issuer_url.as_str())
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error("token", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = describe_error(status, &body);

            return Err(if is_transient_status(status) {
                LaunchError::transient(message, 1)
            } else if status.is_redirection() {
                tracing::warn!(status = status.as_u16(), "Token issuer answered with a redirect");
                LaunchError::auth_failure(format!("Unexpected redirect from token issuer: {message}"))
            } else {
                tracing::warn!(status = status.as_u16(), "Token issuer rejected client credentials");
                LaunchError::auth_failure(message)
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error("token", &e))?;

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| LaunchError::malformed(format!("Failed to parse token response: {e}")))?;

        if token.access_token.trim().is_empty() {
            return Err(LaunchError::malformed("Token response has an empty access_token"));
        }

        if let Some(token_type) = &token.token_type
            && !token_type.eq_ignore_ascii_case("bearer")
        {
            return Err(LaunchError::malformed(format!(
                "Unsupported token_type '{token_type}'"
            )));
        }

        Ok(AccessToken::new(
            token.access_token,
            token.expires_in.map(Duration::from_secs),
        ))
    }

    /// Leg 2: launch token exchange.
    async fn exchange(
        &self,
        config: &ContextServiceConfig,
        access_token: &str,
        launch_token: &str,
    ) -> Result<ResolvedContext, LaunchError> {
        let mut body = serde_json::Map::new();
        body.insert(
            config.launch_field.clone(),
            serde_json::Value::String(launch_token.to_string()),
        );

        tracing::debug!(
            context_api = %config.context_api_url,
            launch_token_len = launch_token.len(),
            "Exchanging launch token"
        );

        let response = self
            .http_client
            .post(config.context_api_url.as_str())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("context", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = describe_error(status, &body);

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    tracing::warn!(status = status.as_u16(), "Context API rejected access token");
                    LaunchError::auth_failure(message)
                }
                s if is_transient_status(s) => LaunchError::transient(message, 1),
                s if s.is_redirection() => {
                    tracing::warn!(status = s.as_u16(), "Context API answered with a redirect");
                    LaunchError::malformed(format!("Unexpected redirect from context API: {message}"))
                }
                _ => LaunchError::context_not_found(message),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error("context", &e))?;

        let context: ContextResponse = serde_json::from_str(&body).map_err(|e| {
            LaunchError::malformed(format!("Failed to parse context response: {e}"))
        })?;

        Ok(context.into())
    }
}

#[async_trait]
impl ContextResolver for ContextServiceClient {
    async fn resolve(&self, launch_token: &str) -> Result<ResolvedContext, LaunchError> {
        ContextServiceClient::resolve(self, launch_token).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn transport_error(leg: &'static str, error: &reqwest::Error) -> LaunchError {
    tracing::debug!(leg, error = %error, "Context service transport error");
    LaunchError::transient(error.to_string(), 1)
}

fn describe_error(status: StatusCode, body: &str) -> String {
    if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(body) {
        return match oauth_error.error_description {
            Some(description) => format!("{}: {}", oauth_error.error, description),
            None => oauth_error.error,
        };
    }

    let body: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status} - {body}")
    }
}
