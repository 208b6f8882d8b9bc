//! Launch-context resolution error types.
//!
//! Every failure in the launch flow is expressed as a [`LaunchError`]. The
//! orchestrator folds these into exactly two user-visible outcomes:
//! `invalid_request` for a missing launch token and `server_error` for
//! everything else.

use std::fmt;
use std::time::Duration;

/// Errors that can occur while resolving and binding a SMART launch context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    /// The `launch` scope was requested but the launch parameter is absent or blank.
    #[error("The 'launch' parameter is blank, or missing.")]
    MissingToken,

    /// The token issuer or context server rejected our credentials.
    #[error("Context service authentication failed: {message}")]
    AuthFailure {
        /// Description of the rejection.
        message: String,
    },

    /// A transient network or server failure persisted after all retries.
    #[error("Context service unavailable after {attempts} attempt(s): {message}")]
    TransientFailure {
        /// Description of the last failure.
        message: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The context server does not know the launch token, or it has expired.
    #[error("Launch context not found: {message}")]
    ContextNotFound {
        /// Description reported by the context server.
        message: String,
    },

    /// A response body could not be interpreted.
    #[error("Malformed response from context service: {message}")]
    MalformedResponse {
        /// Description of the parse failure.
        message: String,
    },

    /// The resolution did not complete within the configured deadline.
    #[error("Launch context resolution timed out after {}ms", .limit.as_millis())]
    Timeout {
        /// The deadline that was exceeded.
        limit: Duration,
    },

    /// The context server answered but every context field was empty.
    #[error("Could not convert launch parameter to a launch context")]
    EmptyContext,

    /// The host refused to store the resolved context.
    #[error("Failed to bind launch context: {message}")]
    Bind {
        /// Description of the host failure.
        message: String,
    },

    /// The context service configuration is unusable.
    #[error("Invalid context service configuration: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl LaunchError {
    /// Creates a new `AuthFailure` error.
    #[must_use]
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    /// Creates a new `TransientFailure` error.
    #[must_use]
    pub fn transient(message: impl Into<String>, attempts: u32) -> Self {
        Self::TransientFailure {
            message: message.into(),
            attempts,
        }
    }

    /// Creates a new `ContextNotFound` error.
    #[must_use]
    pub fn context_not_found(message: impl Into<String>) -> Self {
        Self::ContextNotFound {
            message: message.into(),
        }
    }

    /// Creates a new `MalformedResponse` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Creates a new `Bind` error.
    #[must_use]
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind {
            message: message.into(),
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller's request is at fault (the `invalid_request` path).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingToken)
    }

    /// Returns `true` if the failure may succeed when retried.
    ///
    /// Authorization failures and malformed data are never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFailure { .. })
    }

    /// Returns `true` if a cached access token must be discarded.
    #[must_use]
    pub fn invalidates_token(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingToken => ErrorCategory::Validation,
            Self::AuthFailure { .. } => ErrorCategory::Authentication,
            Self::TransientFailure { .. } | Self::Timeout { .. } => ErrorCategory::Infrastructure,
            Self::ContextNotFound { .. } | Self::EmptyContext => ErrorCategory::Context,
            Self::MalformedResponse { .. } => ErrorCategory::Protocol,
            Self::Bind { .. } => ErrorCategory::Host,
            Self::Config { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns the OAuth 2.0 error code reported to the client.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        if self.is_client_error() {
            "invalid_request"
        } else {
            "server_error"
        }
    }
}

/// Categories of launch errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or incomplete authorization request.
    Validation,
    /// Credential rejection at the issuer or context server.
    Authentication,
    /// Network, availability and deadline failures.
    Infrastructure,
    /// The launch could not be turned into a clinical context.
    Context,
    /// The remote party violated the wire contract.
    Protocol,
    /// The host's session stores failed.
    Host,
    /// The resolver was misconfigured.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Context => write!(f, "context"),
            Self::Protocol => write!(f, "protocol"),
            Self::Host => write!(f, "host"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
