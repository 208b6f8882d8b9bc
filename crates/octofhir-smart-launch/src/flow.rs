//! Per-attempt launch state machine.
//!
//! ```text
//! Start ─► Classified ─┬─► NotApplicable ─────────────► Done (continue)
//!                      ├─► TokenInvalid ──────────────► Done (invalid_request)
//!                      └─► Resolving ─┬─► Bound ──────► Done (continue)
//!                                     └─► ResolutionFailed ► Done (server_error)
//! ```
//!
//! Every attempt first clears launch context left by an earlier attempt, so a
//! stale patient can never leak into a new login.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::binder::LaunchContextBinder;
use crate::context::ContextResolver;
use crate::error::LaunchError;
use crate::session::LaunchSession;
use crate::smart::{LaunchFlavor, LaunchRequest, require_launch_token};

/// HTTP status of a redirecting failure.
pub const STATUS_FOUND: u16 = 302;
/// HTTP status of a non-redirecting failure.
pub const STATUS_BAD_REQUEST: u16 = 400;

// ============================================================================
// States and Outcomes
// ============================================================================

/// States of one launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchState {
    Start,
    Classified,
    NotApplicable,
    TokenInvalid,
    Resolving,
    Bound,
    ResolutionFailed,
    Done,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Classified => "classified",
            Self::NotApplicable => "not_applicable",
            Self::TokenInvalid => "token_invalid",
            Self::Resolving => "resolving",
            Self::Bound => "bound",
            Self::ResolutionFailed => "resolution_failed",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// A failed launch attempt, described for the host's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowFailure {
    /// OAuth error code (`invalid_request` or `server_error`).
    pub error_code: &'static str,
    /// Human-readable description.
    pub description: String,
    /// Redirect target, when the failure is reported by redirect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// HTTP status of the response.
    pub status: u16,
    /// Terminal state that produced the failure.
    pub state: LaunchState,
}

impl FlowFailure {
    /// Failure redirected back to the client with `invalid_request`.
    ///
    /// Falls back to a plain 400 when `redirect_uri` is not an absolute URL.
    #[must_use]
    pub fn invalid_request(redirect_uri: &str, error: &LaunchError) -> Self {
        let redirect_uri = Url::parse(redirect_uri).ok().map(|_| redirect_uri.to_string());
        Self {
            error_code: error.oauth_error_code(),
            description: error.to_string(),
            status: if redirect_uri.is_some() {
                STATUS_FOUND
            } else {
                STATUS_BAD_REQUEST
            },
            redirect_uri,
            state: LaunchState::TokenInvalid,
        }
    }

    /// Failure answered directly with a 400 `server_error` response.
    #[must_use]
    pub fn server_error(error: &LaunchError) -> Self {
        Self {
            error_code: error.oauth_error_code(),
            description: error.to_string(),
            redirect_uri: None,
            status: STATUS_BAD_REQUEST,
            state: LaunchState::ResolutionFailed,
        }
    }

    /// Returns the `Location` header for redirecting failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use octofhir_smart_launch::LaunchError;
    /// use octofhir_smart_launch::flow::FlowFailure;
    ///
    /// let failure = FlowFailure::invalid_request("https://app.example.com/cb", &LaunchError::MissingToken);
    /// let location = failure.location().unwrap();
    /// assert!(location.starts_with("https://app.example.com/cb?error=invalid_request"));
    /// ```
    #[must_use]
    pub fn location(&self) -> Option<String> {
        let mut url = Url::parse(self.redirect_uri.as_deref()?).ok()?;
        url.query_pairs_mut()
            .append_pair("error", self.error_code)
            .append_pair("error_description", &self.description);
        Some(url.into())
    }
}

/// Result of one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlowOutcome {
    /// Continue the flow; the user is not yet authenticated.
    Continue {
        /// Detected launch flavor.
        flavor: LaunchFlavor,
        /// Terminal state before `Done`.
        state: LaunchState,
    },
    /// Abort the flow with an error response.
    Failure(FlowFailure),
}

impl FlowOutcome {
    /// Returns true for [`FlowOutcome::Continue`].
    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue { .. })
    }

    /// Returns the terminal state before `Done`.
    #[must_use]
    pub fn state(&self) -> LaunchState {
        match self {
            Self::Continue { state, .. } => *state,
            Self::Failure(failure) => failure.state,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives one authentication attempt through the launch state machine.
///
/// Attempts are independent; one orchestrator serves any number of
/// concurrent attempts.
#[derive(Clone)]
pub struct LaunchFlowOrchestrator {
    resolver: Arc<dyn ContextResolver>,
    binder: LaunchContextBinder,
}

impl LaunchFlowOrchestrator {
    /// Creates an orchestrator resolving through `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn ContextResolver>) -> Self {
        Self {
            resolver,
            binder: LaunchContextBinder::new(),
        }
    }

    /// Processes the launch part of one authentication attempt.
    ///
    /// Never fails; every error is folded into [`FlowOutcome::Failure`].
    pub async fn process_launch<S>(&self, request: &LaunchRequest, session: &mut S) -> FlowOutcome
    where
        S: LaunchSession + ?Sized,
    {
        tracing::debug!(client_id = %request.client_id, state = %LaunchState::Start, "Processing launch");

        // Start: drop context bound by an earlier attempt
        if let Err(e) = self.binder.clear(session) {
            tracing::error!(error = %e, "Failed to clear stale launch context");
            return FlowOutcome::Failure(FlowFailure::server_error(&e));
        }

        let flavor = request.flavor();
        tracing::debug!(flavor = %flavor, state = %LaunchState::Classified, "Classified launch");

        match flavor {
            LaunchFlavor::None => FlowOutcome::Continue {
                flavor,
                state: LaunchState::NotApplicable,
            },
            LaunchFlavor::PatientLaunch => {
                tracing::info!(
                    client_id = %request.client_id,
                    "Patient launch requested; patient selection is left to a later step"
                );
                FlowOutcome::Continue {
                    flavor,
                    state: LaunchState::NotApplicable,
                }
            }
            LaunchFlavor::EhrLaunch => self.ehr_launch(request, session).await,
        }
    }

    async fn ehr_launch<S>(&self, request: &LaunchRequest, session: &mut S) -> FlowOutcome
    where
        S: LaunchSession + ?Sized,
    {
        let flavor = LaunchFlavor::EhrLaunch;

        let token = match require_launch_token(request.launch_token.as_deref()) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(
                    client_id = %request.client_id,
                    state = %LaunchState::TokenInvalid,
                    "EHR launch without a launch parameter"
                );
                return FlowOutcome::Failure(FlowFailure::invalid_request(&request.redirect_uri, &e));
            }
        };

        tracing::info!(
            client_id = %request.client_id,
            launch_token_len = token.len(),
            state = %LaunchState::Resolving,
            "Resolving EHR launch context"
        );

        let bound = match self.resolver.resolve(&token).await {
            Ok(context) => self.binder.bind(session, &context),
            Err(e) => Err(e),
        };

        match bound {
            Ok(()) => {
                tracing::info!(client_id = %request.client_id, state = %LaunchState::Bound, "EHR launch context bound");
                FlowOutcome::Continue {
                    flavor,
                    state: LaunchState::Bound,
                }
            }
            Err(e) => {
                tracing::warn!(
                    client_id = %request.client_id,
                    error = %e,
                    category = %e.category(),
                    state = %LaunchState::ResolutionFailed,
                    "EHR launch context resolution failed"
                );
                FlowOutcome::Failure(FlowFailure::server_error(&e))
            }
        }
    }
}

impl fmt::Debug for LaunchFlowOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchFlowOrchestrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::session::{MemorySession, PATIENT_CLIENT_ATTRIBUTE, PATIENT_ID_NOTE};
    use crate::smart::ResolvedContext;

    struct StubResolver {
        result: Result<ResolvedContext, LaunchError>,
        calls: AtomicU32,
        tokens: Mutex<Vec<String>>,
    }

    impl StubResolver {
        fn new(result: Result<ResolvedContext, LaunchError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicU32::new(0),
                tokens: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ContextResolver for StubResolver {
        async fn resolve(&self, launch_token: &str) -> Result<ResolvedContext, LaunchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(launch_token.to_string());
            self.result.clone()
        }
    }

    fn request(scope: &str, launch: Option<&str>) -> LaunchRequest {
        LaunchRequest::from_scope_param(
            scope,
            launch.map(str::to_string),
            "app",
            "https://app.example.com/cb",
        )
    }

    #[tokio::test]
    async fn test_not_smart_passes_through() {
        let resolver = StubResolver::new(Ok(ResolvedContext::with_patient("P1")));
        let orchestrator = LaunchFlowOrchestrator::new(resolver.clone());
        let mut session = MemorySession::new();

        let outcome = orchestrator
            .process_launch(&request("openid profile", Some("abc")), &mut session)
            .await;

        assert_eq!(
            outcome,
            FlowOutcome::Continue {
                flavor: LaunchFlavor::None,
                state: LaunchState::NotApplicable
            }
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(session.has_no_launch_context());
    }

    #[tokio::test]
    async fn test_patient_launch_stops_short() {
        let resolver = StubResolver::new(Ok(ResolvedContext::with_patient("P1")));
        let orchestrator = LaunchFlowOrchestrator::new(resolver.clone());
        let mut session = MemorySession::new();

        let outcome = orchestrator
            .process_launch(&request("openid launch/patient", None), &mut session)
            .await;

        assert!(outcome.is_continue());
        assert_eq!(outcome.state(), LaunchState::NotApplicable);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_token_redirects_invalid_request() {
        let resolver = StubResolver::new(Ok(ResolvedContext::with_patient("P1")));
        let orchestrator = LaunchFlowOrchestrator::new(resolver.clone());
        let mut session = MemorySession::new();

        let FlowOutcome::Failure(failure) = orchestrator
            .process_launch(&request("openid launch", Some("  ")), &mut session)
            .await
        else {
            panic!("expected failure");
        };

        assert_eq!(failure.error_code, "invalid_request");
        assert_eq!(failure.status, STATUS_FOUND);
        assert_eq!(failure.state, LaunchState::TokenInvalid);
        assert_eq!(
            failure.location().unwrap(),
            "https://app.example.com/cb?error=invalid_request&error_description=The+%27launch%27+parameter+is+blank%2C+or+missing."
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ehr_launch_binds_context() {
        let resolver = StubResolver::new(Ok(ResolvedContext::with_patient("P1").encounter("E1")));
        let orchestrator = LaunchFlowOrchestrator::new(resolver.clone());
        let mut session = MemorySession::new();

        let outcome = orchestrator
            .process_launch(&request("openid launch", Some(" abc123 ")), &mut session)
            .await;

        assert_eq!(
            outcome,
            FlowOutcome::Continue {
                flavor: LaunchFlavor::EhrLaunch,
                state: LaunchState::Bound
            }
        );
        assert_eq!(resolver.tokens.lock().unwrap().as_slice(), ["abc123"]);
        assert_eq!(session.notes[PATIENT_ID_NOTE], "P1");
        assert_eq!(session.client_attributes[PATIENT_CLIENT_ATTRIBUTE], "P1");
    }

    #[tokio::test]
    async fn test_resolution_error_is_server_error() {
        let resolver = StubResolver::new(Err(LaunchError::context_not_found("HTTP 404")));
        let orchestrator = LaunchFlowOrchestrator::new(resolver);
        let mut session = MemorySession::new();

        let FlowOutcome::Failure(failure) = orchestrator
            .process_launch(&request("launch", Some("abc")), &mut session)
            .await
        else {
            panic!("expected failure");
        };

        assert_eq!(failure.error_code, "server_error");
        assert_eq!(failure.status, STATUS_BAD_REQUEST);
        assert_eq!(failure.state, LaunchState::ResolutionFailed);
        assert!(failure.location().is_none());
        assert!(session.has_no_launch_context());
    }

    #[tokio::test]
    async fn test_empty_context_is_server_error() {
        let resolver = StubResolver::new(Ok(ResolvedContext::default()));
        let orchestrator = LaunchFlowOrchestrator::new(resolver);
        let mut session = MemorySession::new();

        let outcome = orchestrator
            .process_launch(&request("launch", Some("abc")), &mut session)
            .await;

        let FlowOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.description, LaunchError::EmptyContext.to_string());
        assert!(session.has_no_launch_context());
    }

    #[tokio::test]
    async fn test_stale_context_cleared_on_new_attempt() {
        let resolver = StubResolver::new(Ok(ResolvedContext::with_patient("P1")));
        let orchestrator = LaunchFlowOrchestrator::new(resolver);
        let mut session = MemorySession::new();

        orchestrator
            .process_launch(&request("launch", Some("abc")), &mut session)
            .await;
        assert!(!session.has_no_launch_context());

        let outcome = orchestrator
            .process_launch(&request("openid", None), &mut session)
            .await;
        assert!(outcome.is_continue());
        assert!(session.has_no_launch_context());
    }

    #[test]
    fn test_invalid_redirect_falls_back_to_400() {
        let failure = FlowFailure::invalid_request("not a url", &LaunchError::MissingToken);
        assert_eq!(failure.status, STATUS_BAD_REQUEST);
        assert!(failure.location().is_none());
    }

    #[test]
    fn test_location_keeps_existing_query() {
        let failure =
            FlowFailure::invalid_request("https://app.example.com/cb?state=xyz", &LaunchError::MissingToken);
        let location = failure.location().unwrap();
        assert!(location.starts_with("https://app.example.com/cb?state=xyz&error=invalid_request&"));
    }
}
