//! Identity-provider authenticator for SMART EHR launches.
//!
//! [`SmartLaunchAuthenticator`] plugs the launch flow into a host's
//! authentication pipeline. The host exposes its per-attempt state through
//! [`AuthenticationFlowContext`]; [`AuthenticatorDescriptor`] carries the
//! factory metadata the host shows in its admin surfaces.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{
    CONF_ALLOW_HTTP, CONF_CONTEXT_API_URL, CONF_CONTEXT_CLIENT_ID, CONF_CONTEXT_CLIENT_SCOPE,
    CONF_CONTEXT_CLIENT_SECRET, CONF_CONTEXT_ISS_URL, CONF_CONTEXT_LAUNCH_FIELD,
    CONF_RETRY_BACKOFF_MS, CONF_RETRY_MAX_ATTEMPTS, CONF_TIMEOUT_MS, CONF_TOKEN_CACHE_ENABLED,
    CONF_TOKEN_EXPIRY_SKEW_MS, LaunchSettings,
};
use crate::context::{ContextResolver, ContextServiceClient};
use crate::error::LaunchError;
use crate::flow::{FlowFailure, FlowOutcome, LaunchFlowOrchestrator, LaunchState};
use crate::session::LaunchSession;
use crate::smart::LaunchRequest;

/// Provider ID under which the authenticator is registered.
pub const PROVIDER_ID: &str = "smart-ehr-launch";

// ============================================================================
// Host Contract
// ============================================================================

/// Flow error reported to the host alongside a failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostFlowError {
    /// The authorization request itself is unusable.
    GenericAuthenticationError,
    /// The authentication session could not be given a launch context.
    InvalidClientSession,
}

impl HostFlowError {
    /// Maps the terminal launch state to the host flow error.
    #[must_use]
    pub fn for_state(state: LaunchState) -> Self {
        match state {
            LaunchState::TokenInvalid => Self::GenericAuthenticationError,
            _ => Self::InvalidClientSession,
        }
    }
}

/// The host's view of one authentication attempt.
pub trait AuthenticationFlowContext: LaunchSession {
    /// Scopes requested by the client.
    fn requested_scopes(&self) -> BTreeSet<String>;

    /// First value of the `launch` query parameter, if any.
    fn launch_parameter(&self) -> Option<String>;

    /// OAuth client identifier.
    fn client_id(&self) -> String;

    /// Redirect URI of the authorization request.
    fn redirect_uri(&self) -> String;

    /// Marks this step as attempted; the flow continues with the next step.
    fn report_continue(&mut self);

    /// Aborts the flow with the described response.
    fn report_failure(&mut self, error: HostFlowError, failure: FlowFailure);
}

// ============================================================================
// Authenticator
// ============================================================================

/// Authenticator that resolves SMART EHR launch context.
///
/// It never authenticates the user itself: a successful launch only enriches
/// the session and lets the flow continue.
#[derive(Clone, Debug)]
pub struct SmartLaunchAuthenticator {
    orchestrator: LaunchFlowOrchestrator,
}

impl SmartLaunchAuthenticator {
    /// Creates an authenticator resolving through `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn ContextResolver>) -> Self {
        tracing::debug!(provider_id = PROVIDER_ID, "Creating SMART launch authenticator");
        Self {
            orchestrator: LaunchFlowOrchestrator::new(resolver),
        }
    }

    /// Creates an authenticator from the host's configuration properties.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Config`] if the properties are invalid.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, LaunchError> {
        let config = LaunchSettings::from_properties(properties)
            .and_then(|settings| settings.build())
            .map_err(|e| LaunchError::config(e.to_string()))?;
        let client = ContextServiceClient::from_launch_config(config)?;
        Ok(Self::new(Arc::new(client)))
    }

    /// Runs the launch step for one attempt and reports the outcome to the host.
    pub async fn authenticate<C>(&self, context: &mut C) -> FlowOutcome
    where
        C: AuthenticationFlowContext + ?Sized,
    {
        let request = LaunchRequest {
            requested_scopes: context.requested_scopes(),
            launch_token: context.launch_parameter(),
            client_id: context.client_id(),
            redirect_uri: context.redirect_uri(),
        };

        let outcome = self.orchestrator.process_launch(&request, context).await;

        match &outcome {
            FlowOutcome::Continue { .. } => context.report_continue(),
            FlowOutcome::Failure(failure) => {
                context.report_failure(HostFlowError::for_state(failure.state), failure.clone())
            }
        }

        outcome
    }

    /// Handles a form submission. This step has no user interaction.
    pub fn action<C>(&self, _context: &mut C)
    where
        C: AuthenticationFlowContext + ?Sized,
    {
    }

    /// The launch step runs before the user is known.
    #[must_use]
    pub fn requires_user(&self) -> bool {
        false
    }

    /// The launch step applies to every user.
    #[must_use]
    pub fn configured_for(&self) -> bool {
        true
    }

    /// Releases per-request resources. Nothing to release.
    pub fn close(&self) {}
}

// ============================================================================
// Descriptor
// ============================================================================

/// Execution requirement the host may assign to the authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Requirement {
    Required,
    Alternative,
    Disabled,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "REQUIRED"),
            Self::Alternative => write!(f, "ALTERNATIVE"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Input type of a configuration property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Password,
    Integer,
    Boolean,
}

/// One configuration property of the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigProperty {
    /// Property key.
    pub name: &'static str,
    /// Label shown to administrators.
    pub label: &'static str,
    /// Help text shown to administrators.
    pub help_text: &'static str,
    /// Input type.
    pub property_type: PropertyType,
    /// Default value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<&'static str>,
}

impl ConfigProperty {
    const fn new(
        name: &'static str,
        label: &'static str,
        help_text: &'static str,
        property_type: PropertyType,
        default_value: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            label,
            help_text,
            property_type,
            default_value,
        }
    }

    /// Returns true if the property holds secret material.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        self.property_type == PropertyType::Password
    }
}

/// Factory metadata of the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatorDescriptor {
    pub id: &'static str,
    pub display_type: &'static str,
    pub help_text: &'static str,
    pub requirement_choices: Vec<Requirement>,
    pub configurable: bool,
    pub user_setup_allowed: bool,
    pub properties: Vec<ConfigProperty>,
}

impl AuthenticatorDescriptor {
    /// Returns the descriptor of [`SmartLaunchAuthenticator`].
    #[must_use]
    pub fn smart_ehr_launch() -> Self {
        Self {
            id: PROVIDER_ID,
            display_type: "SMART on FHIR: EHR-Launch Context Resolver",
            help_text: "Detects and processes a SMART EHR-Launch using the configured Context API server.",
            requirement_choices: vec![
                Requirement::Required,
                Requirement::Alternative,
                Requirement::Disabled,
            ],
            configurable: true,
            user_setup_allowed: false,
            properties: config_properties(),
        }
    }

    /// Looks up a property by key.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&ConfigProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}

fn config_properties() -> Vec<ConfigProperty> {
    vec![
        ConfigProperty::new(
            CONF_CONTEXT_API_URL,
            "Context API URL",
            "The URL of the Context API server",
            PropertyType::String,
            None,
        ),
        ConfigProperty::new(
            CONF_CONTEXT_ISS_URL,
            "Context Issuer (iss) URL",
            "Token endpoint of the Context API server's token issuer",
            PropertyType::String,
            None,
        ),
        ConfigProperty::new(
            CONF_CONTEXT_CLIENT_ID,
            "Context Service OAuth2 Client ID",
            "Client ID used for the client-credentials grant",
            PropertyType::String,
            None,
        ),
        ConfigProperty::new(
            CONF_CONTEXT_CLIENT_SECRET,
            "Context Service OAuth2 Client Secret",
            "Client secret used for the client-credentials grant",
            PropertyType::Password,
            None,
        ),
        ConfigProperty::new(
            CONF_CONTEXT_CLIENT_SCOPE,
            "Context Service OAuth2 Client Scope(s) space-delimited",
            "Scopes requested from the token issuer",
            PropertyType::String,
            None,
        ),
        ConfigProperty::new(
            CONF_CONTEXT_LAUNCH_FIELD,
            "Launch Field Name",
            "Request body field carrying the launch token",
            PropertyType::String,
            Some("launch"),
        ),
        ConfigProperty::new(
            CONF_TIMEOUT_MS,
            "Resolution Timeout (ms)",
            "Deadline for resolving a launch, retries included",
            PropertyType::Integer,
            Some("5000"),
        ),
        ConfigProperty::new(
            CONF_RETRY_MAX_ATTEMPTS,
            "Maximum Attempts",
            "Attempts per context service call, including the first",
            PropertyType::Integer,
            Some("3"),
        ),
        ConfigProperty::new(
            CONF_RETRY_BACKOFF_MS,
            "Retry Backoff (ms)",
            "Initial backoff between attempts; doubles on each retry",
            PropertyType::Integer,
            Some("200"),
        ),
        ConfigProperty::new(
            CONF_TOKEN_CACHE_ENABLED,
            "Cache Access Tokens",
            "Reuse context service access tokens until shortly before they expire",
            PropertyType::Boolean,
            Some("false"),
        ),
        ConfigProperty::new(
            CONF_TOKEN_EXPIRY_SKEW_MS,
            "Token Expiry Skew (ms)",
            "Margin subtracted from a cached token's lifetime",
            PropertyType::Integer,
            Some("30000"),
        ),
        ConfigProperty::new(
            CONF_ALLOW_HTTP,
            "Allow HTTP",
            "Accept plain HTTP endpoints. Development only",
            PropertyType::Boolean,
            Some("false"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::session::{MemorySession, PATIENT_ID_NOTE};
    use crate::smart::{ResolvedContext, parse_scope_param};

    struct FixedResolver(Result<ResolvedContext, LaunchError>);

    #[async_trait]
    impl ContextResolver for FixedResolver {
        async fn resolve(&self, _launch_token: &str) -> Result<ResolvedContext, LaunchError> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct TestFlow {
        session: MemorySession,
        scope: String,
        launch: Option<String>,
        continued: bool,
        failure: Option<(HostFlowError, FlowFailure)>,
    }

    impl LaunchSession for TestFlow {
        fn session_note(&self, key: &str) -> Option<String> {
            self.session.session_note(key)
        }
        fn set_session_note(&mut self, key: &str, value: &str) -> Result<(), LaunchError> {
            self.session.set_session_note(key, value)
        }
        fn remove_session_note(&mut self, key: &str) -> Result<(), LaunchError> {
            self.session.remove_session_note(key)
        }
        fn client_attribute(&self, key: &str) -> Option<String> {
            self.session.client_attribute(key)
        }
        fn set_client_attribute(&mut self, key: &str, value: &str) -> Result<(), LaunchError> {
            self.session.set_client_attribute(key, value)
        }
        fn remove_client_attribute(&mut self, key: &str) -> Result<(), LaunchError> {
            self.session.remove_client_attribute(key)
        }
    }

    impl AuthenticationFlowContext for TestFlow {
        fn requested_scopes(&self) -> BTreeSet<String> {
            parse_scope_param(&self.scope)
        }
        fn launch_parameter(&self) -> Option<String> {
            self.launch.clone()
        }
        fn client_id(&self) -> String {
            "app".to_string()
        }
        fn redirect_uri(&self) -> String {
            "https://app.example.com/cb".to_string()
        }
        fn report_continue(&mut self) {
            self.continued = true;
        }
        fn report_failure(&mut self, error: HostFlowError, failure: FlowFailure) {
            self.failure = Some((error, failure));
        }
    }

    fn authenticator(result: Result<ResolvedContext, LaunchError>) -> SmartLaunchAuthenticator {
        SmartLaunchAuthenticator::new(Arc::new(FixedResolver(result)))
    }

    #[tokio::test]
    async fn test_authenticate_reports_continue_on_bound() {
        let auth = authenticator(Ok(ResolvedContext::with_patient("P1")));
        let mut flow = TestFlow {
            scope: "openid launch".to_string(),
            launch: Some("abc".to_string()),
            ..TestFlow::default()
        };

        auth.authenticate(&mut flow).await;

        assert!(flow.continued);
        assert!(flow.failure.is_none());
        assert_eq!(flow.session_note(PATIENT_ID_NOTE).as_deref(), Some("P1"));
    }

    #[tokio::test]
    async fn test_authenticate_reports_missing_launch() {
        let auth = authenticator(Ok(ResolvedContext::with_patient("P1")));
        let mut flow = TestFlow {
            scope: "launch".to_string(),
            ..TestFlow::default()
        };

        auth.authenticate(&mut flow).await;

        let (error, failure) = flow.failure.expect("failure reported");
        assert_eq!(error, HostFlowError::GenericAuthenticationError);
        assert_eq!(failure.error_code, "invalid_request");
        assert!(!flow.continued);
    }

    #[tokio::test]
    async fn test_authenticate_reports_resolution_failure() {
        let auth = authenticator(Err(LaunchError::transient("HTTP 503", 3)));
        let mut flow = TestFlow {
            scope: "launch".to_string(),
            launch: Some("abc".to_string()),
            ..TestFlow::default()
        };

        auth.authenticate(&mut flow).await;

        let (error, failure) = flow.failure.expect("failure reported");
        assert_eq!(error, HostFlowError::InvalidClientSession);
        assert_eq!(failure.error_code, "server_error");
        assert_eq!(failure.status, 400);
    }

    #[test]
    fn test_authenticator_flags() {
        let auth = authenticator(Ok(ResolvedContext::default()));
        assert!(!auth.requires_user());
        assert!(auth.configured_for());
    }

    #[test]
    fn test_from_properties_rejects_incomplete_config() {
        let err = SmartLaunchAuthenticator::from_properties(&HashMap::new()).unwrap_err();
        assert!(matches!(err, LaunchError::Config { .. }));
    }

    #[test]
    fn test_descriptor() {
        let descriptor = AuthenticatorDescriptor::smart_ehr_launch();
        assert_eq!(descriptor.id, "smart-ehr-launch");
        assert_eq!(
            descriptor.display_type,
            "SMART on FHIR: EHR-Launch Context Resolver"
        );
        assert!(descriptor.configurable);
        assert!(!descriptor.user_setup_allowed);
        assert_eq!(descriptor.requirement_choices.len(), 3);

        let secret = descriptor.property(CONF_CONTEXT_CLIENT_SECRET).unwrap();
        assert!(secret.is_secret());
        assert_eq!(
            descriptor.property(CONF_CONTEXT_ISS_URL).unwrap().label,
            "Context Issuer (iss) URL"
        );
        assert_eq!(
            descriptor
                .properties
                .iter()
                .filter(|p| p.is_secret())
                .count(),
            1
        );
    }
}
