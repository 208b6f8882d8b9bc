//! SMART on FHIR launch request and resolved context types.
//!
//! An EHR starts a SMART app by redirecting it with an opaque `launch=<token>`
//! parameter. The app echoes that token in its authorization request together
//! with the `launch` scope. This module models that request and the clinical
//! context the token resolves to.
//!
//! # Flow
//!
//! 1. EHR sends `launch=<token>` to the app
//! 2. App includes `launch` scope and the token in the authorization request
//! 3. The token is validated ([`validate_launch_token`])
//! 4. The context server turns it into a [`ResolvedContext`]
//! 5. The context is bound to the authentication session

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::scopes::{LaunchFlavor, classify, parse_scope_param};
use crate::error::LaunchError;

/// Name of the query parameter carrying the EHR launch token.
pub const LAUNCH_REQUEST_PARAM: &str = "launch";

// ============================================================================
// Launch Request
// ============================================================================

/// The launch-relevant parts of one authorization request.
///
/// Immutable for the lifetime of an authentication attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    /// Distinct scopes requested by the client.
    pub requested_scopes: BTreeSet<String>,

    /// Raw `launch` query parameter, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_token: Option<String>,

    /// OAuth client identifier.
    pub client_id: String,

    /// Redirect URI registered for this authorization request.
    pub redirect_uri: String,
}

impl LaunchRequest {
    /// Creates a launch request from a raw space-delimited `scope` parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use octofhir_smart_launch::smart::launch::LaunchRequest;
    ///
    /// let request = LaunchRequest::from_scope_param(
    ///     "openid launch",
    ///     Some("abc123".to_string()),
    ///     "my-app",
    ///     "https://app.example.com/callback",
    /// );
    /// assert!(request.requested_scopes.contains("launch"));
    /// ```
    #[must_use]
    pub fn from_scope_param(
        scope: &str,
        launch_token: Option<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            requested_scopes: parse_scope_param(scope),
            launch_token,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Classifies this request's launch intent.
    #[must_use]
    pub fn flavor(&self) -> LaunchFlavor {
        classify(&self.requested_scopes)
    }
}

// ============================================================================
// Launch Token Validation
// ============================================================================

/// Validates the launch token for a request of the given flavor.
///
/// Only EHR launches carry a token; for any other flavor the token is not
/// consulted and this returns `Ok(None)`.
///
/// # Errors
///
/// Returns [`LaunchError::MissingToken`] if the token is absent, empty or only
/// whitespace.
///
/// # Examples
///
/// ```
/// use octofhir_smart_launch::smart::launch::validate_launch_token;
/// use octofhir_smart_launch::smart::scopes::LaunchFlavor;
///
/// let token = validate_launch_token(LaunchFlavor::EhrLaunch, Some(" abc123 ")).unwrap();
/// assert_eq!(token.as_deref(), Some("abc123"));
/// assert!(validate_launch_token(LaunchFlavor::EhrLaunch, Some("   ")).is_err());
/// assert_eq!(validate_launch_token(LaunchFlavor::None, None).unwrap(), None);
/// ```
pub fn validate_launch_token(
    flavor: LaunchFlavor,
    token: Option<&str>,
) -> Result<Option<String>, LaunchError> {
    if flavor != LaunchFlavor::EhrLaunch {
        return Ok(None);
    }

    require_launch_token(token).map(Some)
}

/// Returns the trimmed launch token of an EHR launch.
///
/// # Errors
///
/// Returns [`LaunchError::MissingToken`] if the token is absent, empty or only
/// whitespace.
pub fn require_launch_token(token: Option<&str>) -> Result<String, LaunchError> {
    match token.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed.to_string()),
        _ => Err(LaunchError::MissingToken),
    }
}

// ============================================================================
// Resolved Context
// ============================================================================

/// Clinical context resolved from an EHR launch token.
///
/// A successful EHR launch needs at least one non-empty field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContext {
    /// Current patient ID (FHIR resource ID).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,

    /// Current encounter ID (FHIR resource ID).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,

    /// URL of the FHIR resource representing the current user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_user: Option<String>,
}

impl ResolvedContext {
    /// Creates a context with only a patient.
    ///
    /// # Examples
    ///
    /// ```
    /// use octofhir_smart_launch::smart::launch::ResolvedContext;
    ///
    /// let ctx = ResolvedContext::with_patient("P123");
    /// assert_eq!(ctx.patient_id.as_deref(), Some("P123"));
    /// assert!(!ctx.is_empty());
    /// ```
    #[must_use]
    pub fn with_patient(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            ..Self::default()
        }
    }

    /// Sets the encounter.
    #[must_use]
    pub fn encounter(mut self, encounter_id: impl Into<String>) -> Self {
        self.encounter_id = Some(encounter_id.into());
        self
    }

    /// Sets the FHIR user.
    #[must_use]
    pub fn fhir_user(mut self, fhir_user: impl Into<String>) -> Self {
        self.fhir_user = Some(fhir_user.into());
        self
    }

    /// Trims every field and drops the ones that end up empty.
    #[must_use]
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            patient_id: clean(self.patient_id),
            encounter_id: clean(self.encounter_id),
            fhir_user: clean(self.fhir_user),
        }
    }

    /// Returns true if no field carries a non-blank value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [&self.patient_id, &self.encounter_id, &self.fhir_user]
            .into_iter()
            .all(|field| field.as_deref().is_none_or(|v| v.trim().is_empty()))
    }
}

// ============================================================================
// Tests
// ============================================================================
