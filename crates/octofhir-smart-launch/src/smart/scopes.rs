//! Launch intent detection from requested scopes.
//!
//! A SMART app signals how it was started through launch scopes defined by the
//! [SMART App Launch Implementation Guide](https://build.fhir.org/ig/HL7/smart-app-launch/scopes-and-launch-context.html):
//!
//! - `launch` - the app was launched from within an EHR and carries an opaque
//!   `launch` parameter that identifies the EHR context.
//! - `launch/patient` - a standalone app asks the authorization server to
//!   establish patient context.
//!
//! # Example
//!
//! ```
//! use octofhir_smart_launch::smart::scopes::{LaunchFlavor, classify, parse_scope_param};
//!
//! let scopes = parse_scope_param("openid launch patient/*.read");
//! assert_eq!(classify(&scopes), LaunchFlavor::EhrLaunch);
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// EHR launch scope.
pub const SCOPE_LAUNCH: &str = "launch";

/// Standalone launch scope requesting patient context.
pub const SCOPE_LAUNCH_PATIENT: &str = "launch/patient";

/// The kind of SMART launch an authentication attempt declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchFlavor {
    /// Not a SMART launch; the flow passes through untouched.
    None,
    /// Launched from an EHR with an opaque launch token.
    EhrLaunch,
    /// Standalone launch requesting patient selection.
    PatientLaunch,
}

impl LaunchFlavor {
    /// Returns the flavor name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::EhrLaunch => "ehr_launch",
            Self::PatientLaunch => "patient_launch",
        }
    }

    /// Returns `true` if this is any kind of SMART launch.
    #[must_use]
    pub fn is_smart_launch(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for LaunchFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a requested scope set into a launch flavor.
///
/// `launch` wins over `launch/patient` when both are present. An empty set is
/// not a SMART launch.
#[must_use]
pub fn classify(requested_scopes: &BTreeSet<String>) -> LaunchFlavor {
    let mut flavor = LaunchFlavor::None;
    for scope in requested_scopes {
        match scope.as_str() {
            SCOPE_LAUNCH => return LaunchFlavor::EhrLaunch,
            SCOPE_LAUNCH_PATIENT => flavor = LaunchFlavor::PatientLaunch,
            _ => {}
        }
    }
    flavor
}

/// Splits an OAuth `scope` parameter into its distinct scope tokens.
///
/// Scopes are space-delimited (RFC 6749 §3.3); repeated whitespace is ignored.
#[must_use]
pub fn parse_scope_param(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}
