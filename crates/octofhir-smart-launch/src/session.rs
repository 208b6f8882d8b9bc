//! Host session stores touched by the launch flow.
//!
//! The identity-provider host owns two key-value stores per authentication
//! attempt: session notes (scoped to the attempt) and client attributes
//! (scoped to the OAuth client). [`LaunchSession`] is the narrow view of them
//! this crate needs.

use std::collections::BTreeMap;

use crate::error::LaunchError;

/// Session note holding the resolved patient ID.
pub const PATIENT_ID_NOTE: &str = "patient_id";
/// Session note holding the resolved encounter ID.
pub const ENCOUNTER_ID_NOTE: &str = "encounter_id";
/// Session note holding the resolved FHIR user.
pub const FHIR_USER_NOTE: &str = "fhirUser";
/// Client attribute mirroring the resolved patient ID.
pub const PATIENT_CLIENT_ATTRIBUTE: &str = "patient";

/// Every session note the launch flow manages.
pub const LAUNCH_NOTES: [&str; 3] = [PATIENT_ID_NOTE, ENCOUNTER_ID_NOTE, FHIR_USER_NOTE];

/// Access to the host's session note and client attribute stores.
///
/// Writes may fail when the host store is unavailable; implementations report
/// that as [`LaunchError::Bind`].
pub trait LaunchSession {
    /// Returns a session note.
    fn session_note(&self, key: &str) -> Option<String>;

    /// Sets a session note.
    fn set_session_note(&mut self, key: &str, value: &str) -> Result<(), LaunchError>;

    /// Removes a session note. Removing an absent note is not an error.
    fn remove_session_note(&mut self, key: &str) -> Result<(), LaunchError>;

    /// Returns a client attribute.
    fn client_attribute(&self, key: &str) -> Option<String>;

    /// Sets a client attribute.
    fn set_client_attribute(&mut self, key: &str, value: &str) -> Result<(), LaunchError>;

    /// Removes a client attribute. Removing an absent attribute is not an error.
    fn remove_client_attribute(&mut self, key: &str) -> Result<(), LaunchError>;
}

/// In-memory session for tools and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySession {
    /// Session notes.
    pub notes: BTreeMap<String, String>,
    /// Client attributes.
    pub client_attributes: BTreeMap<String, String>,
}

impl MemorySession {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if neither store holds a launch key.
    #[must_use]
    pub fn has_no_launch_context(&self) -> bool {
        LAUNCH_NOTES.iter().all(|key| !self.notes.contains_key(*key))
            && !self.client_attributes.contains_key(PATIENT_CLIENT_ATTRIBUTE)
    }
}

impl LaunchSession for MemorySession {
    fn session_note(&self, key: &str) -> Option<String> {
        self.notes.get(key).cloned()
    }

    fn set_session_note(&mut self, key: &str, value: &str) -> Result<(), LaunchError> {
        self.notes.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_session_note(&mut self, key: &str) -> Result<(), LaunchError> {
        self.notes.remove(key);
        Ok(())
    }

    fn client_attribute(&self, key: &str) -> Option<String> {
        self.client_attributes.get(key).cloned()
    }

    fn set_client_attribute(&mut self, key: &str, value: &str) -> Result<(), LaunchError> {
        self.client_attributes
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_client_attribute(&mut self, key: &str) -> Result<(), LaunchError> {
        self.client_attributes.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_session_roundtrip() {
        let mut session = MemorySession::new();
        assert!(session.has_no_launch_context());

        session.set_session_note(PATIENT_ID_NOTE, "P1").unwrap();
        session
            .set_client_attribute(PATIENT_CLIENT_ATTRIBUTE, "P1")
            .unwrap();
        assert_eq!(session.session_note(PATIENT_ID_NOTE).as_deref(), Some("P1"));
        assert_eq!(
            session.client_attribute(PATIENT_CLIENT_ATTRIBUTE).as_deref(),
            Some("P1")
        );
        assert!(!session.has_no_launch_context());

        session.remove_session_note(PATIENT_ID_NOTE).unwrap();
        session
            .remove_client_attribute(PATIENT_CLIENT_ATTRIBUTE)
            .unwrap();
        assert!(session.has_no_launch_context());

        // Removing again is fine
        assert!(session.remove_session_note(PATIENT_ID_NOTE).is_ok());
    }

    #[test]
    fn test_unrelated_notes_do_not_count() {
        let mut session = MemorySession::new();
        session.set_session_note("scope", "openid launch").unwrap();
        assert!(session.has_no_launch_context());
    }
}
