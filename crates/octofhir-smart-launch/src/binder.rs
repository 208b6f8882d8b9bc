//! Binds a resolved launch context into the host session.

use crate::error::LaunchError;
use crate::session::{
    ENCOUNTER_ID_NOTE, FHIR_USER_NOTE, LAUNCH_NOTES, LaunchSession, PATIENT_CLIENT_ATTRIBUTE,
    PATIENT_ID_NOTE,
};
use crate::smart::ResolvedContext;

/// Writes and clears launch context keys in a [`LaunchSession`].
///
/// Keys are fixed, so binding twice with the same context is a no-op and
/// binding a different context overwrites the first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchContextBinder;

impl LaunchContextBinder {
    /// Creates a binder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Binds `context` into `session`.
    ///
    /// Non-empty fields are written as session notes and the patient ID is
    /// mirrored into the client `patient` attribute.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::EmptyContext`] if no field carries a value; nothing is
    ///   written
    /// - [`LaunchError::Bind`] if the host rejects a write; every launch key
    ///   is cleared before returning
    pub fn bind<S: LaunchSession + ?Sized>(
        &self,
        session: &mut S,
        context: &ResolvedContext,
    ) -> Result<(), LaunchError> {
        if context.is_empty() {
            return Err(LaunchError::EmptyContext);
        }

        let context = context.clone().normalized();
        if let Err(e) = Self::write(session, &context) {
            tracing::warn!(error = %e, "Failed to bind launch context, rolling back");
            if let Err(clear_err) = self.clear(session) {
                tracing::error!(error = %clear_err, "Failed to roll back partial launch context");
            }
            return Err(match e {
                LaunchError::Bind { .. } => e,
                other => LaunchError::bind(other.to_string()),
            });
        }

        tracing::info!(
            has_patient = context.patient_id.is_some(),
            has_encounter = context.encounter_id.is_some(),
            has_fhir_user = context.fhir_user.is_some(),
            "Bound launch context"
        );
        Ok(())
    }

    /// Removes every launch key from `session`.
    ///
    /// All removals are attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first host failure as [`LaunchError::Bind`].
    pub fn clear<S: LaunchSession + ?Sized>(&self, session: &mut S) -> Result<(), LaunchError> {
        let mut results: Vec<Result<(), LaunchError>> = LAUNCH_NOTES
            .iter()
            .map(|key| session.remove_session_note(key))
            .collect();
        results.push(session.remove_client_attribute(PATIENT_CLIENT_ATTRIBUTE));

        match results.into_iter().find_map(Result::err) {
            None => Ok(()),
            Some(e @ LaunchError::Bind { .. }) => Err(e),
            Some(other) => Err(LaunchError::bind(other.to_string())),
        }
    }

    fn write<S: LaunchSession + ?Sized>(
        session: &mut S,
        context: &ResolvedContext,
    ) -> Result<(), LaunchError> {
        if let Some(patient_id) = &context.patient_id {
            session.set_session_note(PATIENT_ID_NOTE, patient_id)?;
        }
        if let Some(encounter_id) = &context.encounter_id {
            session.set_session_note(ENCOUNTER_ID_NOTE, encounter_id)?;
        }
        if let Some(fhir_user) = &context.fhir_user {
            session.set_session_note(FHIR_USER_NOTE, fhir_user)?;
        }
        if let Some(patient_id) = &context.patient_id {
            session.set_client_attribute(PATIENT_CLIENT_ATTRIBUTE, patient_id)?;
        }
        Ok(())
    }
}
