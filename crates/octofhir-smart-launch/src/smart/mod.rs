//! SMART on FHIR launch detection.
//!
//! This module provides the launch-specific pieces of the SMART App Launch
//! framework:
//!
//! - Launch intent classification from requested scopes
//! - Launch token validation for EHR launches
//! - The clinical context a launch token resolves to

pub mod launch;
pub mod scopes;

pub use launch::{
    LAUNCH_REQUEST_PARAM, LaunchRequest, ResolvedContext, require_launch_token,
    validate_launch_token,
};
pub use scopes::{
    LaunchFlavor, SCOPE_LAUNCH, SCOPE_LAUNCH_PATIENT, classify, parse_scope_param,
};
