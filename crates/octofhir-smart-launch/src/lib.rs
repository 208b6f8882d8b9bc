//! # octofhir-smart-launch
//!
//! SMART on FHIR EHR-launch context resolution for identity-provider
//! authentication flows.
//!
//! This crate provides:
//! - Launch intent detection from requested scopes
//! - Launch token validation
//! - Launch token resolution against an external context service
//!   (client-credentials grant + launch exchange, bounded retry, deadline,
//!   optional access token caching)
//! - Binding of the resolved patient, encounter and FHIR user into the
//!   authentication session
//! - A per-attempt state machine and a host authenticator adapter
//!
//! ## Modules
//!
//! - [`smart`] - Launch scopes, launch requests and resolved contexts
//! - [`config`] - Context service and resolution configuration
//! - [`context`] - Context service client, token cache and retry policy
//! - [`session`] - Host session store contract
//! - [`binder`] - Writes resolved context into the session
//! - [`flow`] - Launch state machine and outcomes
//! - [`authenticator`] - Host authenticator adapter and descriptor
//! - [`error`] - Error types

pub mod authenticator;
pub mod binder;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod session;
pub mod smart;

pub use authenticator::{
    AuthenticationFlowContext, AuthenticatorDescriptor, ConfigProperty, HostFlowError,
    PROVIDER_ID, PropertyType, Requirement, SmartLaunchAuthenticator,
};
pub use binder::LaunchContextBinder;
pub use config::{
    ClientSecret, ConfigError, ContextServiceConfig, LaunchConfig, LaunchSettings,
    ResolutionConfig,
};
pub use context::{
    AccessToken, AccessTokenCache, CacheKey, ContextResolver, ContextServiceClient, RetryPolicy,
};
pub use error::{ErrorCategory, LaunchError};
pub use flow::{FlowFailure, FlowOutcome, LaunchFlowOrchestrator, LaunchState};
pub use session::{LaunchSession, MemorySession};
pub use smart::{
    LaunchFlavor, LaunchRequest, ResolvedContext, classify, require_launch_token,
    validate_launch_token,
};

/// Type alias for launch resolution results.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_smart_launch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::LaunchResult;
    pub use crate::authenticator::{
        AuthenticationFlowContext, AuthenticatorDescriptor, HostFlowError,
        SmartLaunchAuthenticator,
    };
    pub use crate::config::{ConfigError, ContextServiceConfig, LaunchSettings, ResolutionConfig};
    pub use crate::context::{ContextResolver, ContextServiceClient};
    pub use crate::error::{ErrorCategory, LaunchError};
    pub use crate::flow::{FlowFailure, FlowOutcome, LaunchFlowOrchestrator, LaunchState};
    pub use crate::session::{LaunchSession, MemorySession};
    pub use crate::smart::{LaunchFlavor, LaunchRequest, ResolvedContext};
}
