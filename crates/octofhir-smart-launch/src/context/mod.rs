//! Launch token resolution against the external context service.
//!
//! # Components
//!
//! - [`ContextResolver`] - the seam the flow orchestrator resolves through
//! - [`ContextServiceClient`] - HTTP implementation (client-credentials +
//!   launch exchange)
//! - [`AccessTokenCache`] - optional single-flight access token cache
//! - [`RetryPolicy`] - bounded exponential backoff for transient failures

pub mod client;
pub mod retry;
pub mod token_cache;

pub use client::ContextServiceClient;
pub use retry::RetryPolicy;
pub use token_cache::{AccessToken, AccessTokenCache, CacheKey};

use async_trait::async_trait;

use crate::LaunchResult;
use crate::smart::ResolvedContext;

/// Turns an EHR launch token into a clinical context.
///
/// Implementations must be cancel-safe: dropping the future abandons the
/// resolution without side effects on the caller's session.
///
/// # Example Implementation
///
/// ```ignore
/// use octofhir_smart_launch::context::ContextResolver;
/// use octofhir_smart_launch::{LaunchError, ResolvedContext};
///
/// struct FixedResolver;
///
/// #[async_trait::async_trait]
/// impl ContextResolver for FixedResolver {
///     async fn resolve(&self, _launch_token: &str) -> Result<ResolvedContext, LaunchError> {
///         Ok(ResolvedContext::with_patient("P123"))
///     }
/// }
/// ```
#[async_trait]
pub trait ContextResolver: Send + Sync {
    /// Resolves a validated, trimmed launch token.
    ///
    /// # Errors
    ///
    /// Returns any [`LaunchError`](crate::LaunchError) other than
    /// `MissingToken` and `Bind`.
    async fn resolve(&self, launch_token: &str) -> LaunchResult<ResolvedContext>;
}
