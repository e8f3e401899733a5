//! Platform adapter contract and implementations
//!
//! Each platform integration supplies a [`Platform`] implementation: deliver
//! a formatted payload, report whether its credentials still work, and
//! optionally surface platform-reported rate state after a call. Concrete
//! API clients (Mastodon, Bluesky, ...) live outside the engine; shipped here
//! are a generic JSON-over-HTTP adapter and a scriptable mock for tests.

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::rate_limiter::RateLimitHint;
use crate::types::PlatformPayload;

pub mod http;
pub mod mock;

/// Adapter contract every platform integration implements.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Deliver a formatted payload.
    ///
    /// Returns the platform-assigned post id. Failures are classified into
    /// the [`DeliveryError`] taxonomy so the resilience layer can decide
    /// whether to retry.
    async fn post(&self, payload: &PlatformPayload) -> Result<String, DeliveryError>;

    /// Whether the adapter's credentials are currently usable.
    async fn validate_credentials(&self) -> bool {
        true
    }

    /// Lowercase platform identifier, matching the `PlatformConfig` name.
    fn name(&self) -> &str;

    /// Rate state the platform reported on the most recent call, if any.
    /// Consumed by the rate limiter to tighten its local estimate.
    fn rate_limit_hint(&self) -> Option<RateLimitHint> {
        None
    }
}
