//! Inbound transport abstraction.

use async_trait::async_trait;
use tierload_core::{FetchError, FetchParams, Payload, TierBundle, TierId};

/// Source of tier payloads, typically an HTTP or RPC client.
///
/// Implementations should map malformed responses to
/// [`FetchError::Validation`] and connection-level failures to
/// [`FetchError::Transport`]; only the latter are retried.
#[async_trait]
pub trait DataTransport: Send + Sync {
    /// Fetch the payload for a single tier.
    async fn fetch_data(&self, tier: TierId, params: &FetchParams) -> Result<Payload, FetchError>;

    /// Fetch all three tiers in one call.
    ///
    /// `Ok(None)` means the transport has no combined endpoint.
    async fn fetch_comprehensive(
        &self,
        _params: &FetchParams,
    ) -> Result<Option<TierBundle>, FetchError> {
        Ok(None)
    }
}
