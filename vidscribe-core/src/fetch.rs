//! The seam to upstream providers.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::job::JobPayload;
use crate::keys::ResourceClass;

/// An expensive, externally throttled operation.
///
/// Implementations are free to block for a long time; callers wrap every
/// call in their own timeout. Results are opaque JSON.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Resource class whose quota protects this upstream.
    fn class(&self) -> ResourceClass;

    /// Perform the operation for `payload`.
    async fn fetch(&self, payload: &JobPayload) -> Result<serde_json::Value, FetchError>;
}
