//! ResourceSearch trait — external search returning ordered resource URIs.
//!
//! Results are non-deterministic and the service is rate-limited; callers
//! gate it behind the cooldown tracker.

use async_trait::async_trait;

use crate::error::SearchError;

#[async_trait]
pub trait ResourceSearch: Send + Sync {
    /// A human-readable name for this backend (e.g., "searxng").
    fn name(&self) -> &str;

    /// Search for `query`, returning at most `limit` URIs in relevance order.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, SearchError>;
}
