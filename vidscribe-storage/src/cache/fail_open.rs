//! Fail-open wrapper around a cache backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vidscribe_core::CacheKey;

use super::traits::{CacheStats, ResultCache};

/// Default time-to-live for cached results.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(300);

/// Request-path view of a [`ResultCache`].
///
/// Every backend failure is logged, counted and reported to the caller as a
/// miss (for reads) or silently dropped (for writes). A broken cache degrades
/// latency, never availability.
pub struct FailOpenCache {
    backend: Arc<dyn ResultCache>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl FailOpenCache {
    pub fn new(backend: Arc<dyn ResultCache>) -> Self {
        Self::with_ttl(backend, DEFAULT_RESULT_TTL)
    }

    pub fn with_ttl(backend: Arc<dyn ResultCache>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// TTL applied by [`FailOpenCache::put`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The wrapped backend, for maintenance tasks that need real errors.
    pub fn backend(&self) -> &Arc<dyn ResultCache> {
        &self.backend
    }

    /// Look up a cached result; errors count as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key, "cache hit");
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(cache_key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a result with the configured TTL. Failures are logged only.
    pub async fn put(&self, key: &CacheKey, value: &serde_json::Value) {
        match self.backend.set(key, value, self.ttl).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(cache_key = %key, error = %e, "cache write failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FailOpenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailOpenCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryResultCache;
    use async_trait::async_trait;
    use serde_json::json;
    use vidscribe_core::CacheError;

    struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        async fn get(&self, _key: &CacheKey) -> Result<Option<serde_json::Value>, CacheError> {
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }

        async fn set(
            &self,
            _key: &CacheKey,
            _value: &serde_json::Value,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }

        async fn purge_expired(&self) -> Result<u64, CacheError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_backend_errors_become_misses() {
        let cache = FailOpenCache::new(Arc::new(BrokenCache));
        let key = CacheKey::new("transcript", "abc");

        cache.put(&key, &json!("x")).await;
        assert_eq!(cache.get(&key).await, None);

        let stats = cache.stats();
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 0);
    }

    #[tokio::test]
    async fn test_counts_hits_and_misses() {
        let cache = FailOpenCache::new(Arc::new(InMemoryResultCache::new()));
        let key = CacheKey::new("transcript", "abc");

        assert_eq!(cache.get(&key).await, None);
        cache.put(&key, &json!({ "text": "hi" })).await;
        assert_eq!(cache.get(&key).await, Some(json!({ "text": "hi" })));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.writes), (1, 1, 1));
        assert_eq!(cache.ttl(), DEFAULT_RESULT_TTL);
    }
}
