//! In-process result cache backed by a concurrent map.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use vidscribe_core::{chrono_duration, CacheError, CacheKey, Clock, SystemClock};

use super::traits::{CacheEntry, ResultCache};

/// Result cache for a single process.
///
/// Expired entries are dropped lazily on read and in bulk by
/// [`ResultCache::purge_expired`].
#[derive(Debug)]
pub struct InMemoryResultCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<serde_json::Value>, CacheError> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key.as_str()) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        // Read guard is released above; a concurrent `set` may have refreshed it.
        self.entries
            .remove_if(key.as_str(), |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = self.clock.now() + chrono_duration(ttl);
        self.entries.insert(
            key.as_str().to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vidscribe_core::ManualClock;

    fn cache() -> (InMemoryResultCache, ManualClock) {
        let clock = ManualClock::starting_now();
        (InMemoryResultCache::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_get_before_ttl_and_miss_after() {
        let (cache, clock) = cache();
        let key = CacheKey::new("transcript", "abc");
        let value = json!({ "text": "hello" });

        cache
            .set(&key, &value, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(value));

        clock.advance(Duration::from_secs(301));
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(cache.is_empty(), "expired entry should be dropped on read");
    }

    #[tokio::test]
    async fn test_set_replaces_previous_value() {
        let (cache, _clock) = cache();
        let key = CacheKey::new("video", "abc");

        cache.set(&key, &json!(1), Duration::from_secs(60)).await.unwrap();
        cache.set(&key, &json!(2), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_a_miss() {
        let (cache, _clock) = cache();
        assert_eq!(
            cache.get(&CacheKey::new("transcript", "nope")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let (cache, clock) = cache();
        cache
            .set(&CacheKey::new("t", "short"), &json!(1), Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set(&CacheKey::new("t", "long"), &json!(2), Duration::from_secs(600))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(&CacheKey::new("t", "long")).await.unwrap(),
            Some(json!(2))
        );
    }
}
