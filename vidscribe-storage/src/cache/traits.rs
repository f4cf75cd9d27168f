//! Cache backend trait and shared types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use vidscribe_core::{CacheError, CacheKey};

/// Key/value result store with per-entry expiry.
///
/// # Semantics
///
/// - `set` atomically replaces any previous entry for the key.
/// - `get` returns the value while `now < expires_at` and `None` afterwards;
///   expired entries are never served even if not yet purged.
/// - Values are opaque JSON; the cache does not interpret them.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Look up a live entry.
    async fn get(&self, key: &CacheKey) -> Result<Option<serde_json::Value>, CacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(
        &self,
        key: &CacheKey,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Physically remove expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

/// One stored cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (including errors treated as misses).
    pub misses: u64,
    /// Number of successful writes.
    pub writes: u64,
    /// Backend failures swallowed by the fail-open wrapper.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
