//! Shared result cache in PostgreSQL.
//!
//! Expiry uses the database clock so every instance agrees on liveness.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::time::Duration;
use vidscribe_core::{CacheError, CacheKey};

use super::traits::ResultCache;
use crate::pg::{cache_unavailable, millis};

const GET_SQL: &str = "SELECT value FROM vidscribe_cache \
     WHERE cache_key = $1 AND expires_at > now()";

const SET_SQL: &str = "INSERT INTO vidscribe_cache (cache_key, value, expires_at) \
     VALUES ($1, $2, now() + ($3::bigint * interval '1 millisecond')) \
     ON CONFLICT (cache_key) DO UPDATE \
     SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at";

const PURGE_SQL: &str = "DELETE FROM vidscribe_cache WHERE expires_at <= now()";

/// [`ResultCache`] over the `vidscribe_cache` table.
#[derive(Clone)]
pub struct PgResultCache {
    pool: Pool,
}

impl PgResultCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultCache for PgResultCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<serde_json::Value>, CacheError> {
        let client = self.pool.get().await.map_err(cache_unavailable)?;
        let row = client
            .query_opt(GET_SQL, &[&key.as_str()])
            .await
            .map_err(cache_unavailable)?;
        row.map(|r| {
            r.try_get::<_, serde_json::Value>(0)
                .map_err(|e| CacheError::Serialization {
                    reason: e.to_string(),
                })
        })
        .transpose()
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let client = self.pool.get().await.map_err(cache_unavailable)?;
        client
            .execute(SET_SQL, &[&key.as_str(), value, &millis(ttl)])
            .await
            .map_err(cache_unavailable)?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let client = self.pool.get().await.map_err(cache_unavailable)?;
        let removed = client
            .execute(PURGE_SQL, &[])
            .await
            .map_err(cache_unavailable)?;
        Ok(removed)
    }
}

impl std::fmt::Debug for PgResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgResultCache")
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

#[cfg(all(test, feature = "db-tests"))]
mod db_tests {
    use super::*;
    use crate::pg::{migrate, DbConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_and_expiry() {
        let pool = DbConfig::from_env().create_pool().unwrap();
        migrate(&pool).await.unwrap();
        let cache = PgResultCache::new(pool);
        let key = CacheKey::new("transcript", &uuid::Uuid::now_v7().to_string());

        cache
            .set(&key, &json!({ "text": "hi" }), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(json!({ "text": "hi" })));

        cache
            .set(&key, &json!(null), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }
}
