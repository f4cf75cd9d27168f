//! Shared sliding-window limiter in PostgreSQL.
//!
//! Each check runs in one transaction holding a transaction-scoped advisory
//! lock on the window key, so concurrent checks for the same key from any
//! instance serialize while different keys proceed in parallel. Time comes
//! from the database clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use vidscribe_core::{chrono_duration, LimiterError, RateDecision, ResourceClass};

use super::traits::{LimiterPolicy, RateLimiter};
use super::window::decide;
use crate::pg::{limiter_unavailable, millis};

const LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";
const NOW_SQL: &str = "SELECT clock_timestamp()";
const PRUNE_SQL: &str = "DELETE FROM vidscribe_rate_events \
     WHERE window_key = $1 AND admitted_at <= $2";
const COUNT_SQL: &str = "SELECT count(*), min(admitted_at) \
     FROM vidscribe_rate_events WHERE window_key = $1";
const PURGE_SQL: &str = "DELETE FROM vidscribe_rate_events \
     WHERE admitted_at <= clock_timestamp() - ($1::bigint * interval '1 millisecond')";
const RECORD_SQL: &str = "INSERT INTO vidscribe_rate_events (window_key, admitted_at) \
     VALUES ($1, $2)";

/// [`RateLimiter`] over the `vidscribe_rate_events` table.
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: Pool,
    policy: LimiterPolicy,
}

impl PgRateLimiter {
    pub fn new(pool: Pool, policy: LimiterPolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn limit(
        &self,
        identity: &str,
        class: &ResourceClass,
    ) -> Result<RateDecision, LimiterError> {
        let quota = self.policy.quota_for(class)?;
        let key = self.policy.window_key(class, identity);

        let mut client = self.pool.get().await.map_err(limiter_unavailable)?;
        let tx = client.transaction().await.map_err(limiter_unavailable)?;

        tx.execute(LOCK_SQL, &[&key])
            .await
            .map_err(limiter_unavailable)?;

        let now: DateTime<Utc> = tx
            .query_one(NOW_SQL, &[])
            .await
            .map_err(limiter_unavailable)?
            .get(0);
        let window_start = now - chrono_duration(quota.window);

        tx.execute(PRUNE_SQL, &[&key, &window_start])
            .await
            .map_err(limiter_unavailable)?;

        let row = tx
            .query_one(COUNT_SQL, &[&key])
            .await
            .map_err(limiter_unavailable)?;
        let live: i64 = row.get(0);
        let oldest: Option<DateTime<Utc>> = row.get(1);

        let decision = decide(
            quota,
            u32::try_from(live).unwrap_or(u32::MAX),
            oldest,
            now,
        );
        if decision.allowed {
            tx.execute(RECORD_SQL, &[&key, &now])
                .await
                .map_err(limiter_unavailable)?;
        }

        tx.commit().await.map_err(limiter_unavailable)?;

        if !decision.allowed {
            tracing::debug!(identity, class = %class, reset_at = %decision.reset_at, "rate limited");
        }
        Ok(decision)
    }

    /// Rows of keys that are checked again are pruned inline; this removes
    /// the rest.
    async fn purge_expired(&self) -> Result<u64, LimiterError> {
        let horizon_ms = millis(self.policy.longest_window());
        let client = self.pool.get().await.map_err(limiter_unavailable)?;
        client
            .execute(PURGE_SQL, &[&horizon_ms])
            .await
            .map_err(limiter_unavailable)
    }
}

impl std::fmt::Debug for PgRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRateLimiter")
            .field("policy", &self.policy)
            .finish()
    }
}
