//! Reachability of the shared state store.

use deadpool_postgres::Pool;
use std::time::{Duration, Instant};

use crate::pg;

/// The store backing limiter, cache and queue, as seen by readiness checks.
#[derive(Clone)]
pub enum StoreHealth {
    /// Shared PostgreSQL; ready when a pooled connection answers.
    Postgres(Pool),
    /// Process-local state; always reachable.
    InProcess,
}

impl StoreHealth {
    pub fn backend(&self) -> &'static str {
        match self {
            StoreHealth::Postgres(_) => "postgres",
            StoreHealth::InProcess => "memory",
        }
    }

    /// One round trip to the store. Returns its latency.
    pub async fn check(&self) -> Result<Duration, String> {
        let start = Instant::now();
        match self {
            StoreHealth::Postgres(pool) => pg::ping(pool)
                .await
                .map_err(|e| format!("postgres unreachable: {}", e))?,
            StoreHealth::InProcess => {}
        }
        Ok(start.elapsed())
    }
}

impl std::fmt::Debug for StoreHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreHealth::Postgres(pool) => f
                .debug_tuple("Postgres")
                .field(&pool.status().size)
                .finish(),
            StoreHealth::InProcess => f.write_str("InProcess"),
        }
    }
}
