//! PostgreSQL connection pooling, schema migration and error mapping.
//!
//! All three Postgres backends share one `deadpool_postgres::Pool`. The
//! schema is idempotent (`CREATE ... IF NOT EXISTS`) and applied once at
//! startup through [`migrate`].

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::NoTls;
use vidscribe_core::{CacheError, LimiterError, QueueError};

/// Schema for the cache, rate-window and job tables.
pub const SCHEMA_SQL: &str = include_str!("../migrations/V1__vidscribe_core.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Time to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "vidscribe".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Read `VIDSCRIBE_DB_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("VIDSCRIBE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("VIDSCRIBE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("VIDSCRIBE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("VIDSCRIBE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("VIDSCRIBE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("VIDSCRIBE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("VIDSCRIBE_DB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, PgSetupError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: self.max_size,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..Default::default()
        });

        Ok(cfg.create_pool(Some(Runtime::Tokio1), NoTls)?)
    }
}

/// Failures while preparing the database.
#[derive(Debug, Error)]
pub enum PgSetupError {
    #[error("failed to create pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("failed to get connection: {0}")]
    Connection(#[from] deadpool_postgres::PoolError),

    #[error("migration failed: {0}")]
    Migration(#[from] tokio_postgres::Error),
}

/// Apply the schema. Safe to run on every start.
pub async fn migrate(pool: &Pool) -> Result<(), PgSetupError> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA_SQL).await?;
    tracing::info!("database schema is up to date");
    Ok(())
}

/// Readiness check: one round trip on a pooled connection.
pub async fn ping(pool: &Pool) -> Result<(), PgSetupError> {
    let client = pool.get().await?;
    client.simple_query("SELECT 1").await?;
    Ok(())
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

pub(crate) fn limiter_unavailable(e: impl fmt::Display) -> LimiterError {
    LimiterError::Unavailable {
        reason: e.to_string(),
    }
}

pub(crate) fn cache_unavailable(e: impl fmt::Display) -> CacheError {
    CacheError::Unavailable {
        reason: e.to_string(),
    }
}

pub(crate) fn queue_unavailable(e: impl fmt::Display) -> QueueError {
    QueueError::Unavailable {
        reason: e.to_string(),
    }
}

/// Saturating `Duration` to milliseconds for SQL interval arithmetic.
pub(crate) fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
