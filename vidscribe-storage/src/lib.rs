//! VIDSCRIBE Storage - Shared State Backends
//!
//! The three pieces of state every API instance and worker must agree on:
//!
//! - [`limiter`]: sliding-window admission control per identity and class
//! - [`cache`]: TTL result cache keyed by logical resource
//! - [`queue`]: durable job queue with leases and redelivery
//!
//! Each concern is a trait with an in-memory implementation (single process,
//! tests) and a PostgreSQL implementation (shared across instances). The
//! schema lives in `migrations/` and is applied by [`pg::migrate`];
//! [`StoreHealth`] answers readiness checks for whichever store is in use.

pub mod cache;
pub mod health;
pub mod limiter;
pub mod pg;
pub mod queue;

pub use cache::{
    CacheEntry, CacheStats, FailOpenCache, InMemoryResultCache, PgResultCache, ResultCache,
    DEFAULT_RESULT_TTL,
};
pub use health::StoreHealth;
pub use limiter::{InMemoryRateLimiter, LimiterPolicy, PgRateLimiter, RateLimiter, SlidingLog};
pub use queue::{InMemoryJobQueue, JobQueue, PgJobQueue};
pub use pg::{migrate, DbConfig, PgSetupError};
