//! TTL result cache.
//!
//! Completed results are stored under the deterministic key of the logical
//! resource they describe (`"<type>:<id>"`), so identical requests from any
//! client are served without touching the upstream again.
//!
//! Backends report their failures as [`CacheError`](vidscribe_core::CacheError).
//! Callers on the request path wrap a backend in [`FailOpenCache`], which turns
//! those failures into misses: the cache is an optimization and must never
//! take the service down.

pub mod fail_open;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use fail_open::{FailOpenCache, DEFAULT_RESULT_TTL};
pub use memory::InMemoryResultCache;
pub use postgres::PgResultCache;
pub use traits::{CacheEntry, CacheStats, ResultCache};
