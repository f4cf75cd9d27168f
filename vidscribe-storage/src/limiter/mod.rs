//! Sliding-window admission control.
//!
//! Every `(identity, resource class)` pair owns a log of admission
//! timestamps. A request is admitted when fewer than `limit` admissions fall
//! inside the trailing window; admitting it appends to the log in the same
//! atomic step. Backend failures surface as
//! [`LimiterError`](vidscribe_core::LimiterError) and callers must reject the
//! request (fail closed).

pub mod memory;
pub mod postgres;
pub mod traits;
pub mod window;

pub use memory::InMemoryRateLimiter;
pub use postgres::PgRateLimiter;
pub use traits::{LimiterPolicy, RateLimiter, DEFAULT_KEY_PREFIX};
pub use window::SlidingLog;
