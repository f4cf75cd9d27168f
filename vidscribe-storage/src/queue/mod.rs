//! Durable job queue with leases.
//!
//! Jobs move `waiting -> active -> completed | failed`. A dequeue grants a
//! lease carrying a fresh token; only the current token can renew or finalize
//! the job. When a lease expires the job stays `active` and becomes eligible
//! for redelivery under a new token until `max_deliveries` is reached, after
//! which [`JobQueue::reap_expired`] fails it.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryJobQueue;
pub use postgres::PgJobQueue;
pub use traits::JobQueue;
