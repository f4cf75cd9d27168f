//! VIDSCRIBE Core - Data Types
//!
//! Pure data structures shared by the storage backends, the worker pool and
//! the HTTP layer: resource identity and keys, admission decisions, job
//! records and leases, retry/queue settings, the clock abstraction, the
//! upstream fetch seam and the error taxonomy. This crate performs no I/O.

pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod keys;
pub mod rate;

pub use clock::{chrono_duration, Clock, ManualClock, SystemClock};
pub use config::{QueueSettings, RetryConfig};
pub use error::{
    CacheError, ConfigError, FetchError, LimiterError, QueueError, ValidationError,
    VidscribeError, VidscribeResult,
};
pub use fetch::UpstreamFetcher;
pub use job::{Job, JobEvent, JobId, JobPayload, JobState, Lease, QueueStats, TRANSCRIPT_RESOURCE};
pub use keys::{rate_window_key, CacheKey, ResourceClass, ResourceRef};
pub use rate::{RateDecision, RateQuota};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
