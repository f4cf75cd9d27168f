//! Constants for VIDSCRIBE API
//!
//! Defaults for every environment-driven setting live here so they are easy
//! to find and test.

// ============================================================================
// SERVER
// ============================================================================

/// Default listen port, bound on all interfaces
pub const DEFAULT_PORT: u16 = 3000;

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// CACHE AND UPSTREAM
// ============================================================================

/// Result cache time-to-live (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Per-call timeout for upstream fetches
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Outbound requests per second allowed toward the upstream
pub const DEFAULT_UPSTREAM_RPS: u32 = 4;

// ============================================================================
// WORKERS AND BACKGROUND JOBS
// ============================================================================

/// Worker tasks per process
pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;

/// Idle poll interval when no wake-up arrives
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// How often the lease reaper runs
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 15;

/// How often finished jobs and expired cache rows are purged (1 hour)
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3600;

/// How long finished jobs stay queryable (24 hours)
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 86400;

/// Capacity of the job event broadcast channel
pub const JOB_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Keep-alive interval for server-sent event streams
pub const SSE_KEEP_ALIVE_SECS: u64 = 15;

/// How often an event stream re-reads its job from the store, so transitions
/// made by other instances are seen
pub const JOB_EVENTS_POLL_SECS: u64 = 2;
