//! Error types for VIDSCRIBE operations

use crate::{JobId, JobState};
use std::time::Duration;
use thiserror::Error;

/// Rate limiter errors.
///
/// Every variant means the limiter could not make a decision. Callers must
/// fail closed on all of them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Rate limiter backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("No quota configured for resource class '{class}'")]
    UnknownClass { class: String },
}

/// Result cache errors.
///
/// Callers treat these as a miss (on read) or a no-op (on write).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Job queue errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Lease lost for job {job_id}: another delivery owns it or it was finalized")]
    LeaseLost { job_id: JobId },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Corrupt job record: {reason}")]
    Corrupt { reason: String },
}

impl QueueError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Upstream fetch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Resource not found upstream: {resource}")]
    NotFound { resource: String },

    #[error("Invalid input for upstream fetch: {reason}")]
    InvalidInput { reason: String },

    #[error("Upstream service unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Upstream call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Upstream rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl FetchError {
    /// Transient errors are worth retrying; everything else fails the job
    /// immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all VIDSCRIBE errors.
#[derive(Debug, Clone, Error)]
pub enum VidscribeError {
    #[error("Limiter error: {0}")]
    Limiter(#[from] LimiterError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for VIDSCRIBE operations.
pub type VidscribeResult<T> = Result<T, VidscribeError>;

// =============================================================================
// TESTS
// =============================================================================
