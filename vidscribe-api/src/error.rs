//! Error Types for VIDSCRIBE API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON `{code, message, details?}` with the
//! HTTP status of their code. Rate-limit rejections also carry the
//! `x-ratelimit-*` and `retry-after` headers.

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use vidscribe_core::{
    ConfigError, FetchError, LimiterError, QueueError, RateDecision, ValidationError,
};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Admission (429, 503)
    // ========================================================================
    /// Caller exceeded the quota of a resource class
    TooManyRequests,

    /// Rate limiter backend unreachable; requests are rejected
    LimiterUnavailable,

    // ========================================================================
    // Queue (503)
    // ========================================================================
    /// Too many jobs waiting; retry later
    QueueOverloaded,

    /// Queue store unreachable
    QueueUnavailable,

    // ========================================================================
    // Client errors (400, 404)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Requested resource (video, job) does not exist
    ResourceNotFound,

    // ========================================================================
    // Upstream (502, 503, 504)
    // ========================================================================
    /// Upstream temporarily unavailable
    UpstreamUnavailable,

    /// Upstream refused the request
    UpstreamRejected,

    /// Operation timed out
    Timeout,

    // ========================================================================
    // Server (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Service is temporarily unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::LimiterUnavailable
            | ErrorCode::QueueOverloaded
            | ErrorCode::QueueUnavailable
            | ErrorCode::UpstreamUnavailable
            | ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamRejected => StatusCode::BAD_GATEWAY,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::TooManyRequests => "Rate limit exceeded",
            ErrorCode::LimiterUnavailable => "Rate limiter unavailable",
            ErrorCode::QueueOverloaded => "Server is busy, please try again later",
            ErrorCode::QueueUnavailable => "Job queue unavailable, please retry",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::ResourceNotFound => "Resource not found",
            ErrorCode::UpstreamUnavailable => "Upstream service unavailable",
            ErrorCode::UpstreamRejected => "Upstream service rejected the request",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }

    /// Whether a client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TooManyRequests
                | ErrorCode::LimiterUnavailable
                | ErrorCode::QueueOverloaded
                | ErrorCode::QueueUnavailable
                | ErrorCode::UpstreamUnavailable
                | ErrorCode::Timeout
                | ErrorCode::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Quota state echoed in rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
}

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,

    #[serde(skip)]
    pub rate_limit: Option<RateLimitInfo>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            rate_limit: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Rejection by the rate limiter.
    pub fn too_many_requests(decision: &RateDecision, now: DateTime<Utc>) -> Self {
        let retry_after_secs = decision.retry_after_secs(now);
        let mut err = Self::new(
            ErrorCode::TooManyRequests,
            format!(
                "Rate limit exceeded. Retry after {} seconds",
                retry_after_secs
            ),
        )
        .with_details(serde_json::json!({
            "limit": decision.limit,
            "remaining": 0,
            "reset_at": decision.reset_at,
        }));
        err.rate_limit = Some(RateLimitInfo {
            limit: decision.limit,
            remaining: 0,
            reset_at: decision.reset_at,
            retry_after_secs,
        });
        err
    }

    pub fn limiter_unavailable() -> Self {
        Self::from_code(ErrorCode::LimiterUnavailable)
    }

    pub fn queue_overloaded(waiting: Option<u64>) -> Self {
        let err = Self::from_code(ErrorCode::QueueOverloaded);
        match waiting {
            Some(waiting) => err.with_details(serde_json::json!({ "waiting": waiting })),
            None => err,
        }
    }

    pub fn queue_unavailable() -> Self {
        Self::from_code(ErrorCode::QueueUnavailable)
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a ResourceNotFound error.
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} {} not found", resource, id),
        )
    }

    /// Create a Timeout error.
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

fn header(value: impl ToString) -> Option<HeaderValue> {
    HeaderValue::from_str(&value.to_string()).ok()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let rate_limit = self.rate_limit;
        let mut response = (status, Json(self)).into_response();

        if let Some(info) = rate_limit {
            let headers = response.headers_mut();
            let pairs = [
                ("x-ratelimit-limit", header(info.limit)),
                ("x-ratelimit-remaining", header(info.remaining)),
                ("x-ratelimit-reset", header(info.reset_at.timestamp())),
                ("retry-after", header(info.retry_after_secs)),
            ];
            for (name, value) in pairs {
                if let Some(value) = value {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
        }
        response
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<LimiterError> for ApiError {
    fn from(err: LimiterError) -> Self {
        // Fail closed: any limiter fault rejects the request.
        tracing::error!(error = %err, "rate limiter failure, rejecting request");
        ApiError::limiter_unavailable()
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::JobNotFound { job_id } => ApiError::not_found("Job", job_id),
            QueueError::Unavailable { .. } => {
                tracing::error!(error = %err, "job queue unavailable");
                ApiError::queue_unavailable()
            }
            other => {
                tracing::error!(error = %other, "job queue error");
                ApiError::internal_error("Job queue error")
            }
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound { resource } => ApiError::new(
                ErrorCode::ResourceNotFound,
                format!("{} not found", resource),
            ),
            FetchError::InvalidInput { reason } => ApiError::invalid_input(reason),
            FetchError::Unavailable { reason } => {
                tracing::warn!(reason = %reason, "upstream unavailable");
                ApiError::from_code(ErrorCode::UpstreamUnavailable)
            }
            FetchError::Timeout { after } => ApiError::new(
                ErrorCode::Timeout,
                format!("Upstream did not answer within {}s", after.as_secs()),
            ),
            FetchError::Rejected { status, message } => {
                tracing::warn!(status, message = %message, "upstream rejected request");
                ApiError::from_code(ErrorCode::UpstreamRejected)
                    .with_details(serde_json::json!({ "upstream_status": status }))
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Invalid configuration: {}", err))
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Convert from uuid::Error to ApiError.
impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_input(format!("Invalid id: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
