//! OpenAPI Specification for VIDSCRIBE API
//!
//! Generated with utoipa from the route annotations and schema derives.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::health::{HealthDetails, HealthResponse, HealthStatus, QueueDepth, StorageHealth};
use crate::routes::jobs::JobResponse;
use crate::routes::queue::QueueStatsResponse;
use crate::routes::transcripts::{SubmissionResponse, TranscriptRequest};
use crate::routes::videos::VideoResponse;
use crate::routes::{health, jobs, queue, transcripts, videos};
use crate::telemetry::metrics as telemetry_metrics;

use vidscribe_core::{
    Job, JobEvent, JobId, JobPayload, JobState, QueueStats, RateDecision, ResourceRef,
};

/// OpenAPI document for VIDSCRIBE API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "VIDSCRIBE API",
        version = "0.1.0",
        description = "Rate-limited, cached transcript extraction with an asynchronous job queue",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Transcripts", description = "Submit transcript extraction requests"),
        (name = "Jobs", description = "Job status and live progress events"),
        (name = "Videos", description = "Inline video metadata lookups"),
        (name = "Queue", description = "Queue statistics"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        transcripts::submit_transcript,
        jobs::get_job,
        jobs::job_events_stream,
        videos::get_video,
        queue::queue_stats,
        health::ping,
        health::liveness,
        health::readiness,
        telemetry_metrics::metrics_handler,
    ),
    components(schemas(
        TranscriptRequest,
        SubmissionResponse,
        JobResponse,
        VideoResponse,
        QueueStatsResponse,
        Job,
        JobId,
        JobState,
        JobPayload,
        JobEvent,
        ResourceRef,
        QueueStats,
        RateDecision,
        ApiError,
        ErrorCode,
        HealthResponse,
        HealthStatus,
        HealthDetails,
        StorageHealth,
        QueueDepth,
    ))
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        let openapi = Self::openapi();
        serde_json::to_string_pretty(&openapi)
    }
}
