//! Transcript submission.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vidscribe_core::{JobId, JobPayload, JobState, ResourceClass};

use crate::error::ApiResult;
use crate::middleware::ClientIdentity;
use crate::services::{ResourceGateway, Submission};
use crate::state::AppState;
use crate::video::require_video_id;

/// Body of `POST /api/v1/transcripts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TranscriptRequest {
    /// Video URL or bare video id
    pub url: String,
    /// Preferred transcript language (default: en)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Either a cached transcript or a handle to the job computing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubmissionResponse {
    pub status: JobState,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// 1-based position among waiting jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub result: Option<serde_json::Value>,
}

impl SubmissionResponse {
    fn into_http(self) -> Response {
        let status = if self.cached {
            StatusCode::OK
        } else {
            StatusCode::ACCEPTED
        };
        (status, Json(self)).into_response()
    }
}

impl From<Submission> for SubmissionResponse {
    fn from(submission: Submission) -> Self {
        match submission {
            Submission::Cached(result) => Self {
                status: JobState::Completed,
                cached: true,
                job_id: None,
                position: None,
                result: Some(result),
            },
            Submission::Enqueued { job, position } => Self {
                status: job.state,
                cached: false,
                job_id: Some(job.id),
                position,
                result: None,
            },
        }
    }
}

pub(crate) fn transcript_payload(request: &TranscriptRequest) -> ApiResult<JobPayload> {
    let video_id = require_video_id(&request.url)?;
    let lang = request
        .lang
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or("en");
    JobPayload::transcript(&video_id, lang, &request.url).map_err(Into::into)
}

/// POST /api/v1/transcripts - Submit a transcript request
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/transcripts",
    tag = "Transcripts",
    request_body = TranscriptRequest,
    responses(
        (status = 200, description = "Transcript served from cache", body = SubmissionResponse),
        (status = 202, description = "Job enqueued", body = SubmissionResponse),
        (status = 400, description = "Unrecognized video URL", body = crate::error::ApiError),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ApiError),
        (status = 503, description = "Queue overloaded or a backend is unavailable", body = crate::error::ApiError),
    ),
))]
pub async fn submit_transcript(
    State(gateway): State<Arc<ResourceGateway>>,
    identity: ClientIdentity,
    Json(request): Json<TranscriptRequest>,
) -> ApiResult<Response> {
    let payload = transcript_payload(&request)?;
    let submission = gateway
        .submit(identity.as_str(), &ResourceClass::TRANSCRIBE, payload)
        .await?;
    Ok(SubmissionResponse::from(submission).into_http())
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", post(submit_transcript))
}
