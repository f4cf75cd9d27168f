//! Inline video metadata lookups.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use vidscribe_core::{JobPayload, ResourceRef};

use crate::error::ApiResult;
use crate::middleware::ClientIdentity;
use crate::state::AppState;
use crate::video::require_video_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct VideoResponse {
    pub video_id: String,
    /// Whether the answer came from the result cache
    pub cached: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: serde_json::Value,
}

/// GET /api/v1/videos/{video_id} - Video metadata
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/videos/{video_id}",
    tag = "Videos",
    params(("video_id" = String, Path, description = "Video id")),
    responses(
        (status = 200, description = "Video metadata", body = VideoResponse),
        (status = 400, description = "Malformed video id", body = crate::error::ApiError),
        (status = 404, description = "Video not found upstream", body = crate::error::ApiError),
        (status = 429, description = "Rate limit exceeded", body = crate::error::ApiError),
        (status = 504, description = "Upstream timed out", body = crate::error::ApiError),
    ),
))]
pub async fn get_video(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoResponse>> {
    let video_id = require_video_id(&video_id)?;
    let payload = JobPayload::new(
        ResourceRef::new("video", video_id.clone())?,
        serde_json::json!({}),
    );

    let fetched = state
        .gateway
        .fetch_inline(identity.as_str(), &payload, state.metadata.as_ref())
        .await?;

    Ok(Json(VideoResponse {
        video_id,
        cached: fetched.cached,
        metadata: fetched.value,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/:video_id", get(get_video))
}
