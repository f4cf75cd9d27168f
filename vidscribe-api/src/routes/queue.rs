//! Queue statistics.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vidscribe_core::QueueStats;
use vidscribe_storage::JobQueue;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::telemetry::metrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QueueStatsResponse {
    pub queue: String,
    #[serde(flatten)]
    pub stats: QueueStats,
    pub overload_threshold: u64,
    /// Whether new submissions are currently rejected
    pub overloaded: bool,
}

/// GET /api/v1/queue/stats - Job counts per state
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/queue/stats",
    tag = "Queue",
    responses(
        (status = 200, description = "Queue statistics", body = QueueStatsResponse),
        (status = 503, description = "Queue backend unavailable", body = crate::error::ApiError),
    ),
))]
pub async fn queue_stats(
    State(queue): State<Arc<dyn JobQueue>>,
) -> ApiResult<Json<QueueStatsResponse>> {
    let stats = queue.stats().await?;
    let overload_threshold = queue.settings().overload_threshold;
    if let Some(m) = metrics() {
        m.set_queue_waiting(stats.waiting);
    }
    Ok(Json(QueueStatsResponse {
        queue: queue.name().to_string(),
        stats,
        overload_threshold,
        overloaded: stats.waiting > overload_threshold,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/stats", get(queue_stats))
}
