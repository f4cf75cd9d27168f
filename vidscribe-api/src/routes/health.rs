//! Health Check Endpoints
//!
//! - /health/ping: plain-text pong
//! - /health/live: the process is up
//! - /health/ready: the shared store answers; in Postgres mode that is a
//!   round trip on the pool, so an instance cut off from the database stops
//!   receiving traffic

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use vidscribe_storage::{JobQueue, StoreHealth};

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthDetails {
    pub storage: StorageHealth,
    /// Absent when the store could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueDepth>,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Result of one round trip to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StorageHealth {
    /// `postgres` or `memory`
    pub backend: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QueueDepth {
    pub waiting: u64,
    pub active: u64,
}

impl StorageHealth {
    async fn check(store: &StoreHealth) -> Self {
        let (status, latency_ms, error) = match store.check().await {
            Ok(latency) => (HealthStatus::Healthy, Some(latency.as_millis() as u64), None),
            Err(e) => {
                tracing::warn!(backend = store.backend(), error = %e, "readiness check failed");
                (HealthStatus::Unhealthy, None, Some(e))
            }
        };
        Self {
            backend: store.backend().to_string(),
            status,
            latency_ms,
            error,
        }
    }
}

/// GET /health/ping - Simple pong response
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses(
        (status = 200, description = "Service is responding", body = String),
    ),
))]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse),
    ),
))]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    })
}

/// GET /health/ready - Readiness check against the shared store
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Store reachable", body = HealthResponse),
        (status = 503, description = "Store unreachable", body = HealthResponse),
    ),
))]
pub async fn readiness(
    State(store): State<StoreHealth>,
    State(queue): State<Arc<dyn JobQueue>>,
    State(start_time): State<Instant>,
) -> (StatusCode, Json<HealthResponse>) {
    let storage = StorageHealth::check(&store).await;
    let ready = storage.status == HealthStatus::Healthy;

    let depth = if ready {
        queue.stats().await.ok().map(|stats| QueueDepth {
            waiting: stats.waiting,
            active: stats.active,
        })
    } else {
        None
    };

    let response = HealthResponse {
        status: storage.status,
        message: (!ready).then(|| format!("{} store unreachable", storage.backend)),
        details: Some(HealthDetails {
            storage,
            queue: depth,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: start_time.elapsed().as_secs(),
        }),
    };

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidscribe_storage::DbConfig;
    use vidscribe_test_utils::{transcript_payload, MemoryBackends, SAMPLE_VIDEO_IDS};

    fn unreachable_postgres() -> StoreHealth {
        let config = DbConfig {
            port: 1,
            timeout: std::time::Duration::from_millis(200),
            ..DbConfig::default()
        };
        StoreHealth::Postgres(config.create_pool().unwrap())
    }

    #[tokio::test]
    async fn test_ready_reports_backend_and_queue_depth() {
        let backends = MemoryBackends::default();
        backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[0]))
            .await
            .unwrap();

        let (code, Json(body)) = readiness(
            State(StoreHealth::InProcess),
            State(backends.queue.clone()),
            State(Instant::now()),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Healthy);
        let details = body.details.unwrap();
        assert_eq!(details.storage.backend, "memory");
        assert_eq!(details.queue.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_unreachable_database_is_not_ready() {
        let backends = MemoryBackends::default();
        let (code, Json(body)) = readiness(
            State(unreachable_postgres()),
            State(backends.queue.clone()),
            State(Instant::now()),
        )
        .await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Unhealthy);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["details"]["storage"]["backend"], "postgres");
        assert_eq!(json["details"]["storage"]["status"], "unhealthy");
        assert!(json["details"].get("queue").is_none());
        assert!(json["details"]["storage"]["error"]
            .as_str()
            .unwrap()
            .contains("postgres unreachable"));
    }

    #[test]
    fn test_liveness_omits_details() {
        let json = serde_json::to_string(&HealthResponse {
            status: HealthStatus::Healthy,
            message: None,
            details: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"healthy"}"#);
    }
}
