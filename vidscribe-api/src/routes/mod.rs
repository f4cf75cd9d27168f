//! REST API Routes Module
//!
//! Route handlers grouped by resource:
//! - Transcript submission (cached or enqueued)
//! - Job status lookup and server-sent event streams
//! - Inline video metadata
//! - Queue statistics
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics and the OpenAPI document

pub mod health;
pub mod jobs;
pub mod queue;
pub mod transcripts;
pub mod videos;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, request::Parts, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::ApiConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use health::create_router as health_router;
pub use jobs::create_router as jobs_router;
pub use queue::create_router as queue_router;
pub use transcripts::create_router as transcripts_router;
pub use videos::create_router as videos_router;

// ============================================================================
// OPENAPI ENDPOINTS
// ============================================================================

/// Handler for /api-docs/openapi.json endpoint. Swagger UI serves the same
/// path itself when enabled.
#[cfg(all(feature = "openapi", not(feature = "swagger-ui")))]
async fn openapi_json() -> impl axum::response::IntoResponse {
    use utoipa::OpenApi;
    axum::Json(crate::openapi::ApiDoc::openapi())
}

// ============================================================================
// CORS
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// An empty origin list means development mode and allows any origin.
/// Otherwise each request origin is matched with
/// [`ApiConfig::is_origin_allowed`], so wildcard subdomains work.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if !config.is_production() {
        tracing::info!("CORS: Development mode - allowing all origins");
        return cors.allow_origin(Any);
    }

    tracing::info!(
        "CORS: Production mode - allowing origins: {:?}",
        config.cors_origins
    );
    let allowed = config.clone();
    let origins = AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
        origin
            .to_str()
            .map(|o| allowed.is_origin_allowed(o))
            .unwrap_or(false)
    });

    if config.cors_allow_credentials {
        cors.allow_origin(origins).allow_credentials(true)
    } else {
        cors.allow_origin(origins)
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the complete API router.
///
/// - `/api/v1/transcripts`, `/api/v1/jobs`, `/api/v1/videos`, `/api/v1/queue`
/// - `/health/*` probes
/// - `/metrics` for Prometheus
/// - `/api-docs/openapi.json` and `/swagger-ui` when the features are enabled
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .nest("/transcripts", transcripts::create_router())
        .nest("/jobs", jobs::create_router())
        .nest("/videos", videos::create_router())
        .nest("/queue", queue::create_router());

    let cors = build_cors_layer(&state.config);

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler));

    #[cfg(all(feature = "openapi", not(feature = "swagger-ui")))]
    let router = router.route("/api-docs/openapi.json", get(openapi_json));

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;
        router.merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", crate::openapi::ApiDoc::openapi()),
        )
    };

    // Outer to inner in execution: cors, observability, compression.
    router
        .layer(CompressionLayer::new())
        .layer(from_fn(observability_middleware))
        .layer(cors)
        .with_state(state)
}
