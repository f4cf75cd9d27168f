//! End-to-end tests for the VIDSCRIBE HTTP surface, wired to in-memory
//! backends on a manual clock and scripted upstreams.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use vidscribe_api::{
    create_router, ApiConfig, AppState, JobNotifier, ResourceGateway, WorkerConfig, WorkerPool,
};
use vidscribe_core::{Clock, RateQuota};
use vidscribe_test_utils::*;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

struct Harness {
    app: Router,
    backends: MemoryBackends,
    cache: Arc<FailOpenCache>,
    notifier: JobNotifier,
    transcripts: ScriptedFetcher,
    metadata: ScriptedFetcher,
}

impl Harness {
    fn new(policy: LimiterPolicy, settings: QueueSettings) -> Self {
        let backends = MemoryBackends::new(policy, settings);
        let clock: Arc<dyn Clock> = Arc::new(backends.clock.clone());
        let cache = Arc::new(FailOpenCache::new(backends.cache.clone()));
        let notifier = JobNotifier::default();
        let metadata = ScriptedFetcher::new(ResourceClass::METADATA);

        let gateway = ResourceGateway::new(
            backends.limiter.clone(),
            Arc::clone(&cache),
            backends.queue.clone(),
            notifier.clone(),
            Arc::clone(&clock),
        );
        let state = AppState::new(
            Arc::new(gateway),
            notifier.clone(),
            Arc::new(metadata.clone()),
            clock,
            ApiConfig::default(),
        );

        Self {
            app: create_router(state),
            backends,
            cache,
            notifier,
            transcripts: ScriptedFetcher::transcripts(),
            metadata,
        }
    }

    fn with_defaults() -> Self {
        Self::new(LimiterPolicy::default(), QueueSettings::default())
    }

    fn worker_pool(&self) -> WorkerPool {
        let config = WorkerConfig {
            retry: RetryConfig::none(),
            job_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        };
        WorkerPool::new(
            self.backends.queue.clone(),
            Arc::clone(&self.cache),
            Arc::new(self.transcripts.clone()),
            self.notifier.clone(),
            Arc::new(self.backends.clock.clone()),
            config,
        )
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn submit(&self, identity: &str, url: &str) -> Response {
        self.submit_body(identity, json!({ "url": url })).await
    }

    async fn submit_body(&self, identity: &str, body: Value) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/transcripts")
            .header("content-type", "application/json")
            .header("x-forwarded-for", identity)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn get(&self, identity: &str, uri: &str) -> Response {
        let request = Request::builder()
            .uri(uri)
            .header("x-forwarded-for", identity)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// ============================================================================
// SUBMISSION
// ============================================================================

#[tokio::test]
async fn test_submission_is_enqueued_with_position() {
    let h = Harness::with_defaults();

    let response = h.submit("10.0.0.1", WATCH_URL).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "waiting");
    assert_eq!(body["cached"], false);
    assert_eq!(body["position"], 1);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let response = h.get("10.0.0.1", &format!("/api/v1/jobs/{}", job_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["id"], job_id.as_str());
    assert_eq!(job["state"], "waiting");
    assert_eq!(job["position"], 1);
    assert_eq!(job["payload"]["resource"]["resource_id"], "dQw4w9WgXcQ.en");
    assert_eq!(job["payload"]["params"]["video_id"], "dQw4w9WgXcQ");
}

#[tokio::test]
async fn test_completed_resource_is_served_from_cache() {
    let h = Harness::with_defaults();

    let first = body_json(h.submit("10.0.0.1", WATCH_URL).await).await;
    let job_id = first["job_id"].as_str().unwrap().to_string();

    let pool = h.worker_pool();
    assert!(pool.run_once("test-worker").await.unwrap());
    assert_eq!(h.transcripts.calls(), 1);

    let job = body_json(h.get("10.0.0.1", &format!("/api/v1/jobs/{}", job_id)).await).await;
    assert_eq!(job["state"], "completed");
    assert!(job.get("position").is_none());

    // Short-link form of the same video hits the same cache entry.
    let response = h.submit("10.0.0.2", "https://youtu.be/dQw4w9WgXcQ").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["cached"], true);
    assert_eq!(body["status"], "completed");
    assert!(body.get("job_id").is_none());
    assert_eq!(body["result"], job["result"]);

    assert_eq!(h.transcripts.calls(), 1);
    assert_eq!(h.backends.queue.waiting_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cached_transcript_is_per_language() {
    let h = Harness::with_defaults();

    h.submit("10.0.0.1", WATCH_URL).await;
    assert!(h.worker_pool().run_once("test-worker").await.unwrap());

    let response = h
        .submit_body("10.0.0.1", json!({ "url": WATCH_URL, "lang": "de" }))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["cached"], false);

    let response = h
        .submit_body("10.0.0.2", json!({ "url": WATCH_URL, "lang": "EN" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["cached"], true);
    assert_eq!(h.transcripts.calls(), 1);
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let h = Harness::with_defaults();

    let response = h.submit("10.0.0.1", "https://example.com/not-a-video").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(h.backends.queue.waiting_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_overloaded_queue_rejects_new_work() {
    let h = Harness::new(
        LimiterPolicy::default(),
        QueueSettings::default().with_overload_threshold(1),
    );

    for id in &SAMPLE_VIDEO_IDS[..2] {
        let response = h.submit("10.0.0.1", id).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = h.submit("10.0.0.1", SAMPLE_VIDEO_IDS[2]).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["code"], "QUEUE_OVERLOADED");
    assert_eq!(h.backends.queue.waiting_count().await.unwrap(), 2);
}

// ============================================================================
// RATE LIMITING
// ============================================================================

#[tokio::test]
async fn test_quota_exhaustion_returns_429_with_headers() {
    let policy = LimiterPolicy::empty()
        .with_quota(ResourceClass::TRANSCRIBE, RateQuota::per_minute(2))
        .with_quota(ResourceClass::METADATA, RateQuota::per_minute(60));
    let h = Harness::new(policy, QueueSettings::default());

    for id in &SAMPLE_VIDEO_IDS[..2] {
        let response = h.submit("10.0.0.1", id).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let response = h.submit("10.0.0.1", SAMPLE_VIDEO_IDS[2]).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-ratelimit-limit"), Some("2"));
    assert_eq!(header(&response, "x-ratelimit-remaining"), Some("0"));
    let retry_after: u64 = header(&response, "retry-after").unwrap().parse().unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
    let body = body_json(response).await;
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");

    // Another identity has its own window.
    let response = h.submit("10.0.0.2", SAMPLE_VIDEO_IDS[2]).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The window slides: a minute later the first identity is admitted again.
    h.backends.clock.advance(Duration::from_secs(61));
    let response = h.submit("10.0.0.1", SAMPLE_VIDEO_IDS[2]).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

// ============================================================================
// JOBS
// ============================================================================

#[tokio::test]
async fn test_unknown_and_malformed_job_ids() {
    let h = Harness::with_defaults();

    let response = h.get("10.0.0.1", &format!("/api/v1/jobs/{}", JobId::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "RESOURCE_NOT_FOUND");

    let response = h.get("10.0.0.1", "/api/v1/jobs/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let h = Harness::with_defaults();
    let h = Harness {
        transcripts: ScriptedFetcher::transcripts().then_err(FetchError::NotFound {
            resource: "transcript dQw4w9WgXcQ".to_string(),
        }),
        ..h
    };

    let body = body_json(h.submit("10.0.0.1", WATCH_URL).await).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(h.worker_pool().run_once("test-worker").await.unwrap());

    let job = body_json(h.get("10.0.0.1", &format!("/api/v1/jobs/{}", job_id)).await).await;
    assert_eq!(job["state"], "failed");
    assert!(job["error"].as_str().unwrap().contains("not found"));
    assert!(job.get("result").is_none());
}

#[tokio::test]
async fn test_queue_stats_reflect_waiting_jobs() {
    let h = Harness::with_defaults();
    for id in SAMPLE_VIDEO_IDS {
        h.submit("10.0.0.1", id).await;
    }

    let response = h.get("10.0.0.1", "/api/v1/queue/stats").await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["queue"], "transcripts");
    assert_eq!(stats["waiting"], 3);
    assert_eq!(stats["active"], 0);
    assert_eq!(stats["overloaded"], false);
}

// ============================================================================
// INLINE METADATA
// ============================================================================

#[tokio::test]
async fn test_video_metadata_is_fetched_once_then_cached() {
    let h = Harness::with_defaults();
    let uri = format!("/api/v1/videos/{}", SAMPLE_VIDEO_IDS[0]);

    let response = h.get("10.0.0.1", &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["video_id"], SAMPLE_VIDEO_IDS[0]);
    assert_eq!(body["cached"], false);

    let body = body_json(h.get("10.0.0.1", &uri).await).await;
    assert_eq!(body["cached"], true);
    assert_eq!(h.metadata.calls(), 1);
}

#[tokio::test]
async fn test_malformed_video_id_is_rejected() {
    let h = Harness::with_defaults();
    let response = h.get("10.0.0.1", "/api/v1/videos/short").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.metadata.calls(), 0);
}

// ============================================================================
// HEALTH AND METRICS
// ============================================================================

#[tokio::test]
async fn test_health_probes() {
    let h = Harness::with_defaults();

    let response = h.get("10.0.0.1", "/health/ping").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = h.get("10.0.0.1", "/health/ready").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["details"]["storage"]["backend"], "memory");
    assert_eq!(body["details"]["queue"]["waiting"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let h = Harness::with_defaults();
    h.submit("10.0.0.1", WATCH_URL).await;

    let response = h.get("10.0.0.1", "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("vidscribe_"));
}
