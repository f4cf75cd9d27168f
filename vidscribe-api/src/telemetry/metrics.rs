//! Prometheus Metrics Definitions
//!
//! Defines all VIDSCRIBE metrics with their labels. Exposed on `/metrics`
//! for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Job duration buckets (seconds); upstream extraction is slow.
const JOB_LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<VidscribeMetrics>> = Lazy::new(VidscribeMetrics::new);

/// The registered metrics, or `None` if registration failed at startup.
pub fn metrics() -> Option<&'static VidscribeMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all VIDSCRIBE metrics.
#[derive(Clone)]
pub struct VidscribeMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Admission decisions - labels: class, outcome (allowed/rejected/error)
    pub rate_limit_decisions_total: CounterVec,

    /// Result cache lookups - labels: outcome (hit/miss)
    pub cache_lookups_total: CounterVec,

    /// Finished job attempts - labels: outcome (completed/failed/lease_lost)
    pub job_outcomes_total: CounterVec,

    /// Job processing time - labels: outcome
    pub job_duration_seconds: HistogramVec,

    /// Waiting jobs at the last observation
    pub queue_waiting: IntGauge,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl VidscribeMetrics {
    /// Create and register all metrics with the default registry.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "vidscribe_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "vidscribe_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            rate_limit_decisions_total: register_counter_vec!(
                "vidscribe_rate_limit_decisions_total",
                "Admission decisions by resource class and outcome",
                &["class", "outcome"]
            )
            .map_err(|e| registration_error("rate_limit_decisions_total", e))?,

            cache_lookups_total: register_counter_vec!(
                "vidscribe_cache_lookups_total",
                "Result cache lookups by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("cache_lookups_total", e))?,

            job_outcomes_total: register_counter_vec!(
                "vidscribe_job_outcomes_total",
                "Processed job deliveries by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("job_outcomes_total", e))?,

            job_duration_seconds: register_histogram_vec!(
                "vidscribe_job_duration_seconds",
                "Job processing duration in seconds",
                &["outcome"],
                JOB_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("job_duration_seconds", e))?,

            queue_waiting: register_int_gauge!(
                "vidscribe_queue_waiting",
                "Jobs waiting in the queue"
            )
            .map_err(|e| registration_error("queue_waiting", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_rate_decision(&self, class: &str, outcome: &str) {
        self.rate_limit_decisions_total
            .with_label_values(&[class, outcome])
            .inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_job(&self, outcome: &str, duration_secs: f64) {
        self.job_outcomes_total.with_label_values(&[outcome]).inc();
        self.job_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn set_queue_waiting(&self, waiting: u64) {
        self.queue_waiting.set(i64::try_from(waiting).unwrap_or(i64::MAX));
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
))]
pub async fn metrics_handler() -> impl IntoResponse {
    // Force registration so a fresh process still exposes every family.
    let _ = metrics();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
