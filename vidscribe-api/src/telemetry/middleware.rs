//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a server span whose parent is taken from the W3C
//! `traceparent` header, records Prometheus counters and logs completion.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use opentelemetry::{global, Context};
use opentelemetry_http::HeaderExtractor;
use regex::Regex;
use std::time::Instant;
use tracing::{field, info_span, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::metrics::metrics;

static UUID_SEGMENT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}").ok()
});

static VIDEO_SEGMENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^/api/v1/videos/[^/]+").ok());

fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Replace job and video ids with placeholders to keep label cardinality flat.
fn normalize_path(path: &str) -> String {
    let mut result = path.to_string();
    if let Some(re) = UUID_SEGMENT.as_ref() {
        result = re.replace_all(&result, "{id}").into_owned();
    }
    if let Some(re) = VIDEO_SEGMENT.as_ref() {
        result = re.replace(&result, "/api/v1/videos/{video_id}").into_owned();
    }
    result
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        otel.name = %format!("{} {}", method, normalized_path),
        otel.kind = "server",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
        http.status_code = field::Empty,
    );
    let _ = span.set_parent(extract_trace_context(request.headers()));

    let response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();
    span.record("http.status_code", status.as_u16());

    if let Some(m) = metrics() {
        m.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}
