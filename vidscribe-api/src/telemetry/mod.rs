//! VIDSCRIBE Telemetry - Observability Infrastructure
//!
//! OpenTelemetry tracing and Prometheus metrics for the API and the worker
//! pool. Both work without an external collector.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics, metrics_handler, VidscribeMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, shutdown_tracer, TelemetryConfig};
