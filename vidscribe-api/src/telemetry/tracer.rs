//! OpenTelemetry Tracer Initialization
//!
//! Installs the global `tracing` subscriber (env filter, JSON formatter and
//! an OpenTelemetry layer). Spans are exported over OTLP/HTTP only when an
//! endpoint is configured.
//!
//! The exporter runs on its own thread with a blocking HTTP client, so
//! [`init_tracer`] must be called before the Tokio runtime starts.

use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use std::sync::OnceLock;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vidscribe_core::ConfigError;

use crate::config::{bool_or, parse_or, EnvLookup, ProcessEnv};
use crate::error::{ApiError, ApiResult};

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const DEFAULT_LOG_FILTER: &str = "vidscribe_api=debug,tower_http=debug,info";

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// OTLP/HTTP endpoint for traces (e.g. "http://localhost:4318/v1/traces")
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub service_version: String,
    /// production, staging, development
    pub environment: String,
    /// Trace sampling ratio (0.0 to 1.0)
    pub trace_sample_rate: f64,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: "vidscribe-api".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            trace_sample_rate: 1.0,
            json_logs: true,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `VIDSCRIBE_OTLP_ENDPOINT` (unset disables export)
    /// - `VIDSCRIBE_SERVICE_NAME` (default: vidscribe-api)
    /// - `VIDSCRIBE_ENVIRONMENT` (default: development)
    /// - `VIDSCRIBE_TRACE_SAMPLE_RATE` (default: 1.0)
    /// - `VIDSCRIBE_JSON_LOGS` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            otlp_endpoint: env.get("VIDSCRIBE_OTLP_ENDPOINT"),
            service_name: env.get("VIDSCRIBE_SERVICE_NAME").unwrap_or(d.service_name),
            service_version: d.service_version,
            environment: env.get("VIDSCRIBE_ENVIRONMENT").unwrap_or(d.environment),
            trace_sample_rate: parse_or(env, "VIDSCRIBE_TRACE_SAMPLE_RATE", d.trace_sample_rate)?,
            json_logs: bool_or(env, "VIDSCRIBE_JSON_LOGS", d.json_logs),
        })
    }

    fn sampler(&self) -> Sampler {
        if self.trace_sample_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.trace_sample_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.trace_sample_rate)
        }
    }
}

/// Initialize the tracer provider and the global tracing subscriber.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<()> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ])
        .build();

    let mut builder = SdkTracerProvider::builder()
        .with_sampler(config.sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to create OTLP exporter: {}", e))
            })?;
        builder = builder.with_batch_exporter(exporter);
    }

    let provider = builder.build();
    let tracer = provider.tracer("vidscribe-api");
    global::set_tracer_provider(provider.clone());
    let _ = TRACER_PROVIDER.set(provider);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(OpenTelemetryLayer::new(tracer));

    let init = if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    init.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        environment = %config.environment,
        otlp_endpoint = ?config.otlp_endpoint,
        "Telemetry initialized"
    );

    Ok(())
}

/// Flush pending spans and shut the provider down.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Tracer shutdown reported an error");
        }
    }
    tracing::info!("Tracer shutdown complete");
}
