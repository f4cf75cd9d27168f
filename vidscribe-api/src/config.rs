//! API Configuration Module
//!
//! Configuration for the HTTP layer, the storage backends, the upstream
//! clients and the worker pool, loaded from `VIDSCRIBE_*` environment
//! variables with defaults for development. Values that are present but
//! unparsable are startup errors rather than silent fallbacks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use vidscribe_core::{ConfigError, QueueSettings, RateQuota, ResourceClass, RetryConfig};
use vidscribe_storage::LimiterPolicy;

use crate::constants::*;

// ============================================================================
// ENVIRONMENT LOOKUP
// ============================================================================

/// Source of configuration values; `std::env::var` in production.
pub trait EnvLookup {
    fn get(&self, name: &str) -> Option<String>;
}

/// Process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

pub(crate) fn parse_or<T: FromStr>(env: &impl EnvLookup, name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

pub(crate) fn bool_or(env: &impl EnvLookup, name: &str, default: bool) -> bool {
    env.get(name)
        .map(|s| match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        })
        .unwrap_or(default)
}

pub(crate) fn secs_or(env: &impl EnvLookup, name: &str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(env, name, default).map(Duration::from_secs)
}

pub(crate) fn millis_or(env: &impl EnvLookup, name: &str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(env, name, default).map(Duration::from_millis)
}

// ============================================================================
// STORAGE BACKEND
// ============================================================================

/// Where limiter, cache and queue state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Single process only; state is lost on restart.
    Memory,
    /// Shared PostgreSQL state (production).
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(format!("expected 'memory' or 'postgres', got '{}'", other)),
        }
    }
}

// ============================================================================
// UPSTREAM CONFIGURATION
// ============================================================================

/// Settings shared by the upstream HTTP clients.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the transcript/metadata provider (required).
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    /// Outbound request ceiling, enforced by a local throttle.
    pub requests_per_second: u32,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            requests_per_second: DEFAULT_UPSTREAM_RPS,
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let base_url = env
            .get("VIDSCRIBE_UPSTREAM_URL")
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "VIDSCRIBE_UPSTREAM_URL".to_string(),
            })?;
        let requests_per_second =
            parse_or(env, "VIDSCRIBE_UPSTREAM_RPS", DEFAULT_UPSTREAM_RPS)?;
        if requests_per_second == 0 {
            return Err(ConfigError::InvalidValue {
                field: "VIDSCRIBE_UPSTREAM_RPS".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: env.get("VIDSCRIBE_UPSTREAM_API_KEY"),
            requests_per_second,
            timeout: secs_or(env, "VIDSCRIBE_UPSTREAM_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?,
        })
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Configuration of the HTTP service and its request pipeline.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Admission and caching
    // ========================================================================
    /// Whether rate limiting is enforced. Disable only in development.
    pub rate_limit_enabled: bool,

    /// Quotas per resource class.
    pub limiter_policy: LimiterPolicy,

    /// Time-to-live of cached results.
    pub cache_ttl: Duration,

    /// Timeout for inline (non-queued) upstream fetches.
    pub inline_fetch_timeout: Duration,

    pub storage_backend: StorageBackend,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            rate_limit_enabled: true,
            limiter_policy: LimiterPolicy::default(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            inline_fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            storage_backend: StorageBackend::Postgres,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `VIDSCRIBE_BIND_ADDR`: Listen address (default: 0.0.0.0:3000)
    /// - `VIDSCRIBE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `VIDSCRIBE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `VIDSCRIBE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `VIDSCRIBE_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `VIDSCRIBE_RATE_LIMIT_PREFIX`: Window key prefix (default: ratelimit)
    /// - `VIDSCRIBE_RATE_LIMIT_<CLASS>`: `<limit>/<seconds>` for transcribe,
    ///   tts, chat, metadata
    /// - `VIDSCRIBE_CACHE_TTL_SECS`: Result cache TTL (default: 300)
    /// - `VIDSCRIBE_INLINE_TIMEOUT_SECS`: Inline fetch timeout (default: 30)
    /// - `VIDSCRIBE_STORAGE_BACKEND`: "postgres" or "memory" (default: postgres)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cors_origins = env
            .get("VIDSCRIBE_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut limiter_policy = LimiterPolicy::default();
        if let Some(prefix) = env.get("VIDSCRIBE_RATE_LIMIT_PREFIX") {
            limiter_policy = limiter_policy.with_prefix(prefix);
        }
        for class in [
            ResourceClass::TRANSCRIBE,
            ResourceClass::TTS,
            ResourceClass::CHAT,
            ResourceClass::METADATA,
        ] {
            let name = format!("VIDSCRIBE_RATE_LIMIT_{}", class.as_str().to_uppercase());
            if let Some(raw) = env.get(&name) {
                let quota: RateQuota = raw.parse().map_err(|e| match e {
                    ConfigError::InvalidValue { value, reason, .. } => ConfigError::InvalidValue {
                        field: name.clone(),
                        value,
                        reason,
                    },
                    other => other,
                })?;
                limiter_policy = limiter_policy.with_quota(class, quota);
            }
        }

        Ok(Self {
            bind_addr: parse_or(env, "VIDSCRIBE_BIND_ADDR", defaults.bind_addr)?,
            cors_origins,
            cors_allow_credentials: bool_or(env, "VIDSCRIBE_CORS_ALLOW_CREDENTIALS", false),
            cors_max_age_secs: parse_or(
                env,
                "VIDSCRIBE_CORS_MAX_AGE_SECS",
                DEFAULT_CORS_MAX_AGE_SECS,
            )?,
            rate_limit_enabled: bool_or(env, "VIDSCRIBE_RATE_LIMIT_ENABLED", true),
            limiter_policy,
            cache_ttl: secs_or(env, "VIDSCRIBE_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?,
            inline_fetch_timeout: secs_or(
                env,
                "VIDSCRIBE_INLINE_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?,
            storage_backend: parse_or(
                env,
                "VIDSCRIBE_STORAGE_BACKEND",
                defaults.storage_backend,
            )?,
        })
    }

    /// Strict CORS is on once any origin is configured.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed. An entry `*.example.com` admits
    /// any https subdomain of example.com.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }
}

// ============================================================================
// WORKER CONFIGURATION
// ============================================================================

/// Configuration of the worker pool and the lease reaper.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker tasks; each processes one job at a time.
    pub concurrency: usize,
    pub queue: QueueSettings,
    pub retry: RetryConfig,
    /// Timeout of one upstream call.
    pub job_timeout: Duration,
    /// Fallback poll interval when idle.
    pub poll_interval: Duration,
    pub reaper_interval: Duration,
    pub purge_interval: Duration,
    /// How long terminal jobs are kept.
    pub retention: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            queue: QueueSettings::default(),
            retry: RetryConfig::default(),
            job_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_JOB_RETENTION_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create WorkerConfig from environment variables.
    ///
    /// Environment variables:
    /// - `VIDSCRIBE_WORKER_CONCURRENCY` (default: 2)
    /// - `VIDSCRIBE_QUEUE_NAME` (default: transcripts)
    /// - `VIDSCRIBE_QUEUE_OVERLOAD_THRESHOLD` (default: 20)
    /// - `VIDSCRIBE_QUEUE_LEASE_SECS` (default: 60)
    /// - `VIDSCRIBE_QUEUE_MAX_DELIVERIES` (default: 3)
    /// - `VIDSCRIBE_JOB_TIMEOUT_SECS` (default: 30)
    /// - `VIDSCRIBE_JOB_MAX_RETRIES` (default: 2)
    /// - `VIDSCRIBE_JOB_BACKOFF_MS` / `VIDSCRIBE_JOB_MAX_BACKOFF_MS` (default: 500 / 10000)
    /// - `VIDSCRIBE_WORKER_POLL_MS` (default: 1000)
    /// - `VIDSCRIBE_REAPER_INTERVAL_SECS` (default: 15)
    /// - `VIDSCRIBE_PURGE_INTERVAL_SECS` (default: 3600)
    /// - `VIDSCRIBE_JOB_RETENTION_SECS` (default: 86400)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let d = Self::default();

        let queue = QueueSettings {
            name: env.get("VIDSCRIBE_QUEUE_NAME").unwrap_or(d.queue.name),
            overload_threshold: parse_or(
                env,
                "VIDSCRIBE_QUEUE_OVERLOAD_THRESHOLD",
                d.queue.overload_threshold,
            )?,
            lease_duration: secs_or(
                env,
                "VIDSCRIBE_QUEUE_LEASE_SECS",
                d.queue.lease_duration.as_secs(),
            )?,
            max_deliveries: parse_or(env, "VIDSCRIBE_QUEUE_MAX_DELIVERIES", d.queue.max_deliveries)?,
        };

        let retry = RetryConfig {
            max_retries: parse_or(env, "VIDSCRIBE_JOB_MAX_RETRIES", d.retry.max_retries)?,
            initial_backoff: millis_or(
                env,
                "VIDSCRIBE_JOB_BACKOFF_MS",
                d.retry.initial_backoff.as_millis() as u64,
            )?,
            max_backoff: millis_or(
                env,
                "VIDSCRIBE_JOB_MAX_BACKOFF_MS",
                d.retry.max_backoff.as_millis() as u64,
            )?,
            backoff_multiplier: d.retry.backoff_multiplier,
        };

        let config = Self {
            concurrency: parse_or(env, "VIDSCRIBE_WORKER_CONCURRENCY", d.concurrency)?,
            queue,
            retry,
            job_timeout: secs_or(env, "VIDSCRIBE_JOB_TIMEOUT_SECS", d.job_timeout.as_secs())?,
            poll_interval: millis_or(
                env,
                "VIDSCRIBE_WORKER_POLL_MS",
                d.poll_interval.as_millis() as u64,
            )?,
            reaper_interval: secs_or(
                env,
                "VIDSCRIBE_REAPER_INTERVAL_SECS",
                d.reaper_interval.as_secs(),
            )?,
            purge_interval: secs_or(
                env,
                "VIDSCRIBE_PURGE_INTERVAL_SECS",
                d.purge_interval.as_secs(),
            )?,
            retention: secs_or(env, "VIDSCRIBE_JOB_RETENTION_SECS", d.retention.as_secs())?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.retry.validate()?;
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "VIDSCRIBE_WORKER_CONCURRENCY".to_string(),
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }
        // A lease must outlive one upstream call or every slow job is redelivered.
        if self.queue.lease_duration <= self.job_timeout {
            return Err(ConfigError::InvalidValue {
                field: "VIDSCRIBE_QUEUE_LEASE_SECS".to_string(),
                value: self.queue.lease_duration.as_secs().to_string(),
                reason: format!(
                    "must exceed the job timeout of {}s",
                    self.job_timeout.as_secs()
                ),
            });
        }
        Ok(())
    }
}
