//! VIDSCRIBE API Server Entry Point
//!
//! Bootstraps configuration and storage, spawns the worker pool and the
//! lease reaper, and serves the Axum router until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use vidscribe_api::telemetry::{init_tracer, shutdown_tracer, TelemetryConfig};
use vidscribe_api::{
    create_router, lease_reaper_task, ApiConfig, ApiError, ApiResult, AppState, HttpUpstream,
    JobNotifier, LeaseReaperConfig, MetadataClient, ProcessEnv, ReaperTargets, ResourceGateway,
    StorageBackend, TranscriptClient, UpstreamConfig, WorkerConfig, WorkerPool,
};
use vidscribe_core::{Clock, SystemClock, UpstreamFetcher};
use vidscribe_storage::{
    migrate, DbConfig, FailOpenCache, InMemoryJobQueue, InMemoryRateLimiter, InMemoryResultCache,
    JobQueue, PgJobQueue, PgRateLimiter, PgResultCache, RateLimiter, ResultCache, StoreHealth,
};

/// The shared state backends and the store readiness checks run against.
struct Backends {
    limiter: Arc<dyn RateLimiter>,
    cache: Arc<dyn ResultCache>,
    queue: Arc<dyn JobQueue>,
    health: StoreHealth,
}

// The OTLP exporter runs on its own blocking thread, so tracing is set up
// before the async runtime exists.
fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env()?;
    init_tracer(&telemetry_config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ApiError::internal_error(format!("Failed to start runtime: {}", e)))?;
    let result = runtime.block_on(run());
    drop(runtime);

    if let Err(e) = &result {
        tracing::error!(error = %e, "VIDSCRIBE API exited with error");
    }
    shutdown_tracer();
    result
}

async fn run() -> ApiResult<()> {
    let api_config = ApiConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;
    let upstream_config = UpstreamConfig::from_lookup(&ProcessEnv)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = build_backends(&api_config, &worker_config, &clock).await?;

    let cache = Arc::new(FailOpenCache::with_ttl(
        Arc::clone(&backends.cache),
        api_config.cache_ttl,
    ));
    let http = HttpUpstream::new(&upstream_config)?;
    let transcripts: Arc<dyn UpstreamFetcher> = Arc::new(TranscriptClient::new(http.clone()));
    let metadata: Arc<dyn UpstreamFetcher> = Arc::new(MetadataClient::new(http));
    let notifier = JobNotifier::default();

    let gateway = ResourceGateway::new(
        Arc::clone(&backends.limiter),
        Arc::clone(&cache),
        Arc::clone(&backends.queue),
        notifier.clone(),
        Arc::clone(&clock),
    )
    .with_rate_limit_enabled(api_config.rate_limit_enabled)
    .with_inline_timeout(api_config.inline_fetch_timeout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = WorkerPool::new(
        Arc::clone(&backends.queue),
        Arc::clone(&cache),
        transcripts,
        notifier.clone(),
        Arc::clone(&clock),
        worker_config.clone(),
    );
    let workers = pool.spawn(shutdown_rx.clone());

    let reaper = tokio::spawn(lease_reaper_task(
        ReaperTargets {
            queue: Arc::clone(&backends.queue),
            cache: Arc::clone(&backends.cache),
            limiter: Arc::clone(&backends.limiter),
            notifier: notifier.clone(),
            clock: Arc::clone(&clock),
        },
        LeaseReaperConfig::from(&worker_config),
        shutdown_rx,
    ));

    let addr = api_config.bind_addr;
    let state = AppState::new(Arc::new(gateway), notifier, metadata, clock, api_config)
        .with_store_health(backends.health.clone());
    let app = create_router(state);

    tracing::info!(%addr, "Starting VIDSCRIBE API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
    })
    .await
    .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)));

    // In-flight jobs finish their current attempt; anything left is
    // redelivered by another instance once its lease expires.
    let _ = shutdown_tx.send(true);
    let snapshot = workers.join().await;
    tracing::info!(
        processed = snapshot.processed,
        completed = snapshot.completed,
        failed = snapshot.failed,
        "Worker pool stopped"
    );
    if let Err(e) = reaper.await {
        tracing::warn!(error = %e, "lease reaper task ended abnormally");
    }

    served
}

async fn build_backends(
    api_config: &ApiConfig,
    worker_config: &WorkerConfig,
    clock: &Arc<dyn Clock>,
) -> ApiResult<Backends> {
    match api_config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is not shared between instances");
            Ok(Backends {
                limiter: Arc::new(InMemoryRateLimiter::with_clock(
                    api_config.limiter_policy.clone(),
                    Arc::clone(clock),
                )),
                cache: Arc::new(InMemoryResultCache::with_clock(Arc::clone(clock))),
                queue: Arc::new(InMemoryJobQueue::with_clock(
                    worker_config.queue.clone(),
                    Arc::clone(clock),
                )),
                health: StoreHealth::InProcess,
            })
        }
        StorageBackend::Postgres => {
            let db_config = DbConfig::from_env();
            let pool = db_config.create_pool().map_err(|e| {
                ApiError::service_unavailable(format!("Failed to create database pool: {}", e))
            })?;
            migrate(&pool).await.map_err(|e| {
                ApiError::service_unavailable(format!("Failed to migrate database: {}", e))
            })?;
            tracing::info!(host = %db_config.host, dbname = %db_config.dbname, "Using PostgreSQL storage");
            Ok(Backends {
                limiter: Arc::new(PgRateLimiter::new(
                    pool.clone(),
                    api_config.limiter_policy.clone(),
                )),
                cache: Arc::new(PgResultCache::new(pool.clone())),
                queue: Arc::new(PgJobQueue::new(pool.clone(), worker_config.queue.clone())),
                health: StoreHealth::Postgres(pool),
            })
        }
    }
}
