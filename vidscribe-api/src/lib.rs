//! VIDSCRIBE API - HTTP Layer, Worker Pool and Background Jobs
//!
//! Expensive transcript extractions are admitted through a per-identity
//! rate limiter, answered from the result cache when possible, and
//! otherwise enqueued for the worker pool. Clients poll the job or follow
//! its server-sent event stream. Cheap metadata lookups are served inline.
//!
//! The limiter, cache and queue come from `vidscribe-storage`; this crate
//! wires them to axum routes, the upstream HTTP clients and the background
//! tasks (worker pool, lease reaper).

#[macro_use]
pub mod macros;

pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod middleware;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod upstream;
pub mod video;

pub use config::{ApiConfig, EnvLookup, ProcessEnv, StorageBackend, UpstreamConfig, WorkerConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{
    lease_reaper_task, JobNotifier, LeaseReaperConfig, ReaperTargets, WorkerPool,
    WorkerPoolHandle,
};
pub use middleware::ClientIdentity;
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use services::{InlineFetch, ResourceGateway, Submission};
pub use state::AppState;
pub use upstream::{HttpUpstream, MetadataClient, TranscriptClient};
pub use video::{parse_video_id, require_video_id};
