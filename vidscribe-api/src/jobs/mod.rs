//! Background Jobs for VIDSCRIBE API
//!
//! - `worker_pool`: drains the job queue and calls the upstream
//! - `lease_reaper`: fails jobs whose leases ran out and purges old rows
//! - `notifier`: broadcast of job transitions and worker wake-ups
//!
//! # Usage
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let workers = pool.spawn(shutdown_rx.clone());
//! let reaper = tokio::spawn(lease_reaper_task(targets, reaper_config, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! workers.join().await;
//! ```

pub mod lease_reaper;
pub mod notifier;
pub mod worker_pool;

pub use lease_reaper::{
    lease_reaper_task, LeaseReaperConfig, LeaseReaperMetrics, LeaseReaperSnapshot, ReaperTargets,
};
pub use notifier::JobNotifier;
pub use worker_pool::{WorkerPool, WorkerPoolHandle, WorkerPoolMetrics, WorkerPoolSnapshot};
