//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;
use vidscribe_core::{Clock, UpstreamFetcher};
use vidscribe_storage::{JobQueue, StoreHealth};

use crate::config::ApiConfig;
use crate::jobs::JobNotifier;
use crate::services::ResourceGateway;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Admission, caching and enqueueing for expensive requests.
    pub gateway: Arc<ResourceGateway>,
    pub queue: Arc<dyn JobQueue>,
    /// Job transition broadcast used by the SSE endpoint.
    pub notifier: JobNotifier,
    /// Short upstream lookups served inline.
    pub metadata: Arc<dyn UpstreamFetcher>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ApiConfig>,
    /// Checked by `/health/ready`.
    pub store: StoreHealth,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        gateway: Arc<ResourceGateway>,
        notifier: JobNotifier,
        metadata: Arc<dyn UpstreamFetcher>,
        clock: Arc<dyn Clock>,
        config: ApiConfig,
    ) -> Self {
        Self {
            queue: Arc::clone(gateway.queue()),
            gateway,
            notifier,
            metadata,
            clock,
            config: Arc::new(config),
            store: StoreHealth::InProcess,
            start_time: Instant::now(),
        }
    }

    /// Report readiness from `store` instead of assuming process-local state.
    pub fn with_store_health(mut self, store: StoreHealth) -> Self {
        self.store = store;
        self
    }
}

crate::impl_from_ref!(Arc<ResourceGateway>, gateway);
crate::impl_from_ref!(Arc<dyn JobQueue>, queue);
crate::impl_from_ref!(JobNotifier, notifier);
crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(StoreHealth, store);
crate::impl_from_ref!(Instant, start_time);
