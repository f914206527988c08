//! Application state - shared across all handlers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use sluice_core::ports::CounterStore;
use sluice_core::{HeaderIdentity, ThrottleEngine};
use sluice_infra::InMemoryCounterStore;
use sluice_shared::dto::WidgetResponse;

#[cfg(feature = "redis")]
use sluice_infra::RedisCounterStore;

use crate::config::AppConfig;
use crate::handlers;
use crate::throttle::Throttle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub throttle: Arc<Throttle>,
    pub widgets: Arc<WidgetRepository>,
    /// Set when counters live in this process and need periodic purging.
    pub memory_store: Option<Arc<InMemoryCounterStore>>,
}

/// In-memory widget storage for the demo routes.
#[derive(Default)]
pub struct WidgetRepository {
    widgets: RwLock<BTreeMap<u64, WidgetResponse>>,
    next_id: AtomicU64,
}

impl WidgetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<WidgetResponse> {
        self.widgets.read().await.values().cloned().collect()
    }

    pub async fn create(&self, name: String) -> WidgetResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let widget = WidgetResponse { id, name };
        self.widgets.write().await.insert(id, widget.clone());
        widget
    }

    pub async fn find(&self, id: u64) -> Option<WidgetResponse> {
        self.widgets.read().await.get(&id).cloned()
    }
}

impl AppState {
    /// Build the application state. Fails on an invalid route quota, or when
    /// Redis is required but unreachable.
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let (store, memory_store) = build_store(config).await?;

        let mut engine = ThrottleEngine::new(store)
            .with_headers(config.throttle.headers.clone())
            .with_options(config.throttle.options.clone());

        if let Some(header) = &config.throttle.identity_header {
            tracing::info!(header = %header, "Identifying callers by request header");
            engine = engine.with_identity(Arc::new(HeaderIdentity::new(header.clone())));
        }

        let routes = handlers::throttled_routes(&config.widgets)?;
        let throttle = Arc::new(Throttle::new(engine, routes));

        tracing::info!(
            routes = throttle.routes.len(),
            coast_expiry = config.throttle.options.coast_expiry,
            denial_status = config.throttle.options.denial_status.code(),
            "Application state initialized"
        );

        Ok(Self {
            throttle,
            widgets: Arc::new(WidgetRepository::new()),
            memory_store,
        })
    }
}

type Stores = (Arc<dyn CounterStore>, Option<Arc<InMemoryCounterStore>>);

fn memory_store() -> Stores {
    let memory = Arc::new(InMemoryCounterStore::new());
    (memory.clone(), Some(memory))
}

#[cfg(feature = "redis")]
async fn build_store(config: &AppConfig) -> anyhow::Result<Stores> {
    let Some(redis) = &config.redis else {
        tracing::warn!("REDIS_URL not set. Counting requests in memory (per instance).");
        return Ok(memory_store());
    };

    match RedisCounterStore::new(redis.clone()).await {
        Ok(store) => Ok((Arc::new(store), None)),
        Err(e) if redis.fallback_to_memory => {
            tracing::error!(
                "Failed to connect to Redis: {}. Using in-memory fallback.",
                e
            );
            Ok(memory_store())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_store(_config: &AppConfig) -> anyhow::Result<Stores> {
    tracing::info!("Running without redis feature - counting requests in memory");
    Ok(memory_store())
}
