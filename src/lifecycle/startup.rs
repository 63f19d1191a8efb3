//! Startup orchestration.
//!
//! # Responsibilities
//! - Build storage adapters for the configured backend
//! - Assemble the route store, upstream client and application state
//! - Start the metrics exporter when enabled
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ProxyConfig, RouteStoreConfig, StoreBackend};
use crate::error::StoreError;
use crate::http::AppState;
use crate::kv::file::FileDurableStore;
use crate::kv::memory::{MemoryDurableStore, MemoryEdgeCache};
use crate::kv::DurableStore;
use crate::media::HttpFetcher;
use crate::observability::metrics;
use crate::routing::{RouteCache, RouteStore};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("route store: {0}")]
    Store(#[from] StoreError),

    #[error("upstream client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("file backend requires route_store.data_dir")]
    MissingDataDir,

    #[error("invalid metrics address {0}")]
    MetricsAddress(String),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Durable tier for the configured backend.
pub async fn durable_store(settings: &RouteStoreConfig) -> Result<Arc<dyn DurableStore>, StartupError> {
    match settings.backend {
        StoreBackend::Memory => {
            tracing::warn!("Route store uses the in-memory backend; published routes are lost on restart");
            Ok(Arc::new(MemoryDurableStore::new()))
        }
        StoreBackend::File => {
            let dir = settings.data_dir.as_ref().ok_or(StartupError::MissingDataDir)?;
            let store = FileDurableStore::open(dir).await?;
            tracing::info!(data_dir = ?dir, "Route store opened");
            Ok(Arc::new(store))
        }
    }
}

/// Wire every subsystem behind the live configuration.
pub async fn build_state(live: Arc<ArcSwap<ProxyConfig>>) -> Result<AppState, StartupError> {
    let config = live.load_full();

    let durable = durable_store(&config.route_store).await?;
    let routes = RouteStore::new(
        durable,
        Arc::new(MemoryEdgeCache::new()),
        RouteCache::new(),
        &config.route_store,
    );
    let http = HttpFetcher::new()?;

    Ok(AppState::new(live, routes, http))
}

/// Install the Prometheus exporter when metrics are enabled.
pub fn start_metrics(config: &ProxyConfig) -> Result<(), StartupError> {
    if !config.observability.metrics_enabled {
        return Ok(());
    }
    let addr: SocketAddr = config
        .observability
        .metrics_address
        .parse()
        .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
    metrics::init_metrics(addr)?;
    Ok(())
}
