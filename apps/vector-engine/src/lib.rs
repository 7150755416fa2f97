//! Vector Engine host process
//!
//! Wires the vector operations engine to Qdrant and (optionally) Redis, keeps
//! the connection pools maintained and reports their state until shutdown.
//!
//! ## Architecture
//!
//! ```text
//! Environment (VECTOR_*, QDRANT_*, REDIS_URL)
//!   ↓
//! Config ──► VectorService
//!              ├─ PoolRegistry ──► QdrantConnectionFactory ──► Qdrant
//!              └─ CacheLayer   ──► RedisCacheStore | MemoryCacheStore
//!   ↓
//! maintenance task (idle reaper + health prober)
//! status task (pool/cache stats as structured logs)
//! Prometheus scrape endpoint
//! ```
//!
//! The process exposes no request protocol of its own; embedders call
//! [`domain_vector::VectorService`] directly.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use core_config::FromEnv;
use domain_vector::{
    CacheStore, MemoryCacheStore, QdrantConnectionFactory, RedisCacheStore, VectorService,
};
use eyre::{Result, WrapErr};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub use config::Config;

/// Connection attempts for the Redis cache store at startup
const REDIS_CONNECT_RETRIES: u32 = 5;

/// Run the engine host
///
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads and validates configuration
/// 3. Installs the Prometheus recorder
/// 4. Builds the service over Qdrant and the configured cache store
/// 5. Runs pool maintenance and status reporting until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if configuration is invalid, the metrics endpoint cannot
/// be bound, or a configured Redis cannot be reached.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let config = Config::from_env().wrap_err("Failed to load configuration")?;
    core_config::tracing::init_tracing(&config.environment);
    info!(environment = ?config.environment, qdrant = %config.qdrant.url, "Starting vector engine");

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .wrap_err_with(|| format!("Failed to start metrics endpoint on {}", metrics_addr))?;
    domain_vector::metrics::describe_metrics();
    info!(addr = %metrics_addr, "Prometheus metrics endpoint listening");

    let store = cache_store(&config).await?;
    let factory = Arc::new(QdrantConnectionFactory::new(config.qdrant.clone()));
    let service = Arc::new(VectorService::new(
        config.qdrant.url.clone(),
        config.engine.clone(),
        factory,
        store,
    ));

    warm_pools(&service, &config.warm_collections).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = service.spawn_maintenance(shutdown_rx.clone());
    let status = tokio::spawn(report_status(
        Arc::clone(&service),
        config.status_interval,
        shutdown_rx,
    ));
    info!("Vector engine running");

    if let Err(e) = shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    let _ = shutdown_tx.send(true);

    if let Err(e) = maintenance.await {
        warn!(error = %e, "Maintenance task ended abnormally");
    }
    if let Err(e) = status.await {
        warn!(error = %e, "Status task ended abnormally");
    }

    info!(cache = ?service.cache_stats(), "Vector engine stopped");
    Ok(())
}

/// Redis when `REDIS_URL` is set, otherwise the in-process store.
async fn cache_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    if !config.engine.cache.enabled {
        info!("Result cache disabled");
        return Ok(Arc::new(MemoryCacheStore::new()));
    }

    match &config.engine.cache.redis_url {
        Some(url) => {
            info!("Connecting cache to Redis...");
            let store = RedisCacheStore::connect_with_retry(url, REDIS_CONNECT_RETRIES)
                .await
                .wrap_err("Failed to connect to Redis")?;
            Ok(Arc::new(store))
        }
        None => {
            info!("REDIS_URL not set, using in-process cache");
            Ok(Arc::new(MemoryCacheStore::new()))
        }
    }
}

/// Open `min_connections` per listed collection so first requests skip the
/// connect cost. Failures are logged; the reaper retries the refill.
async fn warm_pools(service: &VectorService, collections: &[String]) {
    let min = service.pool().config().min_connections;
    for collection in collections {
        match service.scale_pool(collection, min).await {
            Ok(stats) => info!(collection = %collection, idle = stats.idle, "Warmed connection pool"),
            Err(e) => warn!(collection = %collection, error = %e, "Failed to warm connection pool"),
        }
    }
}

async fn report_status(
    service: Arc<VectorService>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                for pool in service.pool_statuses() {
                    info!(
                        target = %pool.target,
                        idle = pool.idle,
                        active = pool.active,
                        pending = pool.pending,
                        requests = pool.total_requests,
                        failed = pool.failed_requests,
                        "Pool status"
                    );
                }
                let cache = service.cache_stats();
                info!(
                    enabled = cache.enabled,
                    hits = cache.hits,
                    misses = cache.misses,
                    hit_rate = cache.hit_rate,
                    errors = cache.errors,
                    evictions = cache.evictions,
                    "Cache status"
                );
            }
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
