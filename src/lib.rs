//! dcswitch - multi-cluster datacenter activation controller.
//!
//! Many geographically distributed compute clusters each expose a REST
//! control plane that can mark nodes as drained or eligible. At any moment
//! exactly one region should carry production traffic; dcswitch lets an
//! operator switch the active datacenter or region with one HTTP request
//! while guaranteeing that a single instance ever believes it is
//! authoritative.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        dcswitch                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  API Layer: datacenter / region / status endpoints          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Activation Engine: fan-out | cache invalidation | re-eval  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Cluster Repository: health probes | direct-node fallback   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Coordination: active record | heartbeats | fencing         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use dcswitch::config::Config;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> dcswitch::Result<()> {
//!     let config = Config::from_file(Path::new("config.yaml"))?;
//!     dcswitch::run(config).await
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod coordination;
pub mod error;
pub mod executor;
pub mod healthcheck;
pub mod observability;
pub mod repository;
pub mod service;
pub mod shutdown;
pub mod tls;
pub mod types;

// Re-exports
pub use error::{Result, SwitchError};

use api::ApiState;
use cache::NodeCache;
use config::Config;
use coordination::{CoordinationStore, EtcdStore};
use healthcheck::HealthChecker;
use repository::{ClusterOps, NomadRepository};
use service::SwitchService;
use shutdown::{ShutdownCoordinator, SignalHandler};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Run the controller with the given configuration.
pub async fn run(config: Config) -> Result<()> {
    observability::init_logging(&config.log)?;
    info!(clusters = config.clusters.len(), "starting dcswitch");

    let metrics_handle = match observability::install_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "metrics recorder unavailable");
            None
        }
    };

    let cache = NodeCache::new(config.cache.ttl);

    let repo = Arc::new(NomadRepository::connect(&config).await?);
    observability::record_cluster_count(repo.cluster_names().len());
    info!(clusters = repo.cluster_names().len(), "cluster repository initialized");

    let store: Option<Arc<dyn CoordinationStore>> = match &config.etcd {
        Some(etcd_cfg) => {
            let store = EtcdStore::connect(etcd_cfg).await?;
            info!("coordination store initialized");
            Some(Arc::new(store))
        }
        None => None,
    };

    let service = Arc::new(SwitchService::new(
        repo.clone(),
        store.clone(),
        cache,
        config.my_datacenter.clone(),
        config.heartbeat.clone(),
    ));

    // Startup strategy: coordinated deployments reconcile against the
    // active-datacenter record, uncoordinated ones run the best-effort
    // single-active sweep.
    if config.is_coordinated() {
        if let Err(err) = service.startup_reconciliation().await {
            // Keep serving read APIs; the instance has already fenced.
            error!(error = %err, "startup reconciliation failed");
        }
    } else if let Err(err) = service.ensure_single_active().await {
        error!(error = %err, "startup single-active sweep failed");
    }

    let coordinator = ShutdownCoordinator::new();
    let mut background = Vec::new();

    if config.is_coordinated() {
        let svc = service.clone();
        let rx = coordinator.subscribe();
        background.push(tokio::spawn(async move {
            svc.run_heartbeat_loop(rx).await;
        }));
    }

    if config.skip_unhealthy_clusters {
        let repo = repo.clone();
        let mut rx = coordinator.subscribe();
        let retry_interval = config.cluster_retry_interval;
        background.push(tokio::spawn(async move {
            info!(interval_ms = retry_interval.as_millis() as u64, "starting cluster retry checker");
            let mut ticker = tokio::time::interval(retry_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = rx.recv() => {
                        info!("stopping cluster retry checker");
                        return;
                    }
                    _ = ticker.tick() => {
                        let added = repo.retry_unavailable().await;
                        if added > 0 {
                            observability::record_cluster_count(repo.cluster_names().len());
                        }
                    }
                }
            }
        }));
    }

    if config.health_check.enabled {
        let checker = HealthChecker::new(config.health_check.clone(), service.clone());
        service.set_health_checker(checker.clone());
        background.push(tokio::spawn(checker.run(coordinator.subscribe())));
    }

    tokio::spawn(SignalHandler::new(coordinator.clone()).run());

    let state = ApiState {
        service: service.clone(),
        metrics: metrics_handle,
    };
    let app = api::router(state, &config.server.base_path);

    let listener = TcpListener::bind(&config.server.addr).await?;
    info!(addr = %config.server.addr, "http server listening");

    let drain = coordinator.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { drain.wait().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            // The server ended on its own; propagate its error.
            coordinator.shutdown();
            result
                .map_err(|e| SwitchError::Internal(format!("server task failed: {}", e)))?
                .map_err(SwitchError::Io)?;
        }
        _ = coordinator.wait() => {
            info!("shutting down, draining in-flight requests");
            match tokio::time::timeout(coordinator.timeout(), &mut server).await {
                Ok(result) => {
                    result
                        .map_err(|e| SwitchError::Internal(format!("server task failed: {}", e)))?
                        .map_err(SwitchError::Io)?;
                }
                Err(_) => {
                    warn!("drain window elapsed, aborting server");
                    server.abort();
                }
            }
        }
    }

    for task in background {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), task).await;
    }

    if let Some(store) = store {
        store.close().await?;
    }

    info!("shutdown complete");
    Ok(())
}
