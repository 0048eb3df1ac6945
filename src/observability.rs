//! Logging and metrics setup.
//!
//! Structured logging through `tracing` with an optional JSON layer, and a
//! Prometheus recorder whose rendered output is exposed at `GET /metrics`
//! on the API router.

use crate::config::LogConfig;
use crate::error::{Result, SwitchError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
///
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| SwitchError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| SwitchError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Logging initialized");
    Ok(())
}

/// Install the Prometheus metrics recorder and pre-register the
/// controller's metrics.
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SwitchError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();
    Ok(handle)
}

fn register_metrics() {
    counter!("dcswitch_activations_total").absolute(0);
    counter!("dcswitch_nodes_drained_total").absolute(0);
    counter!("dcswitch_nodes_undrained_total").absolute(0);
    counter!("dcswitch_activation_errors_total").absolute(0);
    counter!("dcswitch_heartbeat_failures_total").absolute(0);
    counter!("dcswitch_watchdog_drains_total").absolute(0);
    gauge!("dcswitch_clusters_total").set(0.0);
    gauge!("dcswitch_am_drained").set(0.0);
}

/// Record an activation outcome.
pub fn record_activation(drained: usize, undrained: usize, errors: usize) {
    counter!("dcswitch_activations_total").increment(1);
    counter!("dcswitch_nodes_drained_total").increment(drained as u64);
    counter!("dcswitch_nodes_undrained_total").increment(undrained as u64);
    counter!("dcswitch_activation_errors_total").increment(errors as u64);
}

/// Record a heartbeat write failure.
pub fn record_heartbeat_failure() {
    counter!("dcswitch_heartbeat_failures_total").increment(1);
}

/// Record a watchdog-initiated region drain.
pub fn record_watchdog_drain() {
    counter!("dcswitch_watchdog_drains_total").increment(1);
}

/// Record the local drained state.
pub fn record_am_drained(drained: bool) {
    gauge!("dcswitch_am_drained").set(if drained { 1.0 } else { 0.0 });
}

/// Record the number of admitted clusters.
pub fn record_cluster_count(count: usize) {
    gauge!("dcswitch_clusters_total").set(count as f64);
}
