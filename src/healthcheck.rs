//! Active-region health watchdog.
//!
//! Polls the leader of the currently active region and drains the region
//! after a configured number of consecutive failures. An activation through
//! the engine (or one observed externally through the region views) resets
//! the failure counters.
//!
//! The leader probe targets the first datacenter of the region; the
//! supported topology has all clusters of a region sharing one control
//! plane.

use crate::config::HealthCheckConfig;
use crate::error::Result;
use crate::observability;
use crate::service::{ActiveRegionSink, SwitchService};
use crate::types::RegionStatus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Delay before the first probe after startup.
const INITIAL_CHECK_DELAY: Duration = Duration::from_secs(5);

struct WatchState {
    active_region: String,
    /// region -> consecutive failure count
    failures: HashMap<String, u32>,
}

/// Periodic health checker for the active region.
pub struct HealthChecker {
    config: HealthCheckConfig,
    service: Arc<SwitchService>,
    state: Mutex<WatchState>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, service: Arc<SwitchService>) -> Arc<Self> {
        Arc::new(Self {
            config,
            service,
            state: Mutex::new(WatchState {
                active_region: String::new(),
                failures: HashMap::new(),
            }),
        })
    }

    /// Run the watchdog loop until the shutdown receiver fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("health check is disabled");
            return;
        }

        match self.detect_active_region().await {
            Some(region) => {
                info!(region = %region, "initial active region detected");
                self.state.lock().active_region = region;
            }
            None => info!("no active region at startup"),
        }

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            failed_threshold = self.config.failed_threshold,
            "starting health checker"
        );

        tokio::select! {
            _ = tokio::time::sleep(INITIAL_CHECK_DELAY) => {}
            _ = shutdown.recv() => return,
        }
        self.perform_check().await;

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("health checker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.perform_check().await;
                }
            }
        }
    }

    /// One probe cycle. Extracted so tests can drive it directly.
    pub async fn perform_check(&self) {
        // Sync with the actual state first: an external activation moves
        // the watchdog to the new region and clears the counters.
        if let Some(real_active) = self.detect_active_region().await {
            let mut state = self.state.lock();
            if state.active_region != real_active {
                info!(
                    old_region = %state.active_region,
                    new_region = %real_active,
                    "active region changed externally, syncing health check"
                );
                state.active_region = real_active;
                state.failures.clear();
            }
        }

        let region = self.state.lock().active_region.clone();
        if region.is_empty() {
            return;
        }

        match self.check_region_leader(&region).await {
            Ok(true) => {
                let previous = {
                    let mut state = self.state.lock();
                    state.failures.insert(region.clone(), 0).unwrap_or(0)
                };
                if previous > 0 {
                    info!(region = %region, previous_failures = previous, "region health restored");
                }
            }
            Ok(false) => {
                warn!(region = %region, "region has no leader");
                self.handle_failure(&region).await;
            }
            Err(err) => {
                warn!(region = %region, error = %err, "health check failed");
                self.handle_failure(&region).await;
            }
        }
    }

    /// Current failure count for a region (for the status surface).
    pub fn failures(&self, region: &str) -> u32 {
        self.state.lock().failures.get(region).copied().unwrap_or(0)
    }

    async fn detect_active_region(&self) -> Option<String> {
        let regions = self.service.list_regions().await;
        regions
            .into_iter()
            .find(|r| matches!(r.status, RegionStatus::Active | RegionStatus::Partial))
            .map(|r| r.name)
    }

    /// Probe the leader of the region's first datacenter.
    async fn check_region_leader(&self, region: &str) -> Result<bool> {
        let info = self.service.region_info(region).await?;
        let Some(first) = info.datacenters.first() else {
            warn!(region, "region has no datacenters");
            return Ok(false);
        };
        self.service.check_cluster_leader(&first.name).await
    }

    async fn handle_failure(&self, region: &str) {
        let failures = {
            let mut state = self.state.lock();
            let counter = state.failures.entry(region.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        warn!(
            region,
            consecutive_failures = failures,
            threshold = self.config.failed_threshold,
            "region health check failure"
        );

        if failures < self.config.failed_threshold {
            return;
        }

        error!(region, failures, "health check threshold reached, draining region");
        match self.service.drain_all_in_region(region).await {
            Ok(()) => {
                info!(region, "drained unhealthy region");
                observability::record_watchdog_drain();
                self.state.lock().failures.insert(region.to_string(), 0);
            }
            Err(err) => {
                error!(region, error = %err, "failed to drain unhealthy region");
            }
        }
    }
}

impl ActiveRegionSink for HealthChecker {
    /// Called by the activation engine when a new target goes active.
    fn set_active_region(&self, region: &str) {
        let mut state = self.state.lock();
        let old = std::mem::replace(&mut state.active_region, region.to_string());
        state.failures.clear();
        if old != region {
            info!(old_region = %old, new_region = %region, "active region changed");
        }
    }
}
