//! Startup reconciliation and the heartbeat loop.
//!
//! Runs only in deployments configured with a coordination store and a
//! local datacenter name. At startup the instance reconciles its nodes
//! against the active-datacenter record; afterwards the heartbeat loop
//! keeps the record fresh and fences the instance (self-drain) when quorum
//! is lost or a foreign activation is observed.

use super::SwitchService;
use crate::error::{Result, SwitchError};
use crate::observability;
use crate::types::ActiveDatacenter;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

impl SwitchService {
    /// Reconcile local node state against the active-datacenter record.
    ///
    /// Every branch except "a fresh peer heartbeat exists" resolves by
    /// draining the local datacenter and reporting drained. A fresh
    /// heartbeat under this instance's own name means another instance is
    /// presumed alive: the nodes are drained and a hard error is returned,
    /// but the caller keeps serving read APIs.
    pub async fn startup_reconciliation(&self) -> Result<()> {
        info!("performing startup reconciliation");

        let store = self.store.as_ref().ok_or_else(|| {
            SwitchError::Internal("reconciliation requires a coordination store".to_string())
        })?;

        let record = match store.read_active().await {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "no active datacenter record, draining my nodes for safety");
                self.drain_my_nodes().await?;
                self.set_am_drained(true);
                return Ok(());
            }
        };

        info!(
            datacenter = %record.datacenter,
            activated_at = %record.activated_at,
            heartbeat_age_ms = record.heartbeat_age().as_millis() as u64,
            "found active datacenter record"
        );

        if record.datacenter != self.my_datacenter {
            info!(
                active_dc = %record.datacenter,
                "another datacenter is active, ensuring my nodes are drained"
            );
            self.drain_my_nodes().await?;
            self.set_am_drained(true);
            return Ok(());
        }

        if record.is_stale(self.heartbeat_cfg.stale_threshold) {
            // The previous owner died; node cleanup is still needed.
            warn!(
                heartbeat_age_ms = record.heartbeat_age().as_millis() as u64,
                stale_threshold_ms = self.heartbeat_cfg.stale_threshold.as_millis() as u64,
                "marked active but heartbeat is stale, staying drained for safety"
            );
            self.drain_my_nodes().await?;
            self.set_am_drained(true);
            return Ok(());
        }

        // Fresh heartbeat under our own name while starting up: a peer
        // instance is presumed alive.
        error!(
            heartbeat_age_ms = record.heartbeat_age().as_millis() as u64,
            "fresh heartbeat exists while starting up, draining nodes for safety"
        );
        self.drain_my_nodes().await?;
        self.set_am_drained(true);
        Err(SwitchError::SplitBrainSuspected(format!(
            "another instance of datacenter {} appears to be running (fresh heartbeat found)",
            self.my_datacenter
        )))
    }

    /// Heartbeat loop: rewrite the active-datacenter record every update
    /// interval and fence on sustained coordination-store failures.
    ///
    /// Terminates when the shutdown receiver fires.
    pub async fn run_heartbeat_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let Some(store) = self.store.clone() else {
            return;
        };

        let mut ticker = tokio::time::interval(self.heartbeat_cfg.update_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; the loop
        // should start one interval after reconciliation.
        ticker.tick().await;

        let mut consecutive_failures: u32 = 0;

        info!(
            interval_ms = self.heartbeat_cfg.update_interval.as_millis() as u64,
            max_failures = self.heartbeat_cfg.max_failures,
            "started heartbeat updater"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("stopping heartbeat updater");
                    return;
                }
                _ = ticker.tick() => {
                    self.heartbeat_tick(store.as_ref(), &mut consecutive_failures).await;
                }
            }
        }
    }

    /// One heartbeat cycle. Extracted so tests can drive it directly.
    pub(crate) async fn heartbeat_tick(
        &self,
        store: &dyn crate::coordination::CoordinationStore,
        consecutive_failures: &mut u32,
    ) {
        let record = match store.read_active().await {
            Ok(record) => record,
            Err(SwitchError::NotFound(_)) => {
                // No record: nothing to keep fresh until an activation
                // creates one.
                *consecutive_failures = 0;
                return;
            }
            Err(err) => {
                *consecutive_failures += 1;
                observability::record_heartbeat_failure();
                warn!(
                    failures = *consecutive_failures,
                    error = %err,
                    "failed to read active datacenter record"
                );
                self.fence_if_needed(*consecutive_failures).await;
                return;
            }
        };

        if record.datacenter != self.my_datacenter {
            if !self.am_drained() {
                info!(
                    active_dc = %record.datacenter,
                    "another datacenter is now active, draining my nodes"
                );
                match self.drain_my_nodes().await {
                    Ok(()) => self.set_am_drained(true),
                    Err(err) => error!(error = %err, "failed to drain nodes"),
                }
            }
            *consecutive_failures = 0;
            return;
        }

        // A fresh heartbeat while we are drained means a peer instance
        // appears alive; do not claim liveness over it.
        if !record.is_stale(self.heartbeat_cfg.stale_threshold) && self.am_drained() {
            error!(
                heartbeat_age_ms = record.heartbeat_age().as_millis() as u64,
                "fresh heartbeat exists but local nodes are drained, skipping write"
            );
            return;
        }

        let updated = ActiveDatacenter {
            last_heartbeat: Utc::now(),
            ..record
        };
        match store.write_active(&updated).await {
            Ok(()) => {
                if *consecutive_failures > 0 {
                    info!(
                        failures = *consecutive_failures,
                        "reconnected to coordination store after failures"
                    );
                }
                *consecutive_failures = 0;
                if self.am_drained() {
                    warn!("writing heartbeats while drained, manual activation via API needed");
                }
            }
            Err(err) => {
                *consecutive_failures += 1;
                observability::record_heartbeat_failure();
                error!(
                    failures = *consecutive_failures,
                    max_failures = self.heartbeat_cfg.max_failures,
                    error = %err,
                    "failed to update heartbeat"
                );
                self.fence_if_needed(*consecutive_failures).await;
            }
        }
    }

    /// Quorum-loss fencing: drain the local datacenter once the failure
    /// counter reaches the configured maximum.
    async fn fence_if_needed(&self, consecutive_failures: u32) {
        if consecutive_failures < self.heartbeat_cfg.max_failures || self.am_drained() {
            return;
        }
        error!(
            failures = consecutive_failures,
            "lost coordination quorum, draining nodes to prevent split-brain"
        );
        match self.drain_my_nodes().await {
            Ok(()) => self.set_am_drained(true),
            Err(err) => {
                error!(error = %err, "failed to drain nodes during coordination failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::config::HeartbeatConfig;
    use crate::error::SwitchError;
    use std::time::Duration;

    fn heartbeat_cfg() -> HeartbeatConfig {
        HeartbeatConfig {
            update_interval: Duration::from_millis(10),
            max_failures: 3,
            stale_threshold: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    async fn test_reconciliation_no_record_drains() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::empty();
        let svc = coordinated_service(repo.clone(), store.clone(), "dc-a", heartbeat_cfg());

        svc.startup_reconciliation().await.unwrap();
        assert!(svc.am_drained());
        assert!(repo.nodes_of("dc-a").iter().all(|n| n.drain));
        // No write to the active key occurred.
        assert_eq!(*store.write_count.lock(), 0);
    }

    #[tokio::test]
    async fn test_reconciliation_foreign_active_drains() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-b", 5);
        let svc = coordinated_service(repo.clone(), store, "dc-a", heartbeat_cfg());

        svc.startup_reconciliation().await.unwrap();
        assert!(svc.am_drained());
        assert!(repo.nodes_of("dc-a").iter().all(|n| n.drain));
    }

    #[tokio::test]
    async fn test_reconciliation_stale_own_record_drains_without_error() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-a", 600);
        let svc = coordinated_service(repo.clone(), store, "dc-a", heartbeat_cfg());

        svc.startup_reconciliation().await.unwrap();
        assert!(svc.am_drained());
    }

    #[tokio::test]
    async fn test_reconciliation_fresh_own_record_is_split_brain() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-a", 5);
        let svc = coordinated_service(repo.clone(), store.clone(), "dc-a", heartbeat_cfg());

        let err = svc.startup_reconciliation().await.unwrap_err();
        assert!(matches!(err, SwitchError::SplitBrainSuspected(_)));
        assert!(svc.am_drained());
        assert!(repo.nodes_of("dc-a").iter().all(|n| n.drain));
        assert_eq!(*store.write_count.lock(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_rewrites_own_record() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-a", 600);
        let svc = coordinated_service(repo, store.clone(), "dc-a", heartbeat_cfg());

        let mut failures = 0;
        svc.heartbeat_tick(store.as_ref(), &mut failures).await;
        assert_eq!(failures, 0);

        let record = store.active.lock().clone().unwrap();
        assert!(record.heartbeat_age() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_heartbeat_drains_on_foreign_activation() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-b", 5);
        let svc = coordinated_service(repo.clone(), store.clone(), "dc-a", heartbeat_cfg());

        let before = *store.write_count.lock();
        let mut failures = 5;
        svc.heartbeat_tick(store.as_ref(), &mut failures).await;

        assert!(svc.am_drained());
        assert!(repo.nodes_of("dc-a").iter().all(|n| n.drain));
        // Failure counter resets and no write happened.
        assert_eq!(failures, 0);
        assert_eq!(*store.write_count.lock(), before);
    }

    #[tokio::test]
    async fn test_heartbeat_defers_to_fresh_peer_when_drained() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-a", 5);
        let svc = coordinated_service(repo, store.clone(), "dc-a", heartbeat_cfg());
        // Simulate having fenced earlier.
        svc.set_am_drained(true);

        let mut failures = 0;
        svc.heartbeat_tick(store.as_ref(), &mut failures).await;
        assert_eq!(*store.write_count.lock(), 0);
    }

    #[tokio::test]
    async fn test_quorum_loss_fencing_after_max_failures() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-a", 600);
        let svc = coordinated_service(repo.clone(), store.clone(), "dc-a", heartbeat_cfg());

        store.set_unavailable(true);
        let mut failures = 0;
        for _ in 0..3 {
            svc.heartbeat_tick(store.as_ref(), &mut failures).await;
        }

        assert_eq!(failures, 3);
        assert!(svc.am_drained());
        // The store came back mid-fence; draining happened against the
        // cluster API, which stayed reachable.
        store.set_unavailable(false);
        assert!(repo.nodes_of("dc-a").iter().all(|n| n.drain));
    }

    #[tokio::test]
    async fn test_failures_below_threshold_do_not_fence() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-a", 600);
        let svc = coordinated_service(repo.clone(), store.clone(), "dc-a", heartbeat_cfg());

        store.set_unavailable(true);
        let mut failures = 0;
        svc.heartbeat_tick(store.as_ref(), &mut failures).await;
        svc.heartbeat_tick(store.as_ref(), &mut failures).await;

        assert_eq!(failures, 2);
        assert!(!svc.am_drained());
        assert!(repo.nodes_of("dc-a").iter().all(|n| !n.drain));
    }

    #[tokio::test]
    async fn test_successful_write_resets_failures() {
        let repo = FakeClusters::new(&[("dc-a", "us", ready_nodes(2))]);
        let store = FakeStore::with_active("dc-a", 600);
        let svc = coordinated_service(repo, store.clone(), "dc-a", heartbeat_cfg());

        store.set_unavailable(true);
        let mut failures = 0;
        svc.heartbeat_tick(store.as_ref(), &mut failures).await;
        assert_eq!(failures, 1);

        store.set_unavailable(false);
        // The record is stale again relative to the last write attempt, so
        // the loop rewrites it.
        svc.heartbeat_tick(store.as_ref(), &mut failures).await;
        assert_eq!(failures, 0);
    }
}
