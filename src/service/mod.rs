//! Datacenter switching service.
//!
//! [`SwitchService`] ties the cluster repository, the node-snapshot cache
//! and the coordination store together. It owns the activation engine
//! (`activation`), the startup reconciliation and heartbeat loop
//! (`reconcile`), and the read-side datacenter and region views.
//!
//! The service depends only on the [`ClusterOps`] and [`CoordinationStore`]
//! traits, so both sides can be replaced by test doubles.

mod activation;
mod reconcile;

use crate::cache::{nodes_key, NodeCache};
use crate::config::HeartbeatConfig;
use crate::coordination::CoordinationStore;
use crate::error::{Result, SwitchError};
use crate::executor::parallel_map;
use crate::observability;
use crate::repository::ClusterOps;
use crate::types::{
    Datacenter, Job, JobActionResult, Node, Region, ServiceStatus,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Receiver of active-region change notifications (the health watchdog).
pub trait ActiveRegionSink: Send + Sync {
    fn set_active_region(&self, region: &str);
}

/// Core controller service.
pub struct SwitchService {
    repo: Arc<dyn ClusterOps>,
    store: Option<Arc<dyn CoordinationStore>>,
    cache: NodeCache,
    my_datacenter: String,
    heartbeat_cfg: HeartbeatConfig,
    /// Whether this instance intentionally drained its own nodes.
    am_drained: AtomicBool,
    watchdog: RwLock<Option<Arc<dyn ActiveRegionSink>>>,
}

impl SwitchService {
    pub fn new(
        repo: Arc<dyn ClusterOps>,
        store: Option<Arc<dyn CoordinationStore>>,
        cache: NodeCache,
        my_datacenter: impl Into<String>,
        heartbeat_cfg: HeartbeatConfig,
    ) -> Self {
        Self {
            repo,
            store,
            cache,
            my_datacenter: my_datacenter.into(),
            heartbeat_cfg,
            am_drained: AtomicBool::new(false),
            watchdog: RwLock::new(None),
        }
    }

    /// Register the health watchdog for region-change notifications.
    pub fn set_health_checker(&self, sink: Arc<dyn ActiveRegionSink>) {
        *self.watchdog.write() = Some(sink);
    }

    pub fn am_drained(&self) -> bool {
        self.am_drained.load(Ordering::SeqCst)
    }

    fn set_am_drained(&self, drained: bool) {
        self.am_drained.store(drained, Ordering::SeqCst);
        observability::record_am_drained(drained);
    }

    fn notify_active_region(&self, region: &str) {
        if let Some(sink) = self.watchdog.read().as_ref() {
            sink.set_active_region(region);
        }
    }

    /// Node snapshot for a datacenter, served from cache within the TTL.
    pub async fn get_nodes(&self, dc: &str) -> Result<Vec<Node>> {
        let key = nodes_key(dc);
        if let Some(nodes) = self.cache.get(&key) {
            return Ok(nodes);
        }

        let nodes = self.repo.list_nodes(dc).await?;
        self.cache
            .put(key, nodes.clone(), self.cache.default_ttl());
        Ok(nodes)
    }

    /// Datacenter view with node counts and best-effort job statistics.
    async fn datacenter_info(&self, name: &str) -> Result<Datacenter> {
        let nodes = self.get_nodes(name).await?;
        let region = self
            .repo
            .cluster_region(name)
            .unwrap_or_else(|_| "unknown".to_string());

        let mut dc = Datacenter::from_nodes(name, region, &nodes);

        match self.repo.list_jobs(name).await {
            Ok(jobs) => {
                dc.jobs_total = jobs.len();
                dc.jobs_running = jobs.iter().filter(|j| j.status == "running").count();
                dc.jobs_stopped = jobs.iter().filter(|j| j.status == "dead").count();
            }
            Err(err) => {
                warn!(datacenter = name, error = %err, "failed to get jobs for datacenter");
            }
        }

        Ok(dc)
    }

    /// All datacenter views. A failing cluster yields an `error`-status
    /// entry instead of failing the listing.
    pub async fn list_datacenters(&self) -> Vec<Datacenter> {
        let names = self.repo.cluster_names();
        let results = parallel_map(names.clone(), |name| async move {
            self.datacenter_info(&name).await
        })
        .await;

        results
            .into_iter()
            .map(|r| {
                let name = &names[r.index];
                match r.result {
                    Ok(dc) => dc,
                    Err(err) => {
                        error!(datacenter = %name, error = %err, "failed to get datacenter info");
                        let region = self
                            .repo
                            .cluster_region(name)
                            .unwrap_or_else(|_| "unknown".to_string());
                        Datacenter::unreachable(name.clone(), region)
                    }
                }
            })
            .collect()
    }

    /// Region view including all member datacenters.
    pub async fn region_info(&self, region: &str) -> Result<Region> {
        let members = self.repo.clusters_in_region(region);
        if members.is_empty() {
            return Err(SwitchError::NotFound(format!(
                "region {} not found or has no datacenters",
                region
            )));
        }

        let results = parallel_map(members.clone(), |name| async move {
            self.datacenter_info(&name).await
        })
        .await;

        let datacenters = results
            .into_iter()
            .map(|r| {
                let name = &members[r.index];
                match r.result {
                    Ok(dc) => dc,
                    Err(err) => {
                        error!(
                            datacenter = %name,
                            region,
                            error = %err,
                            "failed to get datacenter info"
                        );
                        Datacenter::unreachable(name.clone(), region.to_string())
                    }
                }
            })
            .collect();

        Ok(Region::from_datacenters(region, datacenters))
    }

    /// All region views.
    pub async fn list_regions(&self) -> Vec<Region> {
        let regions = self.repo.all_regions();
        let results = parallel_map(regions.clone(), |name| async move {
            self.region_info(&name).await
        })
        .await;

        results
            .into_iter()
            .filter_map(|r| match r.result {
                Ok(region) => Some(region),
                Err(err) => {
                    error!(region = %regions[r.index], error = %err, "failed to get region info");
                    None
                }
            })
            .collect()
    }

    /// Datacenter views of a single region.
    pub async fn datacenters_by_region(&self, region: &str) -> Result<Vec<Datacenter>> {
        Ok(self.region_info(region).await?.datacenters)
    }

    /// Whether a cluster has an elected leader.
    pub async fn check_cluster_leader(&self, cluster: &str) -> Result<bool> {
        self.repo.check_leader(cluster).await
    }

    /// Jobs of a datacenter.
    pub async fn get_jobs(&self, dc: &str) -> Result<Vec<Job>> {
        self.repo.list_jobs(dc).await
    }

    /// Start a stopped job.
    pub async fn start_job(&self, dc: &str, job_id: &str) -> Result<JobActionResult> {
        info!(datacenter = dc, job_id, "starting job");
        let mut result = JobActionResult {
            job_id: job_id.to_string(),
            action: "start".to_string(),
            success: false,
            errors: Vec::new(),
        };

        match self.repo.start_job(dc, job_id).await {
            Ok(()) => {
                result.success = true;
                Ok(result)
            }
            Err(err) => {
                error!(datacenter = dc, job_id, error = %err, "failed to start job");
                result.errors.push(format!("failed to start job {}: {}", job_id, err));
                Ok(result)
            }
        }
    }

    /// Stop a running job.
    pub async fn stop_job(&self, dc: &str, job_id: &str) -> Result<JobActionResult> {
        info!(datacenter = dc, job_id, "stopping job");
        let mut result = JobActionResult {
            job_id: job_id.to_string(),
            action: "stop".to_string(),
            success: false,
            errors: Vec::new(),
        };

        match self.repo.stop_job(dc, job_id).await {
            Ok(()) => {
                result.success = true;
                Ok(result)
            }
            Err(err) => {
                error!(datacenter = dc, job_id, error = %err, "failed to stop job");
                result.errors.push(format!("failed to stop job {}: {}", job_id, err));
                Ok(result)
            }
        }
    }

    /// Controller status for `GET /api/status`.
    pub async fn get_status(&self) -> ServiceStatus {
        let mut status = ServiceStatus {
            my_datacenter: self.my_datacenter.clone(),
            am_drained: self.am_drained(),
            etcd_connected: false,
            active_datacenter: String::new(),
            heartbeat_age: 0,
            last_heartbeat: None,
            activated_at: None,
            activated_by: String::new(),
            heartbeat_interval: self.heartbeat_cfg.update_interval.as_millis() as u64,
            stale_threshold: self.heartbeat_cfg.stale_threshold.as_millis() as u64,
        };

        let Some(store) = &self.store else {
            return status;
        };

        match store.read_active().await {
            Ok(info) => {
                status.etcd_connected = true;
                status.heartbeat_age = info.heartbeat_age().as_millis() as u64;
                status.last_heartbeat = Some(info.last_heartbeat);
                status.activated_at = Some(info.activated_at);
                status.activated_by = info.activated_by;
                status.active_datacenter = info.datacenter;
            }
            Err(SwitchError::NotFound(_)) => {
                // Reachable store, no record yet.
                status.etcd_connected = true;
            }
            Err(err) => {
                warn!(error = %err, "failed to read active datacenter for status");
            }
        }

        status
    }
}
