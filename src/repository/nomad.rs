//! Production cluster repository speaking the upstream REST control plane.
//!
//! One HTTP client per cluster, built at startup with the cluster's TLS
//! material. Health is probed before a cluster is admitted: the cluster
//! must have an elected leader and a passing agent health report. Unhealthy
//! clusters either fail startup or, under `skip_unhealthy_clusters`, are
//! parked for the background retry task.
//!
//! Drain writes go through the cluster's central update endpoint first and
//! fall back to the node's own agent (`/v1/node/self/drain`) using an
//! address cached from an authoritative enumeration at startup. A stale
//! cached address can only produce a transient error, never a wrong-node
//! write.

use super::wire::{AgentHealth, AgentSelf, DrainRequest, JobStub, JobSummary, NodeDetail, NodeStub};
use super::ClusterOps;
use crate::config::{ClusterConfig, Config};
use crate::error::{Result, SwitchError};
use crate::tls::build_http_client;
use crate::types::{Eligibility, Job, Node};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cached direct-access coordinates for one node.
#[derive(Debug, Clone)]
struct NodeAddr {
    http_addr: String,
    name: String,
}

/// Immutable per-cluster state after admission.
#[derive(Debug)]
struct ClusterHandle {
    name: String,
    region: String,
    base_url: String,
    http: reqwest::Client,
    /// node id -> direct agent address; populated once at startup.
    node_addrs: HashMap<String, NodeAddr>,
}

/// A cluster that failed its startup health probe, awaiting retry.
#[derive(Debug)]
struct PendingCluster {
    index: usize,
    config: ClusterConfig,
    http: reqwest::Client,
}

/// Cluster repository over upstream REST control planes.
#[derive(Debug)]
pub struct NomadRepository {
    clusters: RwLock<HashMap<String, Arc<ClusterHandle>>>,
    pending: Mutex<Vec<PendingCluster>>,
}

impl NomadRepository {
    /// Connect to every configured cluster.
    ///
    /// Fails when a cluster is unhealthy and `skip_unhealthy_clusters` is
    /// off, or when no healthy cluster remains.
    pub async fn connect(config: &Config) -> Result<Self> {
        let repo = Self {
            clusters: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        };

        for (index, cluster_cfg) in config.clusters.iter().enumerate() {
            let http = build_http_client(cluster_cfg.tls.as_ref(), CONNECT_TIMEOUT, REQUEST_TIMEOUT)?;
            let base_url = cluster_cfg.address.trim_end_matches('/').to_string();

            info!(address = %base_url, "checking cluster health");
            if let Err(err) = probe_health(&http, &base_url).await {
                if config.skip_unhealthy_clusters {
                    warn!(address = %base_url, error = %err, "skipping unhealthy cluster");
                    repo.pending.lock().push(PendingCluster {
                        index,
                        config: cluster_cfg.clone(),
                        http,
                    });
                    continue;
                }
                return Err(match err {
                    e @ SwitchError::ClusterUnhealthy { .. } => e,
                    other => SwitchError::ClusterUnhealthy {
                        cluster: base_url,
                        reason: other.to_string(),
                    },
                });
            }

            let handle = admit_cluster(index, cluster_cfg, http, base_url).await;
            repo.insert_handle(handle);
        }

        if repo.clusters.read().is_empty() {
            return Err(SwitchError::Config(
                "no healthy clusters available".to_string(),
            ));
        }

        Ok(repo)
    }

    /// Insert a handle, disambiguating name collisions with `-<region>`.
    fn insert_handle(&self, mut handle: ClusterHandle) {
        let mut clusters = self.clusters.write();
        if clusters.contains_key(&handle.name) {
            let unique = format!("{}-{}", handle.name, handle.region);
            warn!(
                original_name = %handle.name,
                unique_key = %unique,
                "cluster name already exists, using name-region key"
            );
            handle.name = unique;
        }
        info!(
            name = %handle.name,
            region = %handle.region,
            address = %handle.base_url,
            cached_nodes = handle.node_addrs.len(),
            "initialized cluster"
        );
        clusters.insert(handle.name.clone(), Arc::new(handle));
    }

    fn handle(&self, cluster: &str) -> Result<Arc<ClusterHandle>> {
        self.clusters
            .read()
            .get(cluster)
            .cloned()
            .ok_or_else(|| SwitchError::NotFound(format!("cluster {} not found", cluster)))
    }

    /// Direct drain call against the node's own agent.
    async fn set_node_drain_direct(
        &self,
        handle: &ClusterHandle,
        node_id: &str,
        drain: bool,
    ) -> Result<()> {
        let addr = handle
            .node_addrs
            .get(node_id)
            .ok_or_else(|| SwitchError::NotFound(format!("node {} not in address cache", node_id)))?;
        if addr.http_addr.is_empty() {
            return Err(SwitchError::NotFound(format!(
                "node {} has no cached HTTP address",
                node_id
            )));
        }

        let scheme = if handle.base_url.starts_with("https://") {
            "https"
        } else {
            "http"
        };
        let url = format!("{}://{}/v1/node/self/drain", scheme, addr.http_addr);

        let response = handle
            .http
            .post(&url)
            .json(&DrainRequest::new(drain))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SwitchError::Network(format!(
                "direct drain call returned {}: {}",
                status, body
            )));
        }

        info!(
            cluster = %handle.name,
            node_id,
            node_name = %addr.name,
            url = %url,
            "direct node drain request succeeded"
        );
        Ok(())
    }
}

#[async_trait]
impl ClusterOps for NomadRepository {
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>> {
        let handle = self.handle(cluster)?;
        let stubs: Vec<NodeStub> = get_json(&handle.http, &handle.base_url, "/v1/nodes").await?;

        let nodes = stubs.into_iter().map(node_from_stub).collect::<Vec<_>>();
        debug!(cluster, region = %handle.region, count = nodes.len(), "listed nodes");
        Ok(nodes)
    }

    async fn set_node_drain(&self, cluster: &str, node_id: &str, drain: bool) -> Result<()> {
        let handle = self.handle(cluster)?;
        let url = format!("{}/v1/node/{}/drain", handle.base_url, node_id);

        let central = async {
            let response = handle
                .http
                .post(&url)
                .json(&DrainRequest::new(drain))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SwitchError::Network(format!(
                    "drain update returned {}: {}",
                    status, body
                )));
            }
            Ok(())
        };

        match central.await {
            Ok(()) => {
                info!(cluster, node_id, drain, "updated node drain via control plane");
                Ok(())
            }
            Err(central_err) => {
                warn!(
                    cluster,
                    node_id,
                    error = %central_err,
                    "control plane drain failed, attempting direct node fallback"
                );
                match self.set_node_drain_direct(&handle, node_id, drain).await {
                    Ok(()) => Ok(()),
                    Err(fallback_err) => Err(SwitchError::NodeWriteFailed {
                        cluster: cluster.to_string(),
                        node: node_id.to_string(),
                        reason: format!(
                            "control plane: {}; direct: {}",
                            central_err, fallback_err
                        ),
                    }),
                }
            }
        }
    }

    async fn check_leader(&self, cluster: &str) -> Result<bool> {
        let handle = self.handle(cluster)?;
        let leader: String = get_json(&handle.http, &handle.base_url, "/v1/status/leader").await?;
        debug!(cluster, leader = %leader, "checked cluster leader");
        Ok(!leader.is_empty())
    }

    fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn cluster_region(&self, cluster: &str) -> Result<String> {
        Ok(self.handle(cluster)?.region.clone())
    }

    fn clusters_in_region(&self, region: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .clusters
            .read()
            .values()
            .filter(|h| h.region == region)
            .map(|h| h.name.clone())
            .collect();
        names.sort();
        names
    }

    fn all_regions(&self) -> Vec<String> {
        let regions: BTreeSet<String> = self
            .clusters
            .read()
            .values()
            .map(|h| h.region.clone())
            .collect();
        regions.into_iter().collect()
    }

    async fn trigger_job_evaluations(&self, cluster: &str) -> Result<()> {
        let handle = self.handle(cluster)?;
        let jobs: Vec<JobStub> = get_json(&handle.http, &handle.base_url, "/v1/jobs").await?;

        let mut success = 0usize;
        let mut errors = Vec::new();
        let mut eligible = 0usize;

        for job in &jobs {
            if job.status == "dead" {
                debug!(cluster, job_id = %job.id, "skipping dead job");
                continue;
            }
            eligible += 1;

            let url = format!("{}/v1/job/{}/evaluate", handle.base_url, job.id);
            let outcome = async {
                let response = handle.http.post(&url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(SwitchError::Network(format!(
                        "evaluate returned {}: {}",
                        status, body
                    )));
                }
                Ok(())
            };

            match outcome.await {
                Ok(()) => success += 1,
                Err(err) => {
                    warn!(cluster, job_id = %job.id, error = %err, "failed to trigger job evaluation");
                    errors.push(format!("job {}: {}", job.id, err));
                }
            }
        }

        info!(
            cluster,
            total_jobs = jobs.len(),
            success,
            errors = errors.len(),
            "job evaluations triggered"
        );

        if eligible > 0 && success == 0 {
            return Err(SwitchError::Internal(format!(
                "all job evaluations failed: {}",
                errors.join("; ")
            )));
        }
        Ok(())
    }

    async fn list_jobs(&self, cluster: &str) -> Result<Vec<Job>> {
        let handle = self.handle(cluster)?;
        let stubs: Vec<JobStub> = get_json(&handle.http, &handle.base_url, "/v1/jobs").await?;

        let mut jobs = Vec::with_capacity(stubs.len());
        for stub in stubs {
            let path = format!("/v1/job/{}/summary", stub.id);
            let (running, desired, failed) =
                match get_json::<JobSummary>(&handle.http, &handle.base_url, &path).await {
                    Ok(summary) => summary.totals(),
                    Err(err) => {
                        warn!(cluster, job_id = %stub.id, error = %err, "failed to get job summary");
                        (0, 0, 0)
                    }
                };

            jobs.push(Job {
                id: stub.id,
                name: stub.name,
                job_type: stub.job_type,
                status: stub.status,
                running,
                desired,
                failed,
                priority: stub.priority,
                submit_time: stub.submit_time,
                datacenters: stub.datacenters,
            });
        }

        debug!(cluster, count = jobs.len(), "listed jobs");
        Ok(jobs)
    }

    async fn start_job(&self, cluster: &str, job_id: &str) -> Result<()> {
        let handle = self.handle(cluster)?;

        // Fetch the current definition and re-register it with Stop unset.
        let path = format!("/v1/job/{}", job_id);
        let mut job: serde_json::Value = get_json(&handle.http, &handle.base_url, &path).await?;
        job["Stop"] = serde_json::Value::Bool(false);

        let url = format!("{}/v1/jobs", handle.base_url);
        let response = handle
            .http
            .post(&url)
            .json(&serde_json::json!({ "Job": job }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SwitchError::Network(format!(
                "job register returned {}: {}",
                status, body
            )));
        }

        info!(cluster, job_id, "started job");
        Ok(())
    }

    async fn stop_job(&self, cluster: &str, job_id: &str) -> Result<()> {
        let handle = self.handle(cluster)?;
        let url = format!("{}/v1/job/{}?purge=false", handle.base_url, job_id);

        let response = handle.http.delete(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SwitchError::Network(format!(
                "job deregister returned {}: {}",
                status, body
            )));
        }

        info!(cluster, job_id, "stopped job");
        Ok(())
    }

    async fn retry_unavailable(&self) -> usize {
        let parked: Vec<PendingCluster> = std::mem::take(&mut *self.pending.lock());
        if parked.is_empty() {
            return 0;
        }

        let mut added = 0;
        for pending in parked {
            let base_url = pending.config.address.trim_end_matches('/').to_string();
            match probe_health(&pending.http, &base_url).await {
                Ok(()) => {
                    let handle =
                        admit_cluster(pending.index, &pending.config, pending.http, base_url).await;
                    self.insert_handle(handle);
                    added += 1;
                }
                Err(err) => {
                    debug!(address = %base_url, error = %err, "cluster still unhealthy");
                    self.pending.lock().push(pending);
                }
            }
        }

        if added > 0 {
            info!(added, "added previously unavailable clusters");
        }
        added
    }
}

/// GET a JSON resource from a cluster endpoint.
async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    base_url: &str,
    path: &str,
) -> Result<T> {
    let url = format!("{}{}", base_url, path);
    let response = http.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SwitchError::Network(format!(
            "GET {} returned {}: {}",
            path, status, body
        )));
    }
    response
        .json()
        .await
        .map_err(|e| SwitchError::Serialization(e.to_string()))
}

/// Probe cluster health: an elected leader plus a passing agent report.
async fn probe_health(http: &reqwest::Client, base_url: &str) -> Result<()> {
    let leader: String = get_json(http, base_url, "/v1/status/leader").await?;
    if leader.is_empty() {
        return Err(SwitchError::ClusterUnhealthy {
            cluster: base_url.to_string(),
            reason: "no leader elected".to_string(),
        });
    }

    let health: AgentHealth = get_json(http, base_url, "/v1/agent/health").await?;
    if let Some(client) = &health.client {
        if !client.ok {
            return Err(SwitchError::ClusterUnhealthy {
                cluster: base_url.to_string(),
                reason: format!("client health check failed: {}", client.message),
            });
        }
    }
    if let Some(server) = &health.server {
        if !server.ok {
            return Err(SwitchError::ClusterUnhealthy {
                cluster: base_url.to_string(),
                reason: format!("server health check failed: {}", server.message),
            });
        }
    }
    Ok(())
}

/// Build a cluster handle: resolve name and region, cache node addresses.
///
/// Only called after a successful health probe; discovery and address
/// caching failures degrade the handle instead of failing startup.
async fn admit_cluster(
    index: usize,
    config: &ClusterConfig,
    http: reqwest::Client,
    base_url: String,
) -> ClusterHandle {
    let (mut name, mut region) = (config.name.clone(), config.region.clone());

    if name.is_empty() || region.is_empty() {
        match get_json::<AgentSelf>(&http, &base_url, "/v1/agent/self").await {
            Ok(agent) => {
                if name.is_empty() {
                    name = agent.config.datacenter;
                }
                if region.is_empty() {
                    region = agent.config.region;
                }
            }
            Err(err) => {
                warn!(
                    address = %base_url,
                    error = %err,
                    "failed to auto-detect cluster info, using fallback values"
                );
            }
        }
        if name.is_empty() {
            name = format!("cluster-{}", index);
        }
        if region.is_empty() {
            region = "global".to_string();
        }
    }

    let node_addrs = cache_node_addresses(&http, &base_url, &name).await;

    ClusterHandle {
        name,
        region,
        base_url,
        http,
        node_addrs,
    }
}

/// Enumerate nodes and cache their direct agent addresses for the fallback
/// path. A missing entry just disables fallback for that node.
async fn cache_node_addresses(
    http: &reqwest::Client,
    base_url: &str,
    cluster: &str,
) -> HashMap<String, NodeAddr> {
    let mut addrs = HashMap::new();

    let stubs: Vec<NodeStub> = match get_json(http, base_url, "/v1/nodes").await {
        Ok(stubs) => stubs,
        Err(err) => {
            warn!(
                cluster,
                error = %err,
                "failed to cache node addresses, direct fallback unavailable"
            );
            return addrs;
        }
    };

    for stub in &stubs {
        let path = format!("/v1/node/{}", stub.id);
        match get_json::<NodeDetail>(http, base_url, &path).await {
            Ok(detail) if !detail.http_addr.is_empty() => {
                addrs.insert(
                    detail.id,
                    NodeAddr {
                        http_addr: detail.http_addr,
                        name: detail.name,
                    },
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(cluster, node_id = %stub.id, error = %err, "failed to get node info, skipping");
            }
        }
    }

    info!(
        cluster,
        total_nodes = stubs.len(),
        cached_nodes = addrs.len(),
        "cached node addresses for direct fallback"
    );
    addrs
}

fn node_from_stub(stub: NodeStub) -> Node {
    let eligibility = if stub.scheduling_eligibility == "eligible" {
        Eligibility::Eligible
    } else {
        Eligibility::Ineligible
    };
    Node {
        id: stub.id,
        name: stub.name,
        drain: stub.drain,
        scheduling_eligibility: eligibility,
        status: stub.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(drain: bool, eligibility: &str) -> NodeStub {
        NodeStub {
            id: "n1".to_string(),
            name: "worker-1".to_string(),
            drain,
            scheduling_eligibility: eligibility.to_string(),
            status: "ready".to_string(),
        }
    }

    #[test]
    fn test_node_from_stub_eligibility() {
        assert_eq!(
            node_from_stub(stub(false, "eligible")).scheduling_eligibility,
            Eligibility::Eligible
        );
        assert_eq!(
            node_from_stub(stub(false, "ineligible")).scheduling_eligibility,
            Eligibility::Ineligible
        );
        // Unknown values conservatively map to ineligible.
        assert_eq!(
            node_from_stub(stub(false, "unknown")).scheduling_eligibility,
            Eligibility::Ineligible
        );
    }

    #[test]
    fn test_collision_rename() {
        let repo = NomadRepository {
            clusters: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        };

        let make = |region: &str| ClusterHandle {
            name: "dc".to_string(),
            region: region.to_string(),
            base_url: "http://localhost:4646".to_string(),
            http: reqwest::Client::new(),
            node_addrs: HashMap::new(),
        };

        repo.insert_handle(make("us"));
        repo.insert_handle(make("eu"));

        let names = repo.cluster_names();
        assert_eq!(names, vec!["dc".to_string(), "dc-eu".to_string()]);
        assert_eq!(repo.cluster_region("dc").unwrap(), "us");
        assert_eq!(repo.cluster_region("dc-eu").unwrap(), "eu");
    }

    #[test]
    fn test_region_queries() {
        let repo = NomadRepository {
            clusters: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        };
        for (name, region) in [("dc-a", "us"), ("dc-b", "us"), ("dc-c", "eu")] {
            repo.insert_handle(ClusterHandle {
                name: name.to_string(),
                region: region.to_string(),
                base_url: "http://localhost:4646".to_string(),
                http: reqwest::Client::new(),
                node_addrs: HashMap::new(),
            });
        }

        assert_eq!(repo.all_regions(), vec!["eu".to_string(), "us".to_string()]);
        assert_eq!(
            repo.clusters_in_region("us"),
            vec!["dc-a".to_string(), "dc-b".to_string()]
        );
        assert!(repo.clusters_in_region("ap").is_empty());
        assert!(repo.cluster_region("dc-x").is_err());
    }
}
