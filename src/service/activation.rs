//! Activation engine.
//!
//! Fan-out that drives every node in every cluster to its target
//! drain/eligibility state. The policy is continue-on-error: per-node and
//! per-cluster failures are collected into the result instead of aborting
//! the activation, so a partially failed switch still converges as far as
//! the upstream allows and the operator sees the complete error list.

use super::SwitchService;
use crate::cache::nodes_key;
use crate::error::{Result, SwitchError};
use crate::executor::parallel_map;
use crate::observability;
use crate::types::{ActivationResult, ActiveDatacenter, Node};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Snapshot of one cluster gathered during the fan-out's read phase.
struct ClusterSnapshot {
    cluster: String,
    region: String,
    nodes: Vec<Node>,
    /// Same-region sibling of a datacenter target; state is preserved.
    skipped: bool,
    fetch_error: Option<String>,
}

impl SwitchService {
    /// Activate a datacenter: un-drain the target, drain every cluster in
    /// other regions. Same-region siblings of the target keep their state;
    /// this is a per-datacenter switch, not a region switch.
    pub async fn activate_datacenter(&self, target: &str) -> Result<ActivationResult> {
        info!(target_datacenter = target, "starting datacenter activation");

        let target_region = self
            .repo
            .cluster_region(target)
            .map_err(|_| SwitchError::TargetNotFound(format!("datacenter {}", target)))?;

        let mut result = ActivationResult::new(target);

        let snapshots = self
            .snapshot_clusters(|cluster, region| {
                region == target_region && cluster != target
            })
            .await;

        for snapshot in snapshots {
            self.apply_cluster_target(
                &snapshot,
                snapshot.cluster != target,
                &mut result,
            )
            .await;
        }

        info!(
            activated = target,
            drained_nodes = result.drained_nodes,
            un_drained_nodes = result.un_drained_nodes,
            errors = result.errors.len(),
            "datacenter activation completed"
        );

        if result.un_drained_nodes > 0 {
            if let Err(err) = self.repo.trigger_job_evaluations(target).await {
                warn!(datacenter = target, error = %err, "failed to trigger job evaluations");
                result
                    .errors
                    .push(format!("failed to trigger job evaluations for {}: {}", target, err));
            }
        }

        self.record_activation(target, "api", &mut result).await;
        self.notify_active_region(&target_region);
        observability::record_activation(
            result.drained_nodes,
            result.un_drained_nodes,
            result.errors.len(),
        );

        Ok(result)
    }

    /// Activate a region: un-drain every cluster in the region, drain every
    /// cluster outside it.
    pub async fn activate_region(&self, target_region: &str) -> Result<ActivationResult> {
        info!(target_region, "starting region activation");

        let target_clusters = self.repo.clusters_in_region(target_region);
        if target_clusters.is_empty() {
            return Err(SwitchError::TargetNotFound(format!(
                "region {} has no datacenters",
                target_region
            )));
        }

        let mut result = ActivationResult::new(target_region);

        let snapshots = self.snapshot_clusters(|_, _| false).await;

        for snapshot in snapshots {
            self.apply_cluster_target(&snapshot, snapshot.region != target_region, &mut result)
                .await;
        }

        info!(
            activated = target_region,
            drained_nodes = result.drained_nodes,
            un_drained_nodes = result.un_drained_nodes,
            errors = result.errors.len(),
            "region activation completed"
        );

        if result.un_drained_nodes > 0 {
            for cluster in &target_clusters {
                if let Err(err) = self.repo.trigger_job_evaluations(cluster).await {
                    warn!(datacenter = %cluster, error = %err, "failed to trigger job evaluations");
                    result.errors.push(format!("datacenter {}: {}", cluster, err));
                }
            }
        }

        // The first cluster of the region is recorded as active.
        let recorded = target_clusters[0].clone();
        self.record_activation(&recorded, "api-region", &mut result).await;
        self.notify_active_region(target_region);
        observability::record_activation(
            result.drained_nodes,
            result.un_drained_nodes,
            result.errors.len(),
        );

        Ok(result)
    }

    /// Force every non-drained node in every cluster of a region to drain.
    /// Used by the health watchdog and the split-brain fencing paths.
    pub async fn drain_all_in_region(&self, region: &str) -> Result<()> {
        let clusters = self.repo.clusters_in_region(region);
        if clusters.is_empty() {
            return Err(SwitchError::NotFound(format!(
                "no clusters found in region {}",
                region
            )));
        }

        info!(region, cluster_count = clusters.len(), "draining all nodes in region");

        let results = parallel_map(clusters.clone(), |cluster| async move {
            let nodes = self.get_nodes(&cluster).await?;
            let mut drained = 0usize;
            for node in &nodes {
                if node.drain {
                    continue;
                }
                if let Err(err) = self.repo.set_node_drain(&cluster, &node.id, true).await {
                    error!(
                        cluster = %cluster,
                        node_id = %node.id,
                        error = %err,
                        "failed to drain node"
                    );
                    continue;
                }
                drained += 1;
            }
            info!(cluster = %cluster, drained, total_nodes = nodes.len(), "drained nodes in cluster");
            Ok(drained)
        })
        .await;

        let mut errors = Vec::new();
        let mut total = 0usize;
        for r in results {
            match r.result {
                Ok(count) => total += count,
                Err(err) => errors.push(format!("cluster drain error: {}", err)),
            }
        }

        for cluster in &clusters {
            self.cache.delete(&nodes_key(cluster));
        }

        info!(region, total_drained = total, errors = errors.len(), "completed draining region");

        if !errors.is_empty() {
            return Err(SwitchError::Internal(format!(
                "some drain operations failed: {}",
                errors.join("; ")
            )));
        }
        Ok(())
    }

    /// Best-effort single-active recovery for uncoordinated deployments.
    ///
    /// When more than one region holds ready nodes, keeps the first region
    /// (alphabetically) active and drains the ready nodes of the rest.
    pub async fn ensure_single_active(&self) -> Result<()> {
        info!("checking region states at startup");

        let snapshots = self.snapshot_clusters(|_, _| false).await;

        // region -> clusters with at least one ready node
        let mut active_by_region: BTreeMap<String, Vec<&ClusterSnapshot>> = BTreeMap::new();
        for snapshot in &snapshots {
            if snapshot.fetch_error.is_some() {
                continue;
            }
            if snapshot.nodes.iter().any(Node::is_ready) {
                active_by_region
                    .entry(snapshot.region.clone())
                    .or_default()
                    .push(snapshot);
            }
        }

        if active_by_region.len() <= 1 {
            match active_by_region.iter().next() {
                Some((region, clusters)) => info!(
                    region = %region,
                    active_datacenters = clusters.len(),
                    "found single active region at startup"
                ),
                None => info!("no active regions found at startup"),
            }
            return Ok(());
        }

        let keep = active_by_region.keys().next().cloned().unwrap_or_default();
        warn!(
            keeping_active_region = %keep,
            draining_regions = active_by_region.len() - 1,
            "multiple active regions detected at startup"
        );

        let mut drained_regions = 0usize;
        for (region, clusters) in active_by_region.iter().filter(|(r, _)| **r != keep) {
            info!(region = %region, "draining region");

            let targets: Vec<(String, String)> = clusters
                .iter()
                .flat_map(|snap| {
                    snap.nodes
                        .iter()
                        .filter(|n| n.is_ready())
                        .map(|n| (snap.cluster.clone(), n.id.clone()))
                })
                .collect();

            let results = parallel_map(targets, |(cluster, node_id)| async move {
                self.repo
                    .set_node_drain(&cluster, &node_id, true)
                    .await
                    .map(|_| cluster)
            })
            .await;

            let mut touched: Vec<String> = Vec::new();
            for r in results {
                match r.result {
                    Ok(cluster) => {
                        if !touched.contains(&cluster) {
                            touched.push(cluster);
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "failed to drain node during startup sync");
                    }
                }
            }
            for cluster in touched {
                self.cache.delete(&nodes_key(&cluster));
            }
            drained_regions += 1;
        }

        info!(
            active_region = %keep,
            drained_regions,
            "startup region sync completed"
        );
        Ok(())
    }

    /// Drain every ready node of this instance's own datacenter.
    ///
    /// Conservative path used by reconciliation and fencing: the first
    /// failing write aborts so the caller can retry the whole pass.
    pub(super) async fn drain_my_nodes(&self) -> Result<()> {
        info!(datacenter = %self.my_datacenter, "draining all nodes in my datacenter");

        let nodes = self.get_nodes(&self.my_datacenter).await?;
        for node in &nodes {
            if !node.is_ready() {
                continue;
            }
            self.repo
                .set_node_drain(&self.my_datacenter, &node.id, true)
                .await
                .map_err(|err| {
                    error!(node_id = %node.id, error = %err, "failed to drain node");
                    err
                })?;
            info!(node_id = %node.id, node_name = %node.name, "drained node");
        }

        self.cache.delete(&nodes_key(&self.my_datacenter));
        Ok(())
    }

    /// Read phase: fetch node snapshots of all clusters in parallel.
    ///
    /// `skip(cluster, region)` marks clusters whose state must be
    /// preserved; their nodes are not fetched.
    async fn snapshot_clusters<F>(&self, skip: F) -> Vec<ClusterSnapshot>
    where
        F: Fn(&str, &str) -> bool,
    {
        let names = self.repo.cluster_names();
        let skip = &skip;
        let results = parallel_map(names, |cluster| async move {
            let region = match self.repo.cluster_region(&cluster) {
                Ok(region) => region,
                Err(err) => {
                    warn!(cluster = %cluster, error = %err, "failed to get cluster region");
                    return Ok(ClusterSnapshot {
                        cluster,
                        region: String::new(),
                        nodes: Vec::new(),
                        skipped: false,
                        fetch_error: Some(err.to_string()),
                    });
                }
            };

            if skip(&cluster, &region) {
                debug!(cluster = %cluster, region = %region, "skipping datacenter in same region");
                return Ok(ClusterSnapshot {
                    cluster,
                    region,
                    nodes: Vec::new(),
                    skipped: true,
                    fetch_error: None,
                });
            }

            match self.get_nodes(&cluster).await {
                Ok(nodes) => Ok(ClusterSnapshot {
                    cluster,
                    region,
                    nodes,
                    skipped: false,
                    fetch_error: None,
                }),
                Err(err) => {
                    error!(cluster = %cluster, error = %err, "failed to get nodes");
                    Ok(ClusterSnapshot {
                        cluster,
                        region,
                        nodes: Vec::new(),
                        skipped: false,
                        fetch_error: Some(err.to_string()),
                    })
                }
            }
        })
        .await;

        results
            .into_iter()
            .filter_map(|r| r.result.ok())
            .collect()
    }

    /// Write phase for one cluster: move every node to the target state,
    /// skipping already-correct nodes, then invalidate the cluster's cache
    /// entry.
    async fn apply_cluster_target(
        &self,
        snapshot: &ClusterSnapshot,
        should_drain: bool,
        result: &mut ActivationResult,
    ) {
        if let Some(err) = &snapshot.fetch_error {
            result.errors.push(format!(
                "cluster {}: failed to fetch nodes: {}",
                snapshot.cluster, err
            ));
            warn!(cluster = %snapshot.cluster, error = %err, "skipping cluster due to error");
            return;
        }
        if snapshot.skipped || snapshot.nodes.is_empty() {
            return;
        }

        let should_be_eligible = !should_drain;
        let pending: Vec<&Node> = snapshot
            .nodes
            .iter()
            .filter(|node| {
                let eligible = node.scheduling_eligibility == crate::types::Eligibility::Eligible;
                !(node.drain == should_drain && eligible == should_be_eligible)
            })
            .collect();

        let cluster = snapshot.cluster.as_str();
        let write_results = parallel_map(pending, |node| async move {
            self.repo
                .set_node_drain(cluster, &node.id, should_drain)
                .await
                .map(|_| node.id.clone())
                .map_err(|err| match err {
                    e @ SwitchError::NodeWriteFailed { .. } => e,
                    other => SwitchError::NodeWriteFailed {
                        cluster: cluster.to_string(),
                        node: node.id.clone(),
                        reason: other.to_string(),
                    },
                })
        })
        .await;

        for write in write_results {
            match write.result {
                Ok(_) => {
                    if should_drain {
                        result.drained_nodes += 1;
                    } else {
                        result.un_drained_nodes += 1;
                    }
                }
                Err(err) => {
                    let (node_id, reason) = match &err {
                        SwitchError::NodeWriteFailed { node, reason, .. } => {
                            (node.clone(), reason.clone())
                        }
                        other => (String::new(), other.to_string()),
                    };
                    result.errors.push(format!(
                        "cluster {}, node {}: {}",
                        cluster, node_id, reason
                    ));
                }
            }
        }

        self.cache.delete(&nodes_key(cluster));
    }

    /// Record the activation in the coordination store. Failures are
    /// appended to the result but never fail the operation: the cluster
    /// state has already been applied.
    async fn record_activation(
        &self,
        datacenter: &str,
        activated_by: &str,
        result: &mut ActivationResult,
    ) {
        let Some(store) = &self.store else {
            return;
        };

        let now = Utc::now();
        let info = ActiveDatacenter {
            datacenter: datacenter.to_string(),
            activated_at: now,
            activated_by: activated_by.to_string(),
            last_heartbeat: now,
        };

        match store.write_active(&info).await {
            Ok(()) => {
                info!(datacenter, "wrote active datacenter record");
                if datacenter == self.my_datacenter {
                    self.set_am_drained(false);
                }
            }
            Err(err) => {
                error!(datacenter, error = %err, "failed to write active datacenter record");
                result.errors.push(format!("failed to write to etcd: {}", err));
            }
        }
    }
}
