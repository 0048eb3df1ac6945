//! Core domain types for the dcswitch controller.
//!
//! A **cluster** is an upstream control plane managing worker nodes; the
//! operator-facing projection of a cluster is a **datacenter**. Datacenters
//! are grouped into **regions** for switch-at-once operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduling eligibility of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eligibility {
    /// Node accepts new placements.
    Eligible,
    /// Node refuses new placements.
    Ineligible,
}

/// A worker node as reported by a cluster control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    /// Whether the node is migrating workloads off.
    pub drain: bool,
    pub scheduling_eligibility: Eligibility,
    /// Coarse upstream status: `ready`, `down` or `initializing`.
    pub status: String,
}

impl Node {
    /// A node is ready when it is not draining and accepts new placements.
    /// A node that is both draining and eligible is treated as draining.
    pub fn is_ready(&self) -> bool {
        !self.drain && self.scheduling_eligibility == Eligibility::Eligible
    }
}

/// Status of a datacenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatacenterStatus {
    /// At least one node is ready.
    Active,
    /// No node is ready.
    Draining,
    /// The cluster is unreachable.
    Error,
}

/// A cluster projected as an operator-facing datacenter view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datacenter {
    pub name: String,
    pub region: String,
    pub status: DatacenterStatus,
    pub nodes_total: usize,
    pub nodes_ready: usize,
    pub nodes_draining: usize,
    pub jobs_total: usize,
    pub jobs_running: usize,
    pub jobs_stopped: usize,
}

impl Datacenter {
    /// Build a datacenter view from a node snapshot.
    ///
    /// Ineligible nodes are folded into the draining count, so
    /// `nodes_ready + nodes_draining == nodes_total` always holds.
    pub fn from_nodes(name: impl Into<String>, region: impl Into<String>, nodes: &[Node]) -> Self {
        let mut ready = 0;
        let mut draining = 0;
        for node in nodes {
            if node.is_ready() {
                ready += 1;
            } else {
                draining += 1;
            }
        }

        let status = if ready > 0 {
            DatacenterStatus::Active
        } else {
            DatacenterStatus::Draining
        };

        Self {
            name: name.into(),
            region: region.into(),
            status,
            nodes_total: nodes.len(),
            nodes_ready: ready,
            nodes_draining: draining,
            jobs_total: 0,
            jobs_running: 0,
            jobs_stopped: 0,
        }
    }

    /// An unreachable-cluster placeholder view.
    pub fn unreachable(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            status: DatacenterStatus::Error,
            nodes_total: 0,
            nodes_ready: 0,
            nodes_draining: 0,
            jobs_total: 0,
            jobs_running: 0,
            jobs_stopped: 0,
        }
    }
}

/// Status of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    /// All member datacenters are active.
    Active,
    /// All member datacenters are draining.
    Draining,
    /// Both active and draining members exist.
    Partial,
    /// At least one member is unreachable.
    Error,
}

impl RegionStatus {
    /// Derive a region status from its member datacenters.
    pub fn from_members(members: &[Datacenter]) -> Self {
        let mut active = 0;
        let mut draining = 0;
        for dc in members {
            match dc.status {
                DatacenterStatus::Error => return RegionStatus::Error,
                DatacenterStatus::Active => active += 1,
                DatacenterStatus::Draining => draining += 1,
            }
        }
        if draining == members.len() {
            RegionStatus::Draining
        } else if active > 0 && draining > 0 {
            RegionStatus::Partial
        } else {
            RegionStatus::Active
        }
    }
}

/// A named group of datacenters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub status: RegionStatus,
    pub datacenters: Vec<Datacenter>,
    pub jobs_total: usize,
    pub jobs_running: usize,
    pub jobs_stopped: usize,
}

impl Region {
    /// Build a region view from its member datacenter views.
    pub fn from_datacenters(name: impl Into<String>, datacenters: Vec<Datacenter>) -> Self {
        let status = RegionStatus::from_members(&datacenters);
        let jobs_total = datacenters.iter().map(|d| d.jobs_total).sum();
        let jobs_running = datacenters.iter().map(|d| d.jobs_running).sum();
        let jobs_stopped = datacenters.iter().map(|d| d.jobs_stopped).sum();
        Self {
            name: name.into(),
            status,
            datacenters,
            jobs_total,
            jobs_running,
            jobs_stopped,
        }
    }
}

/// Result of a datacenter or region activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationResult {
    /// The target that was activated.
    pub activated: String,
    /// Nodes actually moved to draining by this activation.
    pub drained_nodes: usize,
    /// Nodes actually moved back to ready by this activation.
    pub un_drained_nodes: usize,
    /// Per-node and per-cluster failure messages, in collection order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ActivationResult {
    pub fn new(activated: impl Into<String>) -> Self {
        Self {
            activated: activated.into(),
            drained_nodes: 0,
            un_drained_nodes: 0,
            errors: Vec::new(),
        }
    }
}

/// The active-datacenter record persisted in the coordination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDatacenter {
    pub datacenter: String,
    pub activated_at: DateTime<Utc>,
    /// Origin of the activation: `api`, `api-region`, `heartbeat`.
    pub activated_by: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl ActiveDatacenter {
    /// Age of the heartbeat, saturating at zero for clock skew.
    pub fn heartbeat_age(&self) -> Duration {
        (Utc::now() - self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the heartbeat is older than the given threshold.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.heartbeat_age() > threshold
    }
}

/// Per-datacenter heartbeat record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub datacenter: String,
    pub last_seen: DateTime<Utc>,
}

/// A workload job as reported by a cluster control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// `service`, `batch` or `system`.
    #[serde(rename = "type")]
    pub job_type: String,
    /// `running`, `pending` or `dead`.
    pub status: String,
    pub running: usize,
    pub desired: usize,
    pub failed: usize,
    pub priority: i64,
    pub submit_time: i64,
    pub datacenters: Vec<String>,
}

/// Result of a start/stop job action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobActionResult {
    pub job_id: String,
    pub action: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Controller status surfaced at `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Datacenter this instance manages; empty when uncoordinated.
    pub my_datacenter: String,
    /// Whether this instance has intentionally drained its own nodes.
    pub am_drained: bool,
    pub etcd_connected: bool,
    /// Active datacenter according to the coordination store.
    pub active_datacenter: String,
    /// Heartbeat age in milliseconds, 0 when no record exists.
    pub heartbeat_age: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: String,
    /// Heartbeat update interval in milliseconds.
    pub heartbeat_interval: u64,
    /// Heartbeat stale threshold in milliseconds.
    pub stale_threshold: u64,
}
