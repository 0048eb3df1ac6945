//! Cluster repository: a health-aware abstraction over N upstream cluster
//! control planes.
//!
//! The activation engine depends only on the [`ClusterOps`] trait, so tests
//! replace the whole upstream with a double. The production implementation
//! is [`NomadRepository`], which speaks the cluster's REST control plane and
//! falls back to direct node calls when the control plane is unreachable.

mod nomad;
mod wire;

pub use nomad::NomadRepository;

use crate::error::Result;
use crate::types::{Job, Node};
use async_trait::async_trait;

/// Operations against the set of configured clusters.
///
/// Name lookups return `NotFound` for unknown clusters. Membership methods
/// are synchronous reads of in-memory state and reflect clusters added by
/// the background retry task without restart.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// List all nodes of a cluster.
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>>;

    /// Set the drain state of a single node.
    ///
    /// Eligibility follows drain: draining makes the node ineligible,
    /// un-draining makes it eligible again.
    async fn set_node_drain(&self, cluster: &str, node_id: &str, drain: bool) -> Result<()>;

    /// Whether the cluster currently has an elected leader.
    async fn check_leader(&self, cluster: &str) -> Result<bool>;

    /// All cluster names, sorted.
    fn cluster_names(&self) -> Vec<String>;

    /// Region of a cluster.
    fn cluster_region(&self, cluster: &str) -> Result<String>;

    /// All cluster names in a region, sorted. Empty for unknown regions.
    fn clusters_in_region(&self, region: &str) -> Vec<String>;

    /// All distinct regions, sorted.
    fn all_regions(&self) -> Vec<String>;

    /// Force-evaluate every non-dead job in a cluster.
    ///
    /// Fails only when every eligible job failed to evaluate.
    async fn trigger_job_evaluations(&self, cluster: &str) -> Result<()>;

    /// List jobs with best-effort allocation summaries.
    async fn list_jobs(&self, cluster: &str) -> Result<Vec<Job>>;

    /// Start a stopped job.
    async fn start_job(&self, cluster: &str, job_id: &str) -> Result<()>;

    /// Stop a running job without purging it.
    async fn stop_job(&self, cluster: &str, job_id: &str) -> Result<()>;

    /// Re-probe clusters that were skipped as unhealthy at startup.
    ///
    /// Returns the number of clusters that joined the repository.
    async fn retry_unavailable(&self) -> usize;
}
