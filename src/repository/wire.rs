//! Wire types for the upstream cluster REST protocol.
//!
//! The upstream API uses PascalCase JSON keys for node and job resources
//! and lowercase keys for the agent health report.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node entry from `GET /v1/nodes`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeStub {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Drain")]
    pub drain: bool,
    #[serde(rename = "SchedulingEligibility")]
    pub scheduling_eligibility: String,
    #[serde(rename = "Status")]
    pub status: String,
}

/// Node detail from `GET /v1/node/<id>`, reduced to the fallback fields.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDetail {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    /// Direct HTTP address of the node's own agent.
    #[serde(rename = "HTTPAddr", default)]
    pub http_addr: String,
}

/// Agent self-description from `GET /v1/agent/self`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSelf {
    #[serde(rename = "config", alias = "Config")]
    pub config: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(rename = "Datacenter", default)]
    pub datacenter: String,
    #[serde(rename = "Region", default)]
    pub region: String,
}

/// Agent health report from `GET /v1/agent/health`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentHealth {
    pub client: Option<HealthSection>,
    pub server: Option<HealthSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
}

/// Drain deadline sentinel for "drain forever".
pub const DRAIN_DEADLINE_INFINITE: i64 = -1;

/// Drain specification carried by drain updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainSpec {
    #[serde(rename = "Deadline")]
    pub deadline: i64,
}

/// Body of the central drain update and the direct-node fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainRequest {
    /// `None` disables draining.
    #[serde(rename = "DrainSpec")]
    pub drain_spec: Option<DrainSpec>,
    #[serde(rename = "MarkEligible")]
    pub mark_eligible: bool,
}

impl DrainRequest {
    /// Build the request for the given drain target state.
    pub fn new(drain: bool) -> Self {
        Self {
            drain_spec: drain.then_some(DrainSpec {
                deadline: DRAIN_DEADLINE_INFINITE,
            }),
            mark_eligible: !drain,
        }
    }
}

/// Job entry from `GET /v1/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStub {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub job_type: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Priority", default)]
    pub priority: i64,
    #[serde(rename = "SubmitTime", default)]
    pub submit_time: i64,
    #[serde(rename = "Datacenters", default)]
    pub datacenters: Vec<String>,
}

/// Job summary from `GET /v1/job/<id>/summary`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSummary {
    #[serde(rename = "Summary", default)]
    pub summary: HashMap<String, TaskGroupSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskGroupSummary {
    #[serde(rename = "Queued", default)]
    pub queued: usize,
    #[serde(rename = "Starting", default)]
    pub starting: usize,
    #[serde(rename = "Running", default)]
    pub running: usize,
    #[serde(rename = "Failed", default)]
    pub failed: usize,
    #[serde(rename = "Lost", default)]
    pub lost: usize,
}

impl JobSummary {
    /// Aggregate allocation counts across task groups.
    pub fn totals(&self) -> (usize, usize, usize) {
        let mut running = 0;
        let mut desired = 0;
        let mut failed = 0;
        for tg in self.summary.values() {
            running += tg.running;
            desired += tg.queued + tg.starting + tg.running;
            failed += tg.failed + tg.lost;
        }
        (running, desired, failed)
    }
}
