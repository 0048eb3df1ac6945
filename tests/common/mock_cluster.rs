//! In-process mock of an upstream cluster control plane.
//!
//! Serves the subset of the REST protocol the repository consumes, backed
//! by mutable in-memory state so tests can flip health, leadership and
//! per-node write behavior mid-run. The direct-node fallback endpoint
//! (`/v1/node/self/drain`) targets the first node, so fallback scenarios
//! should use single-node clusters.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct MockNode {
    pub id: String,
    pub name: String,
    pub drain: bool,
    pub eligibility: String,
    pub status: String,
    /// Advertised direct agent address; empty disables fallback.
    pub http_addr: String,
}

impl MockNode {
    pub fn ready(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("node-{id}"),
            drain: false,
            eligibility: "eligible".to_string(),
            status: "ready".to_string(),
            http_addr: String::new(),
        }
    }

    pub fn drained(id: &str) -> Self {
        Self {
            drain: true,
            eligibility: "ineligible".to_string(),
            ..Self::ready(id)
        }
    }
}

#[derive(Default)]
pub struct MockClusterState {
    pub datacenter: String,
    pub region: String,
    pub nodes: Mutex<Vec<MockNode>>,
    /// Empty means no elected leader.
    pub leader: Mutex<String>,
    pub healthy: Mutex<bool>,
    /// Node ids whose central drain update returns 500.
    pub fail_central_drain: Mutex<HashSet<String>>,
    pub central_drain_calls: Mutex<Vec<(String, bool)>>,
    pub direct_drain_calls: Mutex<Vec<bool>>,
    pub eval_calls: Mutex<Vec<String>>,
    /// (id, status) pairs served at /v1/jobs.
    pub jobs: Mutex<Vec<(String, String)>>,
}

/// A running mock cluster.
pub struct MockCluster {
    pub addr: SocketAddr,
    pub state: Arc<MockClusterState>,
    _server: JoinHandle<()>,
}

impl MockCluster {
    /// Spawn a mock cluster with the given identity and nodes.
    pub async fn spawn(datacenter: &str, region: &str, nodes: Vec<MockNode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock cluster");
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(MockClusterState {
            datacenter: datacenter.to_string(),
            region: region.to_string(),
            nodes: Mutex::new(nodes),
            leader: Mutex::new(format!("{}:4647", addr.ip())),
            healthy: Mutex::new(true),
            ..Default::default()
        });

        let app = router(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock cluster server failed");
        });

        Self {
            addr,
            state,
            _server: server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Point every node's advertised direct address at this server.
    pub fn advertise_node_addrs(&self) {
        let addr = self.addr.to_string();
        for node in self.state.nodes.lock().iter_mut() {
            node.http_addr = addr.clone();
        }
    }

    pub fn set_leader(&self, leader: &str) {
        *self.state.leader.lock() = leader.to_string();
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.state.healthy.lock() = healthy;
    }

    pub fn fail_central_drain(&self, node_id: &str) {
        self.state
            .fail_central_drain
            .lock()
            .insert(node_id.to_string());
    }

    pub fn nodes(&self) -> Vec<MockNode> {
        self.state.nodes.lock().clone()
    }
}

fn router(state: Arc<MockClusterState>) -> Router {
    Router::new()
        .route("/v1/status/leader", get(leader))
        .route("/v1/agent/health", get(agent_health))
        .route("/v1/agent/self", get(agent_self))
        .route("/v1/nodes", get(list_nodes))
        .route("/v1/node/self/drain", post(direct_drain))
        .route("/v1/node/:id", get(node_info))
        .route("/v1/node/:id/drain", post(central_drain))
        .route("/v1/jobs", get(list_jobs).post(register_job))
        .route("/v1/job/:id/evaluate", post(evaluate_job))
        .route("/v1/job/:id/summary", get(job_summary))
        .route("/v1/job/:id", get(job_info).delete(deregister_job))
        .with_state(state)
}

async fn leader(State(state): State<Arc<MockClusterState>>) -> Json<String> {
    Json(state.leader.lock().clone())
}

async fn agent_health(State(state): State<Arc<MockClusterState>>) -> Response {
    if *state.healthy.lock() {
        Json(json!({
            "client": {"ok": true, "message": "ok"},
            "server": {"ok": true, "message": "ok"}
        }))
        .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "client": {"ok": false, "message": "unhealthy"},
            })),
        )
            .into_response()
    }
}

async fn agent_self(State(state): State<Arc<MockClusterState>>) -> Json<Value> {
    Json(json!({
        "config": {
            "Datacenter": state.datacenter,
            "Region": state.region,
        }
    }))
}

fn node_json(node: &MockNode) -> Value {
    json!({
        "ID": node.id,
        "Name": node.name,
        "Drain": node.drain,
        "SchedulingEligibility": node.eligibility,
        "Status": node.status,
    })
}

async fn list_nodes(State(state): State<Arc<MockClusterState>>) -> Json<Value> {
    let nodes: Vec<Value> = state.nodes.lock().iter().map(node_json).collect();
    Json(Value::Array(nodes))
}

async fn node_info(
    State(state): State<Arc<MockClusterState>>,
    Path(id): Path<String>,
) -> Response {
    let nodes = state.nodes.lock();
    match nodes.iter().find(|n| n.id == id) {
        Some(node) => Json(json!({
            "ID": node.id,
            "Name": node.name,
            "HTTPAddr": node.http_addr,
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "node not found").into_response(),
    }
}

fn apply_drain(node: &mut MockNode, body: &Value) {
    let drain = !body["DrainSpec"].is_null();
    node.drain = drain;
    node.eligibility = if body["MarkEligible"].as_bool().unwrap_or(false) {
        "eligible".to_string()
    } else {
        "ineligible".to_string()
    };
}

async fn central_drain(
    State(state): State<Arc<MockClusterState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let drain = !body["DrainSpec"].is_null();
    state.central_drain_calls.lock().push((id.clone(), drain));

    if state.fail_central_drain.lock().contains(&id) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "rpc error: leader unreachable").into_response();
    }

    let mut nodes = state.nodes.lock();
    match nodes.iter_mut().find(|n| n.id == id) {
        Some(node) => {
            apply_drain(node, &body);
            Json(json!({"EvalIDs": [], "NodeModifyIndex": 1})).into_response()
        }
        None => (StatusCode::NOT_FOUND, "node not found").into_response(),
    }
}

async fn direct_drain(
    State(state): State<Arc<MockClusterState>>,
    Json(body): Json<Value>,
) -> Response {
    let drain = !body["DrainSpec"].is_null();
    state.direct_drain_calls.lock().push(drain);

    let mut nodes = state.nodes.lock();
    match nodes.first_mut() {
        Some(node) => {
            apply_drain(node, &body);
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, "no nodes").into_response(),
    }
}

async fn list_jobs(State(state): State<Arc<MockClusterState>>) -> Json<Value> {
    let jobs: Vec<Value> = state
        .jobs
        .lock()
        .iter()
        .map(|(id, status)| {
            json!({
                "ID": id,
                "Name": id,
                "Type": "service",
                "Status": status,
                "Priority": 50,
                "SubmitTime": 0,
                "Datacenters": [state.datacenter],
            })
        })
        .collect();
    Json(Value::Array(jobs))
}

async fn evaluate_job(
    State(state): State<Arc<MockClusterState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    state.eval_calls.lock().push(id.clone());
    Json(json!({"EvalID": format!("eval-{id}")}))
}

async fn job_summary(Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        "JobID": id,
        "Summary": {
            "main": {"Queued": 0, "Starting": 0, "Running": 1, "Failed": 0, "Lost": 0}
        }
    }))
}

async fn job_info(
    State(state): State<Arc<MockClusterState>>,
    Path(id): Path<String>,
) -> Response {
    let jobs = state.jobs.lock();
    match jobs.iter().find(|(job_id, _)| *job_id == id) {
        Some((job_id, status)) => Json(json!({
            "ID": job_id,
            "Name": job_id,
            "Type": "service",
            "Status": status,
            "Stop": status == "dead",
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "job not found").into_response(),
    }
}

async fn register_job(
    State(state): State<Arc<MockClusterState>>,
    Json(body): Json<Value>,
) -> Response {
    let id = body["Job"]["ID"].as_str().unwrap_or_default().to_string();
    let mut jobs = state.jobs.lock();
    match jobs.iter_mut().find(|(job_id, _)| *job_id == id) {
        Some(entry) => {
            entry.1 = "running".to_string();
            Json(json!({"EvalID": format!("eval-{id}")})).into_response()
        }
        None => {
            jobs.push((id.clone(), "running".to_string()));
            Json(json!({"EvalID": format!("eval-{id}")})).into_response()
        }
    }
}

async fn deregister_job(
    State(state): State<Arc<MockClusterState>>,
    Path(id): Path<String>,
) -> Response {
    let mut jobs = state.jobs.lock();
    match jobs.iter_mut().find(|(job_id, _)| *job_id == id) {
        Some(entry) => {
            entry.1 = "dead".to_string();
            Json(json!({"EvalID": format!("eval-{id}")})).into_response()
        }
        None => (StatusCode::NOT_FOUND, "job not found").into_response(),
    }
}
