//! HTTP API surface.
//!
//! JSON handlers over the switch service. Activation endpoints return 200
//! with a populated `errors` list on partial failure; they only return 500
//! when the target cannot be resolved or no write succeeded at all. All
//! error bodies have the shape `{"error": "<message>"}`.

use crate::error::SwitchError;
use crate::service::SwitchService;
use crate::types::ActivationResult;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<SwitchService>,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router, nested under `base_path` when configured.
pub fn router(state: ApiState, base_path: &str) -> Router {
    let api = Router::new()
        .route("/api/datacenters", get(list_datacenters))
        .route("/api/datacenters/:name/nodes", get(get_nodes))
        .route("/api/datacenters/:name/activate", post(activate_datacenter))
        .route("/api/datacenters/:name/jobs", get(list_jobs))
        .route("/api/datacenters/:name/jobs/:job_id/start", post(start_job))
        .route("/api/datacenters/:name/jobs/:job_id/stop", post(stop_job))
        .route("/api/regions", get(list_regions))
        .route("/api/regions/:name/datacenters", get(region_datacenters))
        .route("/api/regions/:name/activate", post(activate_region))
        .route("/api/status", get(get_status))
        .route("/metrics", get(render_metrics))
        .with_state(state);

    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    }
}

/// API error with the `{"error": …}` body shape.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SwitchError> for ApiError {
    fn from(err: SwitchError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            match err {
                SwitchError::Config(_) | SwitchError::InvalidConfig { .. } => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn require_name(name: &str, what: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("{} name is required", what),
        ));
    }
    Ok(())
}

/// Partial failures stay 200; a result with errors and no applied change
/// is a hard failure and surfaces as 500 with the full result body.
fn activation_response(result: ActivationResult) -> Response {
    let all_failed = !result.errors.is_empty()
        && result.drained_nodes == 0
        && result.un_drained_nodes == 0;
    if all_failed {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response()
    } else {
        (StatusCode::OK, Json(result)).into_response()
    }
}

async fn list_datacenters(State(state): State<ApiState>) -> Response {
    Json(state.service.list_datacenters().await).into_response()
}

async fn get_nodes(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    require_name(&name, "datacenter")?;
    let nodes = state.service.get_nodes(&name).await.map_err(|err| {
        error!(datacenter = %name, error = %err, "failed to get nodes");
        ApiError::from(err)
    })?;
    Ok(Json(nodes).into_response())
}

async fn activate_datacenter(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    require_name(&name, "datacenter")?;
    let result = state.service.activate_datacenter(&name).await.map_err(|err| {
        error!(datacenter = %name, error = %err, "failed to activate datacenter");
        ApiError::from(err)
    })?;
    Ok(activation_response(result))
}

async fn list_jobs(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    require_name(&name, "datacenter")?;
    let jobs = state.service.get_jobs(&name).await?;
    Ok(Json(jobs).into_response())
}

async fn start_job(
    State(state): State<ApiState>,
    Path((name, job_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    require_name(&name, "datacenter")?;
    require_name(&job_id, "job")?;
    let result = state.service.start_job(&name, &job_id).await?;
    Ok(Json(result).into_response())
}

async fn stop_job(
    State(state): State<ApiState>,
    Path((name, job_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    require_name(&name, "datacenter")?;
    require_name(&job_id, "job")?;
    let result = state.service.stop_job(&name, &job_id).await?;
    Ok(Json(result).into_response())
}

async fn list_regions(State(state): State<ApiState>) -> Response {
    Json(state.service.list_regions().await).into_response()
}

async fn region_datacenters(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    require_name(&name, "region")?;
    let datacenters = state.service.datacenters_by_region(&name).await?;
    Ok(Json(datacenters).into_response())
}

async fn activate_region(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    require_name(&name, "region")?;
    let result = state.service.activate_region(&name).await.map_err(|err| {
        error!(region = %name, error = %err, "failed to activate region");
        ApiError::from(err)
    })?;
    Ok(activation_response(result))
}

async fn get_status(State(state): State<ApiState>) -> Response {
    Json(state.service.get_status().await).into_response()
}

async fn render_metrics(State(state): State<ApiState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
