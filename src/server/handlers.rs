use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::SharedState;
use crate::error::{ApiError, ApiResult};
use crate::storage::{HistoryNode, PipelineRun, RunStatus, Storage};
use crate::tree::{build_forest, TreeNode, MAX_NESTED_DEPTH};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest {
        message: rejection.body_text(),
    }
}

/// Body of `POST /api/simulate`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    /// The divergence to simulate.
    pub user_input: String,
    /// Write into this timeline instead of the default selection.
    #[serde(default)]
    pub timeline_id: Option<String>,
}

/// Response of `POST /api/simulate`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    pub status: String,
    pub timeline_id: String,
    pub run_id: String,
}

/// Start a pipeline run.
///
/// Returns once the divergence node is stored; the remaining stages run in
/// the background.
pub async fn simulate(
    State(state): State<SharedState>,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> ApiResult<Json<SimulateResponse>> {
    let Json(request) = payload.map_err(bad_json)?;

    let run = state
        .orchestrator
        .start(&request.user_input, request.timeline_id.as_deref())
        .await?;

    state.orchestrator.spawn(run.id.clone());

    info!(run_id = %run.id, timeline_id = %run.timeline_id, "Simulation started");

    Ok(Json(SimulateResponse {
        status: "started".to_string(),
        timeline_id: run.timeline_id,
        run_id: run.id,
    }))
}

/// Query string of the timeline endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineQuery {
    pub timeline_id: Option<String>,
}

fn resolve_timeline(state: &SharedState, query: TimelineQuery) -> ApiResult<String> {
    query
        .timeline_id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| state.orchestrator.shared_timeline_id().map(str::to_string))
        .ok_or_else(|| ApiError::BadRequest {
            message: "timelineId query parameter is required".to_string(),
        })
}

/// Flat node list of a timeline
pub async fn get_timeline(
    State(state): State<SharedState>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<Json<Vec<HistoryNode>>> {
    let timeline_id = resolve_timeline(&state, query)?;
    let nodes = state.timelines().list(&timeline_id).await?;
    Ok(Json(nodes))
}

/// Reconstructed forest of a timeline
pub async fn get_timeline_tree(
    State(state): State<SharedState>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<Json<Vec<TreeNode>>> {
    let timeline_id = resolve_timeline(&state, query)?;
    let nodes = state.timelines().list(&timeline_id).await?;
    let forest = build_forest(nodes);

    if let Some(depth) = forest.iter().map(TreeNode::depth).max() {
        if depth > MAX_NESTED_DEPTH {
            return Err(ApiError::BadRequest {
                message: format!(
                    "Timeline {} is {} levels deep; nested view supports {}",
                    timeline_id, depth, MAX_NESTED_DEPTH
                ),
            });
        }
    }

    Ok(Json(forest))
}

/// Status record of a run
pub async fn get_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<PipelineRun>> {
    Ok(Json(state.orchestrator.status(&run_id).await?))
}

/// Response of `POST /api/runs/{runId}/resume`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    pub status: String,
    pub run_id: String,
    pub timeline_id: String,
}

/// Re-drive an unfinished run from its last checkpoint
pub async fn resume_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<(StatusCode, Json<ResumeResponse>)> {
    let run = state.orchestrator.status(&run_id).await?;

    if run.status == RunStatus::Completed {
        return Err(ApiError::Conflict {
            message: format!("Run already completed: {}", run_id),
        });
    }
    if state.orchestrator.is_active(&run_id) {
        return Err(ApiError::Conflict {
            message: format!("Run already in progress: {}", run_id),
        });
    }

    state.orchestrator.spawn(run.id.clone());

    info!(run_id = %run.id, from_stage = run.current_stage, "Run resumed");

    Ok((
        StatusCode::ACCEPTED,
        Json(ResumeResponse {
            status: "resumed".to_string(),
            run_id: run.id,
            timeline_id: run.timeline_id,
        }),
    ))
}

/// Response of the store `add` RPC
#[derive(Debug, Serialize)]
pub struct AddResponse {
    pub success: bool,
}

/// Store RPC: upsert one node into a timeline
pub async fn store_add(
    State(state): State<SharedState>,
    Path(timeline_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<AddResponse>> {
    let Json(value) = payload.map_err(bad_json)?;
    let node = HistoryNode::from_json(value)?;

    state.timelines().handle(&timeline_id).add(node).await?;

    Ok(Json(AddResponse { success: true }))
}

/// Store RPC: every node stored under a timeline
pub async fn store_tree(
    State(state): State<SharedState>,
    Path(timeline_id): Path<String>,
) -> ApiResult<Json<Vec<HistoryNode>>> {
    let nodes = state.timelines().list(&timeline_id).await?;
    Ok(Json(nodes))
}

/// Response of `GET /health`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub database: bool,
    pub active_timelines: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthStatus> {
    let database = state.storage.ping().await.is_ok();

    Json(HealthStatus {
        status: if database { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database,
        active_timelines: state.timelines().active_timelines(),
    })
}
