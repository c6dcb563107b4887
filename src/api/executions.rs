/// Workflow execution REST API endpoints
///
/// Starting, inspecting, resuming and cancelling executions. A non-error
/// response is not success: callers must inspect the returned context's
/// status, since WAITING_APPROVAL and FAILED come back as 200s.

use crate::api::{parse_id, ApiError, AppState};
use crate::workflow::types::WorkflowContext;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;

/// Request body for starting an execution
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub input: Value,
}

/// Request body for resuming a paused execution
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub step_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Create the execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workspaces/{workspace}/executions", post(execute_workflow))
        .route("/api/workspaces/{workspace}/executions", get(list_executions))
        .route("/api/workspaces/{workspace}/executions/{id}", get(get_execution))
        .route("/api/workspaces/{workspace}/executions/{id}/resume", post(resume_execution))
        .route("/api/workspaces/{workspace}/executions/{id}/cancel", post(cancel_execution))
}

/// Start a workflow execution
///
/// POST /api/workspaces/:workspace/executions
/// Body: { "workflow_id": "wf-invoice-intake", "input": { ... } }
async fn execute_workflow(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<Json<WorkflowContext>, ApiError> {
    let context = state
        .engine
        .execute_workflow(&workspace, &payload.workflow_id, payload.input)
        .await?;
    Ok(Json(context))
}

/// List recent executions in a workspace
///
/// GET /api/workspaces/:workspace/executions?limit=50
async fn list_executions(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<WorkflowContext>>, ApiError> {
    let executions = state.contexts.list_recent(&workspace, query.limit).await?;
    Ok(Json(executions))
}

/// Get one execution
///
/// GET /api/workspaces/:workspace/executions/:id
async fn get_execution(
    State(state): State<AppState>,
    Path((workspace, id)): Path<(String, String)>,
) -> Result<Json<WorkflowContext>, ApiError> {
    let context = state.engine.get_execution(&workspace, parse_id(&id)?).await?;
    Ok(Json(context))
}

/// Resume a paused execution whose approval has been granted
///
/// POST /api/workspaces/:workspace/executions/:id/resume
/// Body: { "step_id": "process_invoice" }
async fn resume_execution(
    State(state): State<AppState>,
    Path((workspace, id)): Path<(String, String)>,
    Json(payload): Json<ResumeRequest>,
) -> Result<Json<WorkflowContext>, ApiError> {
    let context = state
        .engine
        .resume_workflow(&workspace, parse_id(&id)?, &payload.step_id)
        .await?;
    Ok(Json(context))
}

/// Cancel a live execution
///
/// POST /api/workspaces/:workspace/executions/:id/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path((workspace, id)): Path<(String, String)>,
) -> Result<Json<WorkflowContext>, ApiError> {
    let context = state.engine.cancel_execution(&workspace, parse_id(&id)?).await?;
    Ok(Json(context))
}
