/// Human-in-the-loop REST API endpoints (operator/UI surface)
///
/// Listing pending requests and resolving them. Approval only flips the
/// request; the resumption itself happens through the executions API or the
/// background sweeper, keeping the two independently retryable.

use crate::api::{parse_id, ApiError, AppState};
use crate::hitl::ApprovalRequest;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

/// Request body for approving
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
}

/// Request body for rejecting
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reviewer: String,
    pub reason: String,
}

/// Create the approval routes
pub fn create_approval_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workspaces/{workspace}/approvals", get(list_pending))
        .route("/api/workspaces/{workspace}/approvals/{id}/approve", post(approve))
        .route("/api/workspaces/{workspace}/approvals/{id}/reject", post(reject))
}

/// List pending approval requests in a workspace
///
/// GET /api/workspaces/:workspace/approvals
async fn list_pending(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    let pending = state.gateway.list_pending(&workspace).await?;
    Ok(Json(pending))
}

/// Approve a pending request
///
/// POST /api/workspaces/:workspace/approvals/:id/approve
/// Body: { "reviewer": "ops@acme" }
async fn approve(
    State(state): State<AppState>,
    Path((workspace, id)): Path<(String, String)>,
    Json(payload): Json<ApproveRequest>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let request = state
        .gateway
        .approve(&workspace, parse_id(&id)?, &payload.reviewer)
        .await?;
    Ok(Json(request))
}

/// Reject a pending request
///
/// POST /api/workspaces/:workspace/approvals/:id/reject
/// Body: { "reviewer": "ops@acme", "reason": "vendor mismatch" }
///
/// The paired execution is failed by the sweeper on its next pass.
async fn reject(
    State(state): State<AppState>,
    Path((workspace, id)): Path<(String, String)>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let request = state
        .gateway
        .reject(&workspace, parse_id(&id)?, &payload.reviewer, &payload.reason)
        .await?;
    Ok(Json(request))
}
