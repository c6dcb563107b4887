/// Workspace provisioning REST API endpoints
///
/// Provisioning creates the isolated workspace database, registers the slug
/// in the catalog, and seeds the default chart of accounts.

use crate::api::{ApiError, AppState};
use crate::error::EngineError;
use crate::workspace::Workspace;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

/// Request body for workspace provisioning
#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub slug: String,
    pub name: String,
}

/// Create the workspace routes
pub fn create_workspace_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workspaces", post(create_workspace))
        .route("/api/workspaces", get(list_workspaces))
        .route("/api/workspaces/{slug}", get(get_workspace))
}

/// Provision a new workspace
///
/// POST /api/workspaces
/// Body: { "slug": "acme", "name": "Acme GmbH" }
async fn create_workspace(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkspaceRequest>,
) -> Result<Json<Workspace>, ApiError> {
    if payload.slug.is_empty()
        || !payload
            .slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::Validation(format!(
            "workspace slug '{}' must be non-empty and url-safe",
            payload.slug
        ))
        .into());
    }

    if !state.catalog.create(&payload.slug, &payload.name).await? {
        return Err(
            EngineError::InvalidState(format!("workspace '{}' already exists", payload.slug))
                .into(),
        );
    }

    // Create the isolated database and seed the chart of accounts
    state.manager.workspace_pool(&payload.slug).await?;
    state.ledger.seed_default_chart(&payload.slug).await?;

    let workspace = state
        .catalog
        .get(&payload.slug)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("workspace '{}'", payload.slug)))?;

    tracing::info!("🏗️ Provisioned workspace: {} ({})", workspace.slug, workspace.name);
    Ok(Json(workspace))
}

/// List all workspaces
///
/// GET /api/workspaces
async fn list_workspaces(State(state): State<AppState>) -> Result<Json<Vec<Workspace>>, ApiError> {
    Ok(Json(state.catalog.list().await?))
}

/// Get one workspace
///
/// GET /api/workspaces/:slug
async fn get_workspace(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Workspace>, ApiError> {
    let workspace = state
        .catalog
        .get(&slug)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("workspace '{slug}'")))?;
    Ok(Json(workspace))
}
