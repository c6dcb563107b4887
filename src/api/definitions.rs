/// Workflow definition management REST API endpoints
///
/// Provides CRUD for workflow definitions with hot-reload support. Every
/// change compiles the definition first, so an invalid graph never reaches
/// storage or the registry.

use crate::api::{ApiError, AppState};
use crate::error::EngineError;
use crate::workflow::registry::compile_definition;
use crate::workflow::types::WorkflowDefinition;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for definition creation/update operations
#[derive(Debug, Serialize)]
pub struct DefinitionResponse {
    pub id: String,
    pub message: String,
}

/// Request body for definition creation and update
#[derive(Debug, Deserialize)]
pub struct SaveDefinitionRequest {
    pub definition: WorkflowDefinition,
}

/// Create the definition management routes
pub fn create_definition_routes() -> Router<AppState> {
    Router::new()
        .route("/api/definitions", post(create_definition))
        .route("/api/definitions", get(list_definitions))
        .route("/api/definitions/{id}", get(get_definition))
        .route("/api/definitions/{id}", put(update_definition))
        .route("/api/definitions/{id}", delete(delete_definition))
}

/// Create a new workflow definition
///
/// POST /api/definitions
async fn create_definition(
    State(state): State<AppState>,
    Json(payload): Json<SaveDefinitionRequest>,
) -> Result<Json<DefinitionResponse>, ApiError> {
    let definition = payload.definition;

    if definition.id.is_empty() || definition.name.is_empty() {
        return Err(EngineError::Validation("definition needs an id and a name".to_string()).into());
    }
    if state.storage.get_definition(&definition.id).await?.is_some() {
        return Err(EngineError::InvalidState(format!(
            "definition '{}' already exists",
            definition.id
        ))
        .into());
    }

    // Compile before persisting; a broken graph never reaches storage
    compile_definition(definition.clone())
        .map_err(|e| EngineError::Validation(e.to_string()))?;

    state.storage.save_definition(&definition).await?;
    state.registry.reload_definition(&definition.id).await?;

    tracing::info!("🔥 Created definition: {} ({})", definition.id, definition.name);

    Ok(Json(DefinitionResponse {
        id: definition.id.clone(),
        message: format!("Workflow '{}' created successfully", definition.name),
    }))
}

/// List all definitions
///
/// GET /api/definitions
async fn list_definitions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let definitions = state.storage.list_definitions().await?;
    Ok(Json(json!({ "definitions": definitions })))
}

/// Get a specific definition by id
///
/// GET /api/definitions/:id
async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    let definition = state
        .storage
        .get_definition(&id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("definition '{id}'")))?;
    Ok(Json(definition))
}

/// Update an existing definition
///
/// PUT /api/definitions/:id
async fn update_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveDefinitionRequest>,
) -> Result<Json<DefinitionResponse>, ApiError> {
    let mut definition = payload.definition;
    definition.id = id.clone();

    if definition.name.is_empty() {
        return Err(EngineError::Validation("definition needs a name".to_string()).into());
    }
    if state.storage.get_definition(&id).await?.is_none() {
        return Err(EngineError::NotFound(format!("definition '{id}'")).into());
    }

    compile_definition(definition.clone())
        .map_err(|e| EngineError::Validation(e.to_string()))?;

    state.storage.save_definition(&definition).await?;
    state.registry.reload_definition(&definition.id).await?;

    tracing::info!("🔥 Hot-reloaded definition: {} ({})", definition.id, definition.name);

    Ok(Json(DefinitionResponse {
        id: definition.id.clone(),
        message: format!("Workflow '{}' updated successfully", definition.name),
    }))
}

/// Delete a definition
///
/// DELETE /api/definitions/:id
///
/// In-flight executions keep the compiled plan they started with; only new
/// runs are affected.
async fn delete_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.remove_definition(&id);

    if !state.storage.delete_definition(&id).await? {
        return Err(EngineError::NotFound(format!("definition '{id}'")).into());
    }

    tracing::info!("Deleted definition: {}", id);
    Ok(Json(json!({ "message": "Workflow definition deleted successfully" })))
}
