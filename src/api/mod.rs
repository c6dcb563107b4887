/// HTTP API Layer
///
/// REST endpoints for definitions, workspaces, executions, approvals and the
/// ledger. Errors cross this boundary as structured JSON with mapped status
/// codes, never as opaque panics.

pub mod approvals;
pub mod definitions;
pub mod executions;
pub mod ledger;
pub mod workspaces;

use crate::error::EngineError;
use crate::hitl::ApprovalGateway;
use crate::ledger::LedgerEngine;
use crate::runtime::{ExecutionEngine, ResumeSweeper};
use crate::workflow::{ContextStore, DefinitionRegistry, DefinitionStorage};
use crate::workspace::{WorkspaceCatalog, WorkspaceDatabaseManager};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Application state containing the shared engine components
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<WorkspaceDatabaseManager>,
    pub catalog: WorkspaceCatalog,
    pub storage: DefinitionStorage,
    pub registry: Arc<DefinitionRegistry>,
    pub contexts: ContextStore,
    pub gateway: ApprovalGateway,
    pub ledger: LedgerEngine,
    pub engine: Arc<ExecutionEngine>,
    pub sweeper: Arc<ResumeSweeper>,
}

/// Structured API error with a status code derived from the taxonomy
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(EngineError::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_) | EngineError::ApprovalAlreadyResolved(_) => {
                StatusCode::CONFLICT
            }
            EngineError::UnbalancedTransaction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::ExternalActionFailure { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Storage(_) | EngineError::Serialization(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!("API request failed: {}", self.0);
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Parse a path segment as a UUID or fail with a 400
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError(EngineError::Validation(format!("'{raw}' is not a valid id"))))
}
