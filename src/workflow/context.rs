/// Durable execution context store
///
/// Persists workflow contexts into the owning workspace database. Every
/// mutation is an optimistic compare-and-swap on the version column: two
/// concurrent writers to the same execution cannot both succeed, the loser
/// observes zero affected rows and fails with InvalidState.

use crate::error::EngineError;
use crate::workflow::types::{ExecutionStatus, WorkflowContext};
use crate::workspace::WorkspaceDatabaseManager;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Context store over workspace-isolated storage
#[derive(Debug, Clone)]
pub struct ContextStore {
    manager: Arc<WorkspaceDatabaseManager>,
}

impl ContextStore {
    pub fn new(manager: Arc<WorkspaceDatabaseManager>) -> Self {
        Self { manager }
    }

    async fn pool(&self, workspace: &str) -> Result<SqlitePool, EngineError> {
        self.manager.workspace_pool(workspace).await.map_err(EngineError::Internal)
    }

    /// Persist a fresh context. Must complete before the first step runs.
    pub async fn insert(&self, context: &WorkflowContext) -> Result<(), EngineError> {
        let pool = self.pool(&context.workspace).await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_contexts
                (id, workspace, workflow_id, status, current_step, input, outputs,
                 pending, error, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(context.id.to_string())
        .bind(&context.workspace)
        .bind(&context.workflow_id)
        .bind(context.status.as_str())
        .bind(&context.current_step)
        .bind(context.input.to_string())
        .bind(serde_json::to_string(&context.outputs)?)
        .bind(context.pending.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&context.error)
        .bind(context.version)
        .bind(context.created_at.to_rfc3339())
        .bind(context.updated_at.to_rfc3339())
        .execute(&pool)
        .await?;

        Ok(())
    }

    /// Load a context by id within a workspace
    pub async fn load(
        &self,
        workspace: &str,
        id: Uuid,
    ) -> Result<Option<WorkflowContext>, EngineError> {
        let pool = self.pool(workspace).await?;

        let row = sqlx::query(
            r#"
            SELECT id, workspace, workflow_id, status, current_step, input, outputs,
                   pending, error, version, created_at, updated_at
            FROM workflow_contexts WHERE workspace = ? AND id = ?
            "#,
        )
        .bind(workspace)
        .bind(id.to_string())
        .fetch_optional(&pool)
        .await?;

        row.map(row_to_context).transpose()
    }

    /// Load a context or fail with NotFound
    pub async fn load_required(
        &self,
        workspace: &str,
        id: Uuid,
    ) -> Result<WorkflowContext, EngineError> {
        self.load(workspace, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("execution {id}")))
    }

    /// Durable checkpoint via compare-and-swap on the version column
    ///
    /// On success the caller's context reflects the persisted version. Zero
    /// affected rows means a concurrent writer got there first; the caller
    /// must reload and re-decide rather than blindly retry.
    pub async fn checkpoint(&self, context: &mut WorkflowContext) -> Result<(), EngineError> {
        let pool = self.pool(&context.workspace).await?;
        let updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE workflow_contexts
            SET status = ?, current_step = ?, outputs = ?, pending = ?, error = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND workspace = ? AND version = ?
            "#,
        )
        .bind(context.status.as_str())
        .bind(&context.current_step)
        .bind(serde_json::to_string(&context.outputs)?)
        .bind(context.pending.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&context.error)
        .bind(updated_at.to_rfc3339())
        .bind(context.id.to_string())
        .bind(&context.workspace)
        .bind(context.version)
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::InvalidState(format!(
                "execution {} was modified concurrently",
                context.id
            )));
        }

        context.version += 1;
        context.updated_at = updated_at;
        Ok(())
    }

    /// Cancel an execution if it is still live
    ///
    /// Status-guarded update: terminal executions are left untouched and the
    /// caller gets InvalidState.
    pub async fn cancel(&self, workspace: &str, id: Uuid) -> Result<WorkflowContext, EngineError> {
        let pool = self.pool(workspace).await?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_contexts
            SET status = 'CANCELLED', pending = NULL, version = version + 1, updated_at = ?
            WHERE id = ? AND workspace = ? AND status IN ('RUNNING', 'WAITING_APPROVAL')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(workspace)
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            let existing = self.load_required(workspace, id).await?;
            return Err(EngineError::InvalidState(format!(
                "execution {} is {} and cannot be cancelled",
                id,
                existing.status.as_str()
            )));
        }

        self.load_required(workspace, id).await
    }

    /// Most recently updated executions in a workspace
    pub async fn list_recent(
        &self,
        workspace: &str,
        limit: i64,
    ) -> Result<Vec<WorkflowContext>, EngineError> {
        let pool = self.pool(workspace).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, workspace, workflow_id, status, current_step, input, outputs,
                   pending, error, version, created_at, updated_at
            FROM workflow_contexts WHERE workspace = ?
            ORDER BY updated_at DESC LIMIT ?
            "#,
        )
        .bind(workspace)
        .bind(limit)
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(row_to_context).collect()
    }
}

fn row_to_context(row: SqliteRow) -> Result<WorkflowContext, EngineError> {
    let status_raw: String = row.get("status");
    let status = ExecutionStatus::parse(&status_raw).ok_or_else(|| {
        EngineError::Validation(format!("corrupt execution status '{status_raw}' in storage"))
    })?;

    Ok(WorkflowContext {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        workspace: row.get("workspace"),
        workflow_id: row.get("workflow_id"),
        status,
        current_step: row.get("current_step"),
        input: serde_json::from_str(&row.get::<String, _>("input"))?,
        outputs: serde_json::from_str(&row.get::<String, _>("outputs"))?,
        pending: row
            .get::<Option<String>, _>("pending")
            .map(|p| serde_json::from_str(&p))
            .transpose()?,
        error: row.get("error"),
        version: row.get("version"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(s).map_err(|_| EngineError::Validation(format!("corrupt id '{s}' in storage")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| EngineError::Validation(format!("corrupt timestamp '{s}' in storage")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> ContextStore {
        ContextStore::new(Arc::new(WorkspaceDatabaseManager::in_memory()))
    }

    #[tokio::test]
    async fn insert_and_load_roundtrip() {
        let store = store().await;
        let context = WorkflowContext::new("acme", "wf-invoice", "process", json!({"n": 1}));
        store.insert(&context).await.unwrap();

        let loaded = store.load_required("acme", context.id).await.unwrap();
        assert_eq!(loaded.workflow_id, "wf-invoice");
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.current_step.as_deref(), Some("process"));
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn checkpoint_bumps_version_and_rejects_stale_writers() {
        let store = store().await;
        let mut context = WorkflowContext::new("acme", "wf-invoice", "process", json!({}));
        store.insert(&context).await.unwrap();

        let mut stale = context.clone();

        context.outputs.insert("process".to_string(), json!({"ok": true}));
        store.checkpoint(&mut context).await.unwrap();
        assert_eq!(context.version, 1);

        // The stale copy still carries version 0 and must lose the swap
        stale.status = ExecutionStatus::Completed;
        let err = store.checkpoint(&mut stale).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let loaded = store.load_required("acme", context.id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn cancel_only_touches_live_executions() {
        let store = store().await;
        let mut context = WorkflowContext::new("acme", "wf-invoice", "process", json!({}));
        store.insert(&context).await.unwrap();

        let cancelled = store.cancel("acme", context.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

        // Terminal now: a second cancel is an InvalidState, not a silent success
        let err = store.cancel("acme", context.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // And the in-flight engine copy lost its swap window
        context.status = ExecutionStatus::Completed;
        let err = store.checkpoint(&mut context).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = store.load_required("acme", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
