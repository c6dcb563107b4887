/// The approval gateway
///
/// Persists approval requests and enforces single resolution: a request
/// leaves PENDING exactly once, via a status-guarded update. A lost request
/// would strand its execution in WAITING_APPROVAL forever, so persistence
/// failures here are surfaced loudly, never swallowed.

use crate::error::EngineError;
use crate::hitl::types::{ApprovalRequest, ApprovalStatus};
use crate::workspace::WorkspaceDatabaseManager;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ApprovalGateway {
    manager: Arc<WorkspaceDatabaseManager>,
}

impl ApprovalGateway {
    pub fn new(manager: Arc<WorkspaceDatabaseManager>) -> Self {
        Self { manager }
    }

    async fn pool(&self, workspace: &str) -> Result<SqlitePool, EngineError> {
        self.manager.workspace_pool(workspace).await.map_err(EngineError::Internal)
    }

    /// Record a PENDING intervention request for a paused step
    pub async fn request_intervention(
        &self,
        workspace: &str,
        execution_id: Uuid,
        step_id: &str,
        reason: &str,
        params: Value,
    ) -> Result<ApprovalRequest, EngineError> {
        let pool = self.pool(workspace).await?;

        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            workspace: workspace.to_string(),
            execution_id,
            step_id: step_id.to_string(),
            reason: reason.to_string(),
            params,
            status: ApprovalStatus::Pending,
            reviewer: None,
            review_note: None,
            requested_at: Utc::now(),
            reviewed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO approval_requests
                (id, workspace, execution_id, step_id, reason, params, status,
                 reviewer, review_note, requested_at, reviewed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, NULL)
            "#,
        )
        .bind(request.id.to_string())
        .bind(&request.workspace)
        .bind(request.execution_id.to_string())
        .bind(&request.step_id)
        .bind(&request.reason)
        .bind(request.params.to_string())
        .bind(request.status.as_str())
        .bind(request.requested_at.to_rfc3339())
        .execute(&pool)
        .await?;

        tracing::info!(
            "✋ Intervention requested for step '{}' of execution {}: {}",
            step_id,
            execution_id,
            reason
        );
        Ok(request)
    }

    /// Approve a PENDING request
    pub async fn approve(
        &self,
        workspace: &str,
        request_id: Uuid,
        reviewer: &str,
    ) -> Result<ApprovalRequest, EngineError> {
        self.resolve(workspace, request_id, ApprovalStatus::Approved, reviewer, None).await
    }

    /// Reject a PENDING request
    pub async fn reject(
        &self,
        workspace: &str,
        request_id: Uuid,
        reviewer: &str,
        note: &str,
    ) -> Result<ApprovalRequest, EngineError> {
        self.resolve(workspace, request_id, ApprovalStatus::Rejected, reviewer, Some(note)).await
    }

    /// Single-resolution transition out of PENDING
    ///
    /// The status guard in the UPDATE makes a duplicate approve/reject (a
    /// double UI click, a retried network call) fail with
    /// ApprovalAlreadyResolved while the first decision stands.
    async fn resolve(
        &self,
        workspace: &str,
        request_id: Uuid,
        decision: ApprovalStatus,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<ApprovalRequest, EngineError> {
        let pool = self.pool(workspace).await?;

        let result = sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = ?, reviewer = ?, review_note = ?, reviewed_at = ?
            WHERE id = ? AND workspace = ? AND status = 'PENDING'
            "#,
        )
        .bind(decision.as_str())
        .bind(reviewer)
        .bind(note)
        .bind(Utc::now().to_rfc3339())
        .bind(request_id.to_string())
        .bind(workspace)
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish an unknown id from a double resolution
            return match self.get_request(workspace, request_id).await? {
                Some(_) => Err(EngineError::ApprovalAlreadyResolved(request_id)),
                None => Err(EngineError::NotFound(format!("approval request {request_id}"))),
            };
        }

        tracing::info!(
            "✅ Approval request {} resolved as {} by {}",
            request_id,
            decision.as_str(),
            reviewer
        );

        self.get_request(workspace, request_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("approval request {request_id}")))
    }

    pub async fn get_request(
        &self,
        workspace: &str,
        request_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, EngineError> {
        let pool = self.pool(workspace).await?;

        let row = sqlx::query(
            r#"
            SELECT id, workspace, execution_id, step_id, reason, params, status,
                   reviewer, review_note, requested_at, reviewed_at
            FROM approval_requests WHERE workspace = ? AND id = ?
            "#,
        )
        .bind(workspace)
        .bind(request_id.to_string())
        .fetch_optional(&pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    /// Latest request recorded for a specific paused step instance
    pub async fn find_for_step(
        &self,
        workspace: &str,
        execution_id: Uuid,
        step_id: &str,
    ) -> Result<Option<ApprovalRequest>, EngineError> {
        let pool = self.pool(workspace).await?;

        let row = sqlx::query(
            r#"
            SELECT id, workspace, execution_id, step_id, reason, params, status,
                   reviewer, review_note, requested_at, reviewed_at
            FROM approval_requests
            WHERE workspace = ? AND execution_id = ? AND step_id = ?
            ORDER BY requested_at DESC LIMIT 1
            "#,
        )
        .bind(workspace)
        .bind(execution_id.to_string())
        .bind(step_id)
        .fetch_optional(&pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    /// All PENDING requests in a workspace (operator/UI surface)
    pub async fn list_pending(&self, workspace: &str) -> Result<Vec<ApprovalRequest>, EngineError> {
        let pool = self.pool(workspace).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, workspace, execution_id, step_id, reason, params, status,
                   reviewer, review_note, requested_at, reviewed_at
            FROM approval_requests WHERE workspace = ? AND status = 'PENDING'
            ORDER BY requested_at
            "#,
        )
        .bind(workspace)
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(row_to_request).collect()
    }

    /// Resolved requests whose execution is still parked in WAITING_APPROVAL
    ///
    /// This is what the resume sweeper drains: approvals waiting to be
    /// resumed and rejections waiting to fail their execution.
    pub async fn list_actionable(
        &self,
        workspace: &str,
    ) -> Result<Vec<ApprovalRequest>, EngineError> {
        let pool = self.pool(workspace).await?;

        let rows = sqlx::query(
            r#"
            SELECT r.id, r.workspace, r.execution_id, r.step_id, r.reason, r.params, r.status,
                   r.reviewer, r.review_note, r.requested_at, r.reviewed_at
            FROM approval_requests r
            JOIN workflow_contexts c ON c.id = r.execution_id
            WHERE r.workspace = ? AND r.status IN ('APPROVED', 'REJECTED')
              AND c.status = 'WAITING_APPROVAL'
            ORDER BY r.reviewed_at
            "#,
        )
        .bind(workspace)
        .fetch_all(&pool)
        .await?;

        rows.into_iter().map(row_to_request).collect()
    }
}

fn row_to_request(row: SqliteRow) -> Result<ApprovalRequest, EngineError> {
    let status_raw: String = row.get("status");
    let status = ApprovalStatus::parse(&status_raw).ok_or_else(|| {
        EngineError::Validation(format!("corrupt approval status '{status_raw}' in storage"))
    })?;

    Ok(ApprovalRequest {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        workspace: row.get("workspace"),
        execution_id: parse_uuid(&row.get::<String, _>("execution_id"))?,
        step_id: row.get("step_id"),
        reason: row.get("reason"),
        params: serde_json::from_str(&row.get::<String, _>("params"))?,
        status,
        reviewer: row.get("reviewer"),
        review_note: row.get("review_note"),
        requested_at: parse_timestamp(&row.get::<String, _>("requested_at"))?,
        reviewed_at: row
            .get::<Option<String>, _>("reviewed_at")
            .map(|ts| parse_timestamp(&ts))
            .transpose()?,
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

    async fn gateway() -> ApprovalGateway {
        ApprovalGateway::new(Arc::new(WorkspaceDatabaseManager::in_memory()))
    }

    #[tokio::test]
    async fn request_starts_pending_and_is_listed() {
        let gateway = gateway().await;
        let execution_id = Uuid::new_v4();

        let request = gateway
            .request_intervention("acme", execution_id, "process", "confidence too low", json!({}))
            .await
            .unwrap();

        assert_eq!(request.status, ApprovalStatus::Pending);
        let pending = gateway.list_pending("acme").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, request.id);

        let found = gateway
            .find_for_step("acme", execution_id, "process")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, request.id);
    }

    #[tokio::test]
    async fn approval_resolves_exactly_once() {
        let gateway = gateway().await;
        let request = gateway
            .request_intervention("acme", Uuid::new_v4(), "process", "low confidence", json!({}))
            .await
            .unwrap();

        let approved = gateway.approve("acme", request.id, "reviewer@acme").await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.reviewer.as_deref(), Some("reviewer@acme"));
        assert!(approved.reviewed_at.is_some());

        // The second resolution fails and the first decision stands
        let err = gateway
            .reject("acme", request.id, "someone-else", "changed my mind")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ApprovalAlreadyResolved(_)));

        let reloaded = gateway.get_request("acme", request.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn rejection_sticks_against_a_later_approve() {
        let gateway = gateway().await;
        let request = gateway
            .request_intervention("acme", Uuid::new_v4(), "process", "low confidence", json!({}))
            .await
            .unwrap();

        let rejected = gateway
            .reject("acme", request.id, "reviewer@acme", "vendor mismatch")
            .await
            .unwrap();
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
        assert_eq!(rejected.review_note.as_deref(), Some("vendor mismatch"));

        let err = gateway.approve("acme", request.id, "reviewer@acme").await.unwrap_err();
        assert!(matches!(err, EngineError::ApprovalAlreadyResolved(_)));

        assert!(gateway.list_pending("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_requests_are_not_found() {
        let gateway = gateway().await;
        let err = gateway.approve("acme", Uuid::new_v4(), "reviewer").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
