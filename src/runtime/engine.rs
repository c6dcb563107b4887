/// The workflow execution engine
///
/// Interprets a compiled definition against a durable execution context:
/// advances step by step, checkpoints at every boundary, pauses when a
/// confidence gate trips, and resumes from the recorded snapshot once the
/// paired approval is granted. Constructed once at process start and shared
/// by reference; all per-run state lives in the context store.

use crate::error::EngineError;
use crate::hitl::{ApprovalGateway, ApprovalStatus};
use crate::runtime::executor::{resolve_params, ActionDispatch};
use crate::workflow::{
    types::{ExecutionStatus, PendingStep, WorkflowContext, WorkflowStep},
    CompiledDefinition, ContextStore, DefinitionRegistry,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub struct ExecutionEngine {
    registry: Arc<DefinitionRegistry>,
    contexts: ContextStore,
    gateway: ApprovalGateway,
    dispatcher: Arc<dyn ActionDispatch>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        contexts: ContextStore,
        gateway: ApprovalGateway,
        dispatcher: Arc<dyn ActionDispatch>,
    ) -> Self {
        Self {
            registry,
            contexts,
            gateway,
            dispatcher,
        }
    }

    /// Start a new execution of a workflow definition
    ///
    /// The fresh context is durably persisted before the first step runs.
    /// The returned context carries the outcome as its status: callers must
    /// inspect it, since WAITING_APPROVAL and FAILED are valid non-error
    /// returns.
    pub async fn execute_workflow(
        &self,
        workspace: &str,
        definition_id: &str,
        input: Value,
    ) -> Result<WorkflowContext, EngineError> {
        let compiled = self
            .registry
            .get(definition_id)
            .ok_or_else(|| EngineError::NotFound(format!("workflow definition '{definition_id}'")))?;

        let context = WorkflowContext::new(
            workspace,
            definition_id,
            &compiled.definition.start_step,
            input,
        );
        self.contexts.insert(&context).await?;

        tracing::info!(
            "🚀 Starting execution {} of workflow '{}' in workspace {}",
            context.id,
            definition_id,
            workspace
        );

        self.run_from(&compiled, context, 0).await
    }

    /// Resume a paused execution at its recorded step
    ///
    /// Preconditions: the execution is WAITING_APPROVAL and the paired
    /// approval request for `step_id` is APPROVED. The transition back to
    /// RUNNING is a compare-and-swap, so of two concurrent resume calls only
    /// one proceeds; the other observes a stale version and fails cleanly.
    pub async fn resume_workflow(
        &self,
        workspace: &str,
        execution_id: Uuid,
        step_id: &str,
    ) -> Result<WorkflowContext, EngineError> {
        let mut context = self.contexts.load_required(workspace, execution_id).await?;

        if context.status != ExecutionStatus::WaitingApproval {
            return Err(EngineError::InvalidState(format!(
                "execution {} is {}, not WAITING_APPROVAL",
                execution_id,
                context.status.as_str()
            )));
        }

        let pending = context.pending.clone().ok_or_else(|| {
            EngineError::InvalidState(format!(
                "execution {execution_id} has no pending step snapshot"
            ))
        })?;
        if pending.step_id != step_id {
            return Err(EngineError::InvalidState(format!(
                "execution {} is paused at '{}', not '{}'",
                execution_id, pending.step_id, step_id
            )));
        }

        let request = self
            .gateway
            .find_for_step(workspace, execution_id, step_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("approval request for step '{step_id}'"))
            })?;
        match request.status {
            ApprovalStatus::Approved => {}
            ApprovalStatus::Pending => {
                return Err(EngineError::InvalidState(format!(
                    "approval for step '{step_id}' is still pending"
                )))
            }
            ApprovalStatus::Rejected => {
                return Err(EngineError::InvalidState(format!(
                    "approval for step '{step_id}' was rejected"
                )))
            }
        }

        let compiled = self.registry.get(&context.workflow_id).ok_or_else(|| {
            EngineError::NotFound(format!("workflow definition '{}'", context.workflow_id))
        })?;
        let step = compiled
            .step(step_id)
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "step '{}' in workflow '{}'",
                    step_id, context.workflow_id
                ))
            })?
            .clone();
        let pos = compiled.position(step_id).ok_or_else(|| {
            EngineError::InvalidState(format!("step '{step_id}' is not in the execution plan"))
        })?;

        // CAS back to RUNNING; the losing resume call errors out here
        context.status = ExecutionStatus::Running;
        context.pending = None;
        self.contexts.checkpoint(&mut context).await?;

        tracing::info!("▶️ Resuming execution {} at step '{}'", execution_id, step_id);

        // Re-execute with the recorded snapshot. The human decision overrides
        // the confidence gate, so the step cannot re-pause on this decision.
        let outcome = match self.dispatcher.execute(&step, pending.params.clone(), &context).await {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(context, &err).await,
        };
        context.outputs.insert(step_id.to_string(), outcome.output);

        let next = pos + 1;
        if next < compiled.order.len() {
            context.current_step = Some(compiled.order[next].clone());
            self.contexts.checkpoint(&mut context).await?;
            self.run_from(&compiled, context, next).await
        } else {
            context.status = ExecutionStatus::Completed;
            context.current_step = None;
            self.contexts.checkpoint(&mut context).await?;
            tracing::info!("🎉 Execution {} completed after resume", execution_id);
            Ok(context)
        }
    }

    /// Cancel a live execution
    ///
    /// Takes effect at the next step boundary; the in-flight action (if any)
    /// finishes but its successor never starts and nothing further is posted.
    pub async fn cancel_execution(
        &self,
        workspace: &str,
        execution_id: Uuid,
    ) -> Result<WorkflowContext, EngineError> {
        let cancelled = self.contexts.cancel(workspace, execution_id).await?;
        tracing::info!("🚫 Execution {} cancelled", execution_id);
        Ok(cancelled)
    }

    /// Fail a WAITING_APPROVAL execution whose approval was rejected
    ///
    /// Resolution of the request is the only trigger that moves a context out
    /// of WAITING_APPROVAL; this is the rejection half of that contract.
    pub async fn apply_rejection(
        &self,
        workspace: &str,
        execution_id: Uuid,
    ) -> Result<WorkflowContext, EngineError> {
        let mut context = self.contexts.load_required(workspace, execution_id).await?;

        if context.status != ExecutionStatus::WaitingApproval {
            return Err(EngineError::InvalidState(format!(
                "execution {} is {}, not WAITING_APPROVAL",
                execution_id,
                context.status.as_str()
            )));
        }
        let pending = context.pending.clone().ok_or_else(|| {
            EngineError::InvalidState(format!(
                "execution {execution_id} has no pending step snapshot"
            ))
        })?;

        let request = self
            .gateway
            .find_for_step(workspace, execution_id, &pending.step_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("approval request for step '{}'", pending.step_id))
            })?;
        if request.status != ApprovalStatus::Rejected {
            return Err(EngineError::InvalidState(format!(
                "approval for step '{}' is {}, not REJECTED",
                pending.step_id,
                request.status.as_str()
            )));
        }

        let reviewer = request.reviewer.unwrap_or_else(|| "unknown".to_string());
        context.status = ExecutionStatus::Failed;
        context.error = Some(format!(
            "step '{}' rejected by {}{}",
            pending.step_id,
            reviewer,
            request
                .review_note
                .map(|note| format!(": {note}"))
                .unwrap_or_default()
        ));
        context.pending = None;
        self.contexts.checkpoint(&mut context).await?;

        tracing::info!("⛔ Execution {} failed on rejected approval", execution_id);
        Ok(context)
    }

    /// Load an execution for callers
    pub async fn get_execution(
        &self,
        workspace: &str,
        execution_id: Uuid,
    ) -> Result<WorkflowContext, EngineError> {
        self.contexts.load_required(workspace, execution_id).await
    }

    /// The step loop: dispatch, gate, checkpoint, advance
    async fn run_from(
        &self,
        compiled: &CompiledDefinition,
        mut context: WorkflowContext,
        mut pos: usize,
    ) -> Result<WorkflowContext, EngineError> {
        while pos < compiled.order.len() {
            // Cancellation is honored at step boundaries, never mid-action
            let fresh = self.contexts.load_required(&context.workspace, context.id).await?;
            match fresh.status {
                ExecutionStatus::Cancelled => {
                    tracing::info!(
                        "🚫 Execution {} observed cancellation before step '{}'",
                        context.id,
                        compiled.order[pos]
                    );
                    return Ok(fresh);
                }
                ExecutionStatus::Running => {
                    context.version = fresh.version;
                }
                other => {
                    return Err(EngineError::InvalidState(format!(
                        "execution {} is {} mid-run",
                        context.id,
                        other.as_str()
                    )))
                }
            }

            let step_id = compiled.order[pos].clone();
            let step = compiled
                .step(&step_id)
                .ok_or_else(|| {
                    EngineError::InvalidState(format!("step '{step_id}' missing from plan"))
                })?
                .clone();
            context.current_step = Some(step_id.clone());

            // Resolve once; the snapshot is what a paused step resumes with.
            // Dispatch happens outside any lock guarding context persistence.
            let params = resolve_params(&step.params, &context);
            let outcome = match self.dispatcher.execute(&step, params.clone(), &context).await {
                Ok(outcome) => outcome,
                Err(err) => return self.fail(context, &err).await,
            };

            if let Some(threshold) = step.confidence_threshold {
                if outcome.confidence < threshold {
                    return self.pause(context, &step, params, outcome.confidence, threshold).await;
                }
            }

            context.outputs.insert(step_id, outcome.output);
            pos += 1;
            if pos < compiled.order.len() {
                context.current_step = Some(compiled.order[pos].clone());
            } else {
                context.status = ExecutionStatus::Completed;
                context.current_step = None;
            }

            // Durable checkpoint at every step boundary
            self.contexts.checkpoint(&mut context).await?;
        }

        tracing::info!("🎉 Execution {} completed", context.id);
        Ok(context)
    }

    /// Park the execution behind a PENDING approval request
    async fn pause(
        &self,
        mut context: WorkflowContext,
        step: &WorkflowStep,
        params: Value,
        confidence: f64,
        threshold: f64,
    ) -> Result<WorkflowContext, EngineError> {
        let reason = format!("confidence {confidence:.2} below threshold {threshold:.2}");

        self.gateway
            .request_intervention(&context.workspace, context.id, &step.id, &reason, params.clone())
            .await?;

        context.status = ExecutionStatus::WaitingApproval;
        context.pending = Some(PendingStep {
            step_id: step.id.clone(),
            params,
            confidence,
            reason: reason.clone(),
        });
        self.contexts.checkpoint(&mut context).await?;

        tracing::info!(
            "⏸️ Execution {} paused at step '{}' ({})",
            context.id,
            step.id,
            reason
        );
        Ok(context)
    }

    /// Convert a step failure into a FAILED execution with the cause recorded
    async fn fail(
        &self,
        mut context: WorkflowContext,
        err: &EngineError,
    ) -> Result<WorkflowContext, EngineError> {
        tracing::error!(
            "❌ Execution {} failed at step {:?}: {}",
            context.id,
            context.current_step,
            err
        );

        context.status = ExecutionStatus::Failed;
        context.error = Some(err.to_string());
        context.pending = None;
        self.contexts.checkpoint(&mut context).await?;
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionConfig;
    use crate::ledger::LedgerEngine;
    use crate::runtime::executor::StepExecutor;
    use crate::workflow::types::{Edge, StepType, WorkflowDefinition, WorkflowStep};
    use crate::workflow::DefinitionStorage;
    use crate::workspace::WorkspaceDatabaseManager;
    use serde_json::json;
    use sqlx::Row;

    struct Fixture {
        manager: Arc<WorkspaceDatabaseManager>,
        engine: ExecutionEngine,
        ledger: LedgerEngine,
        gateway: ApprovalGateway,
        storage: DefinitionStorage,
        registry: Arc<DefinitionRegistry>,
    }

    async fn fixture() -> Fixture {
        let manager = Arc::new(WorkspaceDatabaseManager::in_memory());
        let ledger = LedgerEngine::new(Arc::clone(&manager));
        ledger.seed_default_chart("acme").await.unwrap();

        let storage = DefinitionStorage::new(manager.control_pool().await.unwrap());
        let registry = Arc::new(DefinitionRegistry::new(storage.clone()));

        let contexts = ContextStore::new(Arc::clone(&manager));
        let gateway = ApprovalGateway::new(Arc::clone(&manager));
        let config = ActionConfig {
            extractor_url: None,
            agent_url: None,
            http_timeout_secs: 5,
        };
        let executor = StepExecutor::new(ledger.clone(), config).unwrap();
        let engine = ExecutionEngine::new(
            Arc::clone(&registry),
            contexts,
            gateway.clone(),
            Arc::new(executor),
        );

        Fixture {
            manager,
            engine,
            ledger,
            gateway,
            storage,
            registry,
        }
    }

    async fn register(fixture: &Fixture, definition: WorkflowDefinition) {
        let id = definition.id.clone();
        fixture.storage.save_definition(&definition).await.unwrap();
        fixture.registry.reload_definition(&id).await.unwrap();
    }

    fn invoice_definition(threshold: Option<f64>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf-invoice".to_string(),
            name: "Invoice intake".to_string(),
            steps: vec![
                WorkflowStep {
                    id: "process_invoice".to_string(),
                    step_type: StepType::InvoiceProcessing,
                    description: "Normalize the extracted invoice".to_string(),
                    params: json!({
                        "invoice": "$input.invoice",
                        "confidence": "$input.confidence",
                    }),
                    confidence_threshold: threshold,
                },
                WorkflowStep {
                    id: "post_ledger".to_string(),
                    step_type: StepType::LedgerPosting,
                    description: "Post the invoice".to_string(),
                    params: json!({
                        "description": "Invoice posting",
                        "debit_account": "6000",
                        "credit_account": "2000",
                        "amount": "$steps.process_invoice.total",
                        "date": "2025-03-01",
                        "source": "invoice-workflow",
                    }),
                    confidence_threshold: None,
                },
            ],
            edges: vec![Edge {
                from: "process_invoice".to_string(),
                to: "post_ledger".to_string(),
            }],
            start_step: "process_invoice".to_string(),
        }
    }

    fn invoice_input(confidence: f64) -> Value {
        json!({
            "invoice": {
                "vendor": "Initech",
                "invoice_number": "INV-7",
                "date": "2025-02-20",
                "total": "100.00",
            },
            "confidence": confidence,
        })
    }

    async fn transaction_count(fixture: &Fixture) -> i64 {
        let pool = fixture.manager.workspace_pool("acme").await.unwrap();
        sqlx::query("SELECT COUNT(*) AS n FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn confident_run_posts_and_completes_without_approval() {
        let fixture = fixture().await;
        register(&fixture, invoice_definition(Some(0.9))).await;

        let context = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.95))
            .await
            .unwrap();

        assert_eq!(context.status, ExecutionStatus::Completed);
        assert!(context.outputs.contains_key("process_invoice"));
        assert!(context.outputs.contains_key("post_ledger"));
        assert!(fixture.gateway.list_pending("acme").await.unwrap().is_empty());
        assert_eq!(transaction_count(&fixture).await, 1);
    }

    #[tokio::test]
    async fn low_confidence_pauses_then_approval_and_resume_complete_the_run() {
        let fixture = fixture().await;
        register(&fixture, invoice_definition(Some(0.9))).await;

        let paused = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.6))
            .await
            .unwrap();

        assert_eq!(paused.status, ExecutionStatus::WaitingApproval);
        let pending_step = paused.pending.as_ref().unwrap();
        assert_eq!(pending_step.step_id, "process_invoice");
        // The snapshot is fully resolved: no unexpanded references survive
        assert_eq!(pending_step.params["invoice"]["vendor"], json!("Initech"));
        assert_eq!(transaction_count(&fixture).await, 0);

        let requests = fixture.gateway.list_pending("acme").await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].execution_id, paused.id);

        fixture
            .gateway
            .approve("acme", requests[0].id, "reviewer@acme")
            .await
            .unwrap();

        let resumed = fixture
            .engine
            .resume_workflow("acme", paused.id, "process_invoice")
            .await
            .unwrap();

        assert_eq!(resumed.status, ExecutionStatus::Completed);
        assert_eq!(transaction_count(&fixture).await, 1);

        // Resumption replayed the recorded snapshot deterministically
        assert_eq!(
            resumed.outputs["process_invoice"]["total"],
            json!("100.00")
        );
        let txn_id = resumed.outputs["post_ledger"]["transaction_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        let transaction = fixture.ledger.get_transaction("acme", txn_id).await.unwrap();
        assert_eq!(transaction.entries.len(), 2);
        assert_eq!(transaction.entries[0].amount, transaction.entries[1].amount);
    }

    #[tokio::test]
    async fn resume_requires_a_granted_approval() {
        let fixture = fixture().await;
        register(&fixture, invoice_definition(Some(0.9))).await;

        let paused = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.6))
            .await
            .unwrap();

        // Still pending: resume must refuse to move the execution
        let err = fixture
            .engine
            .resume_workflow("acme", paused.id, "process_invoice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let reloaded = fixture.engine.get_execution("acme", paused.id).await.unwrap();
        assert_eq!(reloaded.status, ExecutionStatus::WaitingApproval);
    }

    #[tokio::test]
    async fn rejection_fails_the_execution_without_posting() {
        let fixture = fixture().await;
        register(&fixture, invoice_definition(Some(0.9))).await;

        let paused = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.6))
            .await
            .unwrap();
        let requests = fixture.gateway.list_pending("acme").await.unwrap();
        let request = &requests[0];

        fixture
            .gateway
            .reject("acme", request.id, "reviewer@acme", "vendor mismatch")
            .await
            .unwrap();

        // Resume against a rejected approval is an InvalidState
        let err = fixture
            .engine
            .resume_workflow("acme", paused.id, "process_invoice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let failed = fixture.engine.apply_rejection("acme", paused.id).await.unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert!(failed.error.as_ref().unwrap().contains("vendor mismatch"));
        assert_eq!(transaction_count(&fixture).await, 0);
    }

    #[tokio::test]
    async fn terminal_executions_accept_no_further_transitions() {
        let fixture = fixture().await;
        register(&fixture, invoice_definition(Some(0.9))).await;

        let completed = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.95))
            .await
            .unwrap();
        assert_eq!(completed.status, ExecutionStatus::Completed);

        let err = fixture
            .engine
            .resume_workflow("acme", completed.id, "process_invoice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = fixture.engine.cancel_execution("acme", completed.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = fixture.engine.apply_rejection("acme", completed.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn cancelled_waiting_execution_stays_cancelled_and_never_posts() {
        let fixture = fixture().await;
        register(&fixture, invoice_definition(Some(0.9))).await;

        let paused = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.6))
            .await
            .unwrap();
        let requests = fixture.gateway.list_pending("acme").await.unwrap();
        let request = &requests[0];

        let cancelled = fixture.engine.cancel_execution("acme", paused.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

        // A late approval cannot revive the run
        fixture
            .gateway
            .approve("acme", request.id, "reviewer@acme")
            .await
            .unwrap();
        let err = fixture
            .engine
            .resume_workflow("acme", paused.id, "process_invoice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        assert_eq!(transaction_count(&fixture).await, 0);
    }

    #[tokio::test]
    async fn threshold_zero_never_pauses_and_threshold_one_requires_certainty() {
        let fixture = fixture().await;

        register(&fixture, invoice_definition(Some(0.0))).await;
        let context = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.0))
            .await
            .unwrap();
        assert_eq!(context.status, ExecutionStatus::Completed);

        register(&fixture, invoice_definition(Some(1.0))).await;
        let paused = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.99))
            .await
            .unwrap();
        assert_eq!(paused.status, ExecutionStatus::WaitingApproval);

        let exact = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(1.0))
            .await
            .unwrap();
        assert_eq!(exact.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn step_failures_become_failed_executions_with_the_cause_recorded() {
        let fixture = fixture().await;
        let mut definition = invoice_definition(None);
        // Point the posting at an account code that does not exist
        definition.steps[1].params["debit_account"] = json!("9999");
        register(&fixture, definition).await;

        let failed = fixture
            .engine
            .execute_workflow("acme", "wf-invoice", invoice_input(0.95))
            .await
            .unwrap();

        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert!(failed.error.as_ref().unwrap().contains("9999"));
        assert_eq!(transaction_count(&fixture).await, 0);
    }

    #[tokio::test]
    async fn unknown_definitions_and_executions_are_not_found() {
        let fixture = fixture().await;

        let err = fixture
            .engine
            .execute_workflow("acme", "wf-ghost", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = fixture
            .engine
            .resume_workflow("acme", Uuid::new_v4(), "step")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
