/// Background approval resume sweeper
///
/// Approval resolution and workflow resumption are deliberately separate,
/// independently retryable operations. The sweeper closes the loop: on a
/// fixed schedule it scans every catalogued workspace for resolved approvals
/// whose execution is still parked in WAITING_APPROVAL, resumes the approved
/// ones and fails the rejected ones.

use crate::error::EngineError;
use crate::hitl::{ApprovalGateway, ApprovalStatus};
use crate::runtime::engine::ExecutionEngine;
use crate::workspace::WorkspaceCatalog;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Every 30 seconds; a paused execution is resumed at most this long after
/// its approval lands, on top of whatever the approving caller does itself.
const SWEEP_SCHEDULE: &str = "*/30 * * * * *";

pub struct ResumeSweeper {
    scheduler: RwLock<JobScheduler>,
    engine: Arc<ExecutionEngine>,
    gateway: ApprovalGateway,
    catalog: WorkspaceCatalog,
}

impl ResumeSweeper {
    pub async fn new(
        engine: Arc<ExecutionEngine>,
        gateway: ApprovalGateway,
        catalog: WorkspaceCatalog,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: RwLock::new(scheduler),
            engine,
            gateway,
            catalog,
        })
    }

    /// Register the sweep job and start the scheduler
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        tracing::info!("⏰ Starting approval resume sweeper");

        let sweeper = Arc::clone(self);
        let job = Job::new_async(SWEEP_SCHEDULE, move |_job_id, _lock| {
            let sweeper = Arc::clone(&sweeper);
            Box::pin(async move {
                if let Err(e) = sweeper.sweep_all().await {
                    tracing::error!("❌ Approval sweep failed: {}", e);
                }
            })
        })?;

        {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?;
            scheduler.start().await?;
        }

        tracing::info!("✅ Approval resume sweeper started");
        Ok(())
    }

    /// Stop the scheduler
    pub async fn stop(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        tracing::info!("⏹️ Approval resume sweeper stopped");
        Ok(())
    }

    /// One pass over all catalogued workspaces
    pub async fn sweep_all(&self) -> Result<()> {
        for workspace in self.catalog.list().await? {
            if let Err(e) = self.sweep_workspace(&workspace.slug).await {
                tracing::error!("❌ Sweep failed for workspace {}: {}", workspace.slug, e);
            }
        }
        Ok(())
    }

    /// Drain resolved-but-unapplied approvals in one workspace
    async fn sweep_workspace(&self, workspace: &str) -> Result<(), EngineError> {
        let actionable = self.gateway.list_actionable(workspace).await?;
        if actionable.is_empty() {
            return Ok(());
        }

        tracing::info!(
            "🧹 Sweeping {} resolved approvals in workspace {}",
            actionable.len(),
            workspace
        );

        for request in actionable {
            let result = match request.status {
                ApprovalStatus::Approved => {
                    self.engine
                        .resume_workflow(workspace, request.execution_id, &request.step_id)
                        .await
                }
                ApprovalStatus::Rejected => {
                    self.engine.apply_rejection(workspace, request.execution_id).await
                }
                // list_actionable never returns PENDING rows
                ApprovalStatus::Pending => continue,
            };

            match result {
                Ok(context) => {
                    tracing::info!(
                        "🧹 Execution {} moved to {} by sweeper",
                        context.id,
                        context.status.as_str()
                    );
                }
                // Another caller got there first; the next scan sees the truth
                Err(EngineError::InvalidState(reason)) => {
                    tracing::debug!(
                        "Sweep skipped execution {}: {}",
                        request.execution_id,
                        reason
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Sweep could not advance execution {}: {}",
                        request.execution_id,
                        e
                    );
                }
            }
        }

        Ok(())
    }
}
