/// Core workflow type definitions
///
/// Defines workflow definitions, steps, and the durable execution context.
/// Definitions are serialized to JSON for persistence in the control
/// database; contexts are checkpointed into the owning workspace database at
/// every step boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A complete workflow definition: a step graph with a designated start
///
/// Definitions are read-mostly. They are stored once, compiled into the
/// in-memory registry, and shared by every execution of the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g., "wf-invoice-intake")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// Steps in this workflow
    pub steps: Vec<WorkflowStep>,
    /// Edges connecting steps into a DAG
    pub edges: Vec<Edge>,
    /// Step id where execution begins
    pub start_step: String,
}

/// A single step in the workflow graph
///
/// Steps are declarative and shared across all executions of their
/// definition. Params may reference the run's input and earlier step outputs:
/// `"$input.invoice.total"`, `"$steps.process_invoice.total"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique step identifier within the workflow (e.g., "process_invoice")
    pub id: String,
    /// The action this step dispatches to
    pub step_type: StepType,
    /// Short operator-facing description
    #[serde(default)]
    pub description: String,
    /// Step-specific parameters as flexible JSON
    pub params: Value,
    /// Minimum acceptance score in [0,1]. When the action reports a lower
    /// confidence the step pauses for human approval instead of completing.
    /// Absent threshold means confidence is ignored.
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

/// Available step types for the Ledgerflow engine
///
/// A closed enum: adding a step kind is a compile-time-checked change to the
/// dispatch match, not a string lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Normalize an extracted invoice payload into canonical fields
    /// Expected params: { "invoice": "$input.invoice", "confidence": "$input.confidence" }
    InvoiceProcessing,

    /// Call the document extraction adapter (OCR boundary)
    /// Expected params: { "document_ref": "$input.document", "kind": "invoice" }
    DocumentExtraction,

    /// Invoke the sub-agent runner adapter
    /// Expected params: { "task": "categorize", "payload": "$steps.process_invoice" }
    AgentExecution,

    /// Post a balanced transaction through the ledger engine
    /// Expected params: { "debit_account": "6000", "credit_account": "2000",
    ///                    "amount": "$steps.process_invoice.total", "description": "..." }
    LedgerPosting,

    /// Generic HTTP adapter call
    /// Expected params: { "url": "https://...", "method": "POST", "body": {...} }
    HttpCall,
}

/// Connection between two steps in the workflow DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source step id
    pub from: String,
    /// Target step id
    pub to: String,
}

/// Lifecycle of one workflow execution
///
/// RUNNING and WAITING_APPROVAL are live; COMPLETED, FAILED and CANCELLED are
/// terminal and accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::WaitingApproval => "WAITING_APPROVAL",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(ExecutionStatus::Running),
            "WAITING_APPROVAL" => Some(ExecutionStatus::WaitingApproval),
            "COMPLETED" => Some(ExecutionStatus::Completed),
            "FAILED" => Some(ExecutionStatus::Failed),
            "CANCELLED" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Snapshot of a paused step, persisted with the context
///
/// Holds the fully resolved params the step ran with, so resumption re-enters
/// the exact same action with the exact same inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingStep {
    pub step_id: String,
    pub params: Value,
    /// Confidence the action reported when the gate tripped
    pub confidence: f64,
    pub reason: String,
}

/// Durable execution context for one workflow run
///
/// Mutated by the execution engine on every step transition and persisted at
/// each boundary, so a process restart resumes exactly where it left off.
/// The version column backs the compare-and-swap that serializes concurrent
/// advancement of the same execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub id: Uuid,
    pub workspace: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    /// Step the engine is at (None once completed)
    pub current_step: Option<String>,
    /// Caller-supplied run input
    pub input: Value,
    /// Accumulated step outputs keyed by step id
    pub outputs: HashMap<String, Value>,
    /// Present exactly while status is WAITING_APPROVAL
    pub pending: Option<PendingStep>,
    /// Recorded failure cause once status is FAILED
    pub error: Option<String>,
    /// Optimistic concurrency counter, bumped on every persisted change
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowContext {
    /// Fresh context positioned at a definition's start step
    pub fn new(workspace: &str, workflow_id: &str, start_step: &str, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace: workspace.to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            current_step: Some(start_step.to_string()),
            input,
            outputs: HashMap::new(),
            pending: None,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
