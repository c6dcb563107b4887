/// Workflow Management Layer
///
/// This module handles workflow definitions, persistence, the hot-reload
/// registry, and the durable execution context store. It provides:
/// - Type definitions (WorkflowDefinition, WorkflowStep, WorkflowContext)
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap
/// - Compare-and-swap checkpointing for execution contexts

// Core workflow type definitions
pub mod types;

// Definition persistence in the control database
pub mod storage;

// Hot-reload registry with petgraph-validated execution plans
pub mod registry;

// Durable execution context store with optimistic concurrency
pub mod context;

// Re-export commonly used types
pub use context::ContextStore;
pub use registry::{CompiledDefinition, DefinitionRegistry};
pub use storage::DefinitionStorage;
pub use types::{
    Edge, ExecutionStatus, PendingStep, StepType, WorkflowContext, WorkflowDefinition, WorkflowStep,
};
