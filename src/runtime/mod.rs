/// Runtime Execution Layer
///
/// This module provides the confidence-gated execution engine for workflows.
/// It handles:
/// - Step-by-step interpretation of compiled definitions
/// - Durable checkpoints at every step boundary
/// - Pausing for human approval and resuming from recorded snapshots
/// - Closed dispatch over the step-type set
/// - The background sweeper that applies resolved approvals

// The execution engine: run loop, pause, resume, cancel
pub mod engine;

// Step action handlers and the dispatch seam
pub mod executor;

// Background approval resume sweeper
pub mod sweeper;

// Re-export main types
pub use engine::ExecutionEngine;
pub use executor::{ActionDispatch, ActionOutcome, StepExecutor};
pub use sweeper::ResumeSweeper;
