/// Error taxonomy for the workflow and ledger core
///
/// Every fallible core operation returns `Result<_, EngineError>`. Ledger and
/// approval errors are surfaced to callers verbatim; step action failures are
/// caught by the execution engine and recorded on the failed context instead
/// of crossing the run loop boundary.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Ledger invariant violation. Always rejected, never auto-corrected.
    #[error("unbalanced transaction: debits {debits} vs credits {credits}")]
    UnbalancedTransaction { debits: Decimal, credits: Decimal },

    /// A workflow transition was attempted from a terminal or mismatched state,
    /// or a concurrent writer won the compare-and-swap on the same execution.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown execution, account, definition, workspace or approval id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A second approve/reject attempt on an already-resolved request.
    #[error("approval request {0} already resolved")]
    ApprovalAlreadyResolved(Uuid),

    /// A dispatched step action failed, with enough context to know which
    /// step of which execution it was.
    #[error("step '{step_id}' of execution {execution_id} failed: {message}")]
    ExternalActionFailure {
        execution_id: Uuid,
        step_id: String,
        message: String,
    },

    /// Malformed caller input (empty entries, negative amount, bad reference).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Wiring-level failure (pool creation, filesystem) carried up unchanged.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
