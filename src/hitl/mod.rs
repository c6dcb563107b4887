/// Human-in-the-Loop Layer
///
/// Records pending-approval requests for low-confidence steps and exposes
/// approve/reject with single-resolution semantics. Resolution is the only
/// trigger that lets an execution leave WAITING_APPROVAL; the actual
/// resumption is a separate, independently retryable call.

pub mod gateway;
pub mod types;

pub use gateway::ApprovalGateway;
pub use types::{ApprovalRequest, ApprovalStatus};
