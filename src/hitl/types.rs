/// Approval request type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Resolution state of an approval request
///
/// Exactly one transition away from PENDING is ever accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ApprovalStatus::Pending),
            "APPROVED" => Some(ApprovalStatus::Approved),
            "REJECTED" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

/// A pending or resolved human-review request
///
/// One-to-one with a paused step instance: the params snapshot mirrors what
/// the execution context recorded, so reviewers see exactly what the step
/// will run with on resumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub workspace: String,
    pub execution_id: Uuid,
    pub step_id: String,
    /// Why the step paused (e.g., "confidence 0.60 below threshold 0.90")
    pub reason: String,
    /// Resolved step params at pause time
    pub params: Value,
    pub status: ApprovalStatus,
    /// Reviewer who resolved the request
    pub reviewer: Option<String>,
    /// Free-text note supplied on rejection
    pub review_note: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}
