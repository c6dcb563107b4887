/// Workspace type definitions for multi-tenant architecture
///
/// Defines the workspace catalog entry with slug-based database isolation.

use serde::{Deserialize, Serialize};

/// A workspace container for accounts, executions, and approvals
///
/// Workspaces provide hard tenant isolation: every ledger and workflow row
/// lives in the workspace's own database file, so no query can cross a
/// workspace boundary by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// URL-safe workspace slug used for directory naming (e.g., "acme")
    /// Creates the isolated database: {slug}/workspace.db
    pub slug: String,
    /// Human-readable workspace name (e.g., "Acme GmbH")
    pub name: String,
    /// RFC 3339 creation timestamp
    pub created_at: String,
}

impl Workspace {
    /// Path of the workspace database relative to the data directory
    pub fn database_path(&self) -> String {
        format!("{}/workspace.db", self.slug)
    }
}
