/// Workspace management module
///
/// Handles workspace-level organization, database isolation, and multi-tenancy.
/// Each workspace gets an isolated database: {slug}/workspace.db

pub mod database;
pub mod types;

pub use database::{WorkspaceCatalog, WorkspaceDatabaseManager};
pub use types::Workspace;
