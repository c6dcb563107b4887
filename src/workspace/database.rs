/// Workspace database manager for isolated multi-tenant storage
///
/// Manages one SQLite database per workspace ({slug}/workspace.db) holding
/// accounts, transactions, journal entries, workflow contexts and approval
/// requests, plus a shared control database (registry.db) for workflow
/// definitions and the workspace catalog.
///
/// Connection pooling, lazy loading, zero cross-workspace data leaks: a
/// query physically cannot touch another tenant's rows.

use crate::workspace::types::Workspace;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Key under which the control database pool is cached
const CONTROL_KEY: &str = "__control";

/// Workspace database manager with isolated connection pools
///
/// Pools are created lazily on first access and cached behind an RwLock.
/// The in-memory mode backs the test suite with the same schema and access
/// paths as the file-backed production mode.
#[derive(Debug)]
pub struct WorkspaceDatabaseManager {
    /// Connection pools keyed by workspace slug (plus the control key)
    pools: RwLock<HashMap<String, SqlitePool>>,
    /// Base directory for database files
    data_dir: String,
    /// When true, every pool is a private in-memory database
    in_memory: bool,
}

impl WorkspaceDatabaseManager {
    /// Create a file-backed manager rooted at `data_dir`
    pub fn new(data_dir: String) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            data_dir,
            in_memory: false,
        }
    }

    /// Create an in-memory manager (used by the test suite)
    pub fn in_memory() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            data_dir: String::new(),
            in_memory: true,
        }
    }

    /// Get or create the database pool for a workspace
    ///
    /// Fast path takes a read lock; the slow path re-checks under the write
    /// lock so two racing callers never create duplicate pools.
    pub async fn workspace_pool(&self, workspace: &str) -> Result<SqlitePool> {
        if let Some(pool) = self.pools.read().await.get(workspace) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(workspace) {
            return Ok(pool.clone());
        }

        let pool = self.open_pool(workspace, "workspace.db").await?;
        init_workspace_schema(&pool).await?;
        pools.insert(workspace.to_string(), pool.clone());

        tracing::info!("🗄️ Workspace database ready: {}", workspace);
        Ok(pool)
    }

    /// Get or create the control database pool (definitions + catalog)
    pub async fn control_pool(&self) -> Result<SqlitePool> {
        if let Some(pool) = self.pools.read().await.get(CONTROL_KEY) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(CONTROL_KEY) {
            return Ok(pool.clone());
        }

        let pool = if self.in_memory {
            memory_pool().await?
        } else {
            let db_path = Path::new(&self.data_dir).join("registry.db");
            std::fs::create_dir_all(&self.data_dir).map_err(|e| {
                anyhow::anyhow!("Failed to create data directory '{}': {}", self.data_dir, e)
            })?;
            let options = SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true);
            SqlitePool::connect_with(options).await?
        };
        init_control_schema(&pool).await?;
        pools.insert(CONTROL_KEY.to_string(), pool.clone());

        tracing::info!("🗄️ Control database ready");
        Ok(pool)
    }

    async fn open_pool(&self, workspace: &str, file_name: &str) -> Result<SqlitePool> {
        if self.in_memory {
            return memory_pool().await;
        }

        let workspace_dir = Path::new(&self.data_dir).join(workspace);
        std::fs::create_dir_all(&workspace_dir).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create workspace directory '{}': {}",
                workspace_dir.display(),
                e
            )
        })?;
        let db_path = workspace_dir.join(file_name);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        Ok(SqlitePool::connect_with(options).await?)
    }

    /// Pool count for monitoring
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

/// A single in-memory database shared by at most one connection, so every
/// statement in a test sees the same data.
async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Initialize the per-workspace schema
///
/// Safe to call multiple times (uses IF NOT EXISTS). Amounts are stored as
/// TEXT and parsed into fixed-point decimals; timestamps are RFC 3339 TEXT.
async fn init_workspace_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            workspace TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            account_type TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            UNIQUE(workspace, code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            workspace TEXT NOT NULL,
            txn_date TEXT NOT NULL,
            description TEXT NOT NULL,
            source TEXT NOT NULL,
            external_id TEXT,
            metadata JSON,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Idempotency key: one transaction per (workspace, external_id)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_external
        ON transactions(workspace, external_id) WHERE external_id IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS journal_entries (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            account_id TEXT NOT NULL REFERENCES accounts(id),
            entry_type TEXT NOT NULL,
            amount TEXT NOT NULL,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_account ON journal_entries(account_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_transaction ON journal_entries(transaction_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_contexts (
            id TEXT PRIMARY KEY,
            workspace TEXT NOT NULL,
            workflow_id TEXT NOT NULL,
            status TEXT NOT NULL,
            current_step TEXT,
            input JSON NOT NULL,
            outputs JSON NOT NULL,
            pending JSON,
            error TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contexts_status ON workflow_contexts(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS approval_requests (
            id TEXT PRIMARY KEY,
            workspace TEXT NOT NULL,
            execution_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            params JSON NOT NULL,
            status TEXT NOT NULL,
            reviewer TEXT,
            review_note TEXT,
            requested_at TEXT NOT NULL,
            reviewed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_approvals_execution ON approval_requests(execution_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_approvals_status ON approval_requests(status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Initialize the control database schema (definitions + workspace catalog)
async fn init_control_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS definitions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            definition JSON NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_definitions_name ON definitions(name)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            slug TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Workspace catalog on the control database
///
/// The catalog is what the resume sweeper iterates; a workspace missing here
/// is invisible to background work even if its database file exists.
#[derive(Debug, Clone)]
pub struct WorkspaceCatalog {
    pool: SqlitePool,
}

impl WorkspaceCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a workspace. Returns false if the slug was already taken.
    pub async fn create(&self, slug: &str, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO workspaces (slug, name, created_at) VALUES (?, ?, ?)",
        )
        .bind(slug)
        .bind(name)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, slug: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query("SELECT slug, name, created_at FROM workspaces WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Workspace {
            slug: row.get("slug"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        }))
    }

    pub async fn list(&self) -> Result<Vec<Workspace>> {
        let rows = sqlx::query("SELECT slug, name, created_at FROM workspaces ORDER BY slug")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Workspace {
                slug: row.get("slug"),
                name: row.get("name"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
