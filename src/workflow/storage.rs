/// Persistence layer for workflow definitions
///
/// Handles definition CRUD in the control database. Definitions are stored
/// as JSON for flexibility while maintaining indexed lookup fields.

use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// SQLite-based definition storage
#[derive(Debug, Clone)]
pub struct DefinitionStorage {
    /// Control database connection pool
    pool: SqlitePool,
}

impl DefinitionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new definition or update an existing one
    ///
    /// Uses UPSERT to handle both create and update atomically.
    pub async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(definition)?;

        sqlx::query(
            r#"
            INSERT INTO definitions (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a definition by id
    pub async fn get_definition(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT definition FROM definitions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let definition: WorkflowDefinition = serde_json::from_str(&definition_json)?;
                Ok(Some(definition))
            }
            None => Ok(None),
        }
    }

    /// List all definitions with basic metadata
    pub async fn list_definitions(&self) -> Result<Vec<DefinitionMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM definitions ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut definitions = Vec::new();
        for row in rows {
            definitions.push(DefinitionMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            });
        }

        Ok(definitions)
    }

    /// Load all definitions for registry initialization
    pub async fn load_all_definitions(&self) -> Result<HashMap<String, WorkflowDefinition>> {
        let rows = sqlx::query("SELECT id, definition FROM definitions")
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            let definition: WorkflowDefinition = serde_json::from_str(&definition_json)?;
            definitions.insert(id, definition);
        }

        Ok(definitions)
    }

    /// Delete a definition by id
    pub async fn delete_definition(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM definitions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Basic definition metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct DefinitionMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}
