/// The double-entry ledger engine
///
/// Validates and atomically records transactions, computes derived balances,
/// and produces trial balances for reconciliation. Every write runs inside an
/// explicit SQL transaction: either the header and all entries become visible
/// together, or nothing does. The engine never retries on its own — retry
/// policy belongs to callers, protected by the external_id idempotency key.

use crate::error::EngineError;
use crate::ledger::types::{
    Account, AccountBalance, AccountType, EntryType, JournalEntry, NewTransaction, Transaction,
    BALANCE_EPSILON, DEFAULT_CHART,
};
use crate::workspace::WorkspaceDatabaseManager;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Ledger engine over workspace-isolated storage
///
/// Constructed once at process start and shared by reference; holds no
/// mutable state of its own beyond the pooled connections.
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    manager: Arc<WorkspaceDatabaseManager>,
}

impl LedgerEngine {
    pub fn new(manager: Arc<WorkspaceDatabaseManager>) -> Self {
        Self { manager }
    }

    async fn pool(&self, workspace: &str) -> Result<SqlitePool, EngineError> {
        self.manager.workspace_pool(workspace).await.map_err(EngineError::Internal)
    }

    /// Create an account in a workspace
    pub async fn create_account(
        &self,
        workspace: &str,
        code: &str,
        name: &str,
        account_type: AccountType,
    ) -> Result<Account, EngineError> {
        let pool = self.pool(workspace).await?;
        let account = Account {
            id: Uuid::new_v4(),
            workspace: workspace.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            account_type,
            active: true,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO accounts (id, workspace, code, name, account_type, active, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.workspace)
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(account.created_at.to_rfc3339())
        .execute(&pool)
        .await?;

        tracing::info!("📒 Created account {} '{}' in workspace {}", code, name, workspace);
        Ok(account)
    }

    /// Seed the default chart of accounts, skipping codes that already exist
    ///
    /// Called at workspace provisioning; safe to call again.
    pub async fn seed_default_chart(&self, workspace: &str) -> Result<(), EngineError> {
        let pool = self.pool(workspace).await?;

        for (code, name, account_type) in DEFAULT_CHART {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO accounts
                    (id, workspace, code, name, account_type, active, created_at)
                VALUES (?, ?, ?, ?, ?, 1, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(workspace)
            .bind(code)
            .bind(name)
            .bind(account_type.as_str())
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await?;
        }

        tracing::info!("📒 Seeded default chart of accounts for workspace {}", workspace);
        Ok(())
    }

    /// Update an account's display name (identity fields are immutable)
    pub async fn rename_account(
        &self,
        workspace: &str,
        account_ref: &str,
        new_name: &str,
    ) -> Result<Account, EngineError> {
        let pool = self.pool(workspace).await?;
        let account = self.resolve_account(&pool, workspace, account_ref).await?;

        sqlx::query("UPDATE accounts SET name = ? WHERE id = ? AND workspace = ?")
            .bind(new_name)
            .bind(account.id.to_string())
            .bind(workspace)
            .execute(&pool)
            .await?;

        Ok(Account { name: new_name.to_string(), ..account })
    }

    /// Deactivate an account. Accounts are never deleted.
    pub async fn deactivate_account(
        &self,
        workspace: &str,
        account_ref: &str,
    ) -> Result<(), EngineError> {
        let pool = self.pool(workspace).await?;
        let account = self.resolve_account(&pool, workspace, account_ref).await?;

        sqlx::query("UPDATE accounts SET active = 0 WHERE id = ? AND workspace = ?")
            .bind(account.id.to_string())
            .bind(workspace)
            .execute(&pool)
            .await?;

        tracing::info!("📕 Deactivated account {} in workspace {}", account.code, workspace);
        Ok(())
    }

    /// Record a transaction as a single atomic unit
    ///
    /// Validates entries, enforces Σdebits = Σcredits within BALANCE_EPSILON,
    /// resolves account references inside the write transaction, and persists
    /// header plus entries together. A supplied external_id that already
    /// exists in the workspace short-circuits to the existing transaction so
    /// retried external events cannot double-post.
    pub async fn record_transaction(
        &self,
        workspace: &str,
        new: NewTransaction,
    ) -> Result<Transaction, EngineError> {
        if new.entries.is_empty() {
            return Err(EngineError::Validation(
                "a transaction needs at least one journal entry".to_string(),
            ));
        }

        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for entry in &new.entries {
            if entry.amount < Decimal::ZERO {
                return Err(EngineError::Validation(format!(
                    "entry amount {} for account '{}' is negative",
                    entry.amount, entry.account
                )));
            }
            match entry.entry_type {
                EntryType::Debit => debits += entry.amount,
                EntryType::Credit => credits += entry.amount,
            }
        }

        if (debits - credits).abs() > BALANCE_EPSILON {
            tracing::warn!(
                "⚖️ Rejected unbalanced transaction in workspace {}: debits {} vs credits {}",
                workspace,
                debits,
                credits
            );
            return Err(EngineError::UnbalancedTransaction { debits, credits });
        }

        let pool = self.pool(workspace).await?;
        let mut tx = pool.begin().await?;

        // Idempotent re-ingestion: collapse onto the existing transaction
        if let Some(external_id) = &new.external_id {
            let existing =
                sqlx::query("SELECT id FROM transactions WHERE workspace = ? AND external_id = ?")
                    .bind(workspace)
                    .bind(external_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if let Some(row) = existing {
                let id = parse_uuid(&row.get::<String, _>("id"))?;
                drop(tx);
                tracing::info!(
                    "♻️ Transaction with external_id '{}' already posted in {}, returning existing",
                    external_id,
                    workspace
                );
                return self.get_transaction(workspace, id).await;
            }
        }

        // Resolve account references inside the same unit of work
        let mut resolved = Vec::with_capacity(new.entries.len());
        for entry in &new.entries {
            let row = sqlx::query(
                "SELECT id, active FROM accounts WHERE workspace = ? AND (id = ? OR code = ?)",
            )
            .bind(workspace)
            .bind(&entry.account)
            .bind(&entry.account)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "account '{}' in workspace '{}'",
                    entry.account, workspace
                ))
            })?;

            if !row.get::<bool, _>("active") {
                return Err(EngineError::Validation(format!(
                    "account '{}' is deactivated",
                    entry.account
                )));
            }
            resolved.push(parse_uuid(&row.get::<String, _>("id"))?);
        }

        let txn_id = Uuid::new_v4();
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, workspace, txn_date, description, source, external_id, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(txn_id.to_string())
        .bind(workspace)
        .bind(new.date.to_string())
        .bind(&new.description)
        .bind(&new.source)
        .bind(&new.external_id)
        .bind(new.metadata.as_ref().map(|m| m.to_string()))
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let mut entries = Vec::with_capacity(new.entries.len());
        for (entry, account_id) in new.entries.iter().zip(resolved) {
            let journal_entry = JournalEntry {
                id: Uuid::new_v4(),
                transaction_id: txn_id,
                account_id,
                entry_type: entry.entry_type,
                amount: entry.amount,
                description: entry.description.clone(),
            };

            sqlx::query(
                r#"
                INSERT INTO journal_entries
                    (id, transaction_id, account_id, entry_type, amount, description)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(journal_entry.id.to_string())
            .bind(journal_entry.transaction_id.to_string())
            .bind(journal_entry.account_id.to_string())
            .bind(journal_entry.entry_type.as_str())
            .bind(journal_entry.amount.to_string())
            .bind(&journal_entry.description)
            .execute(&mut *tx)
            .await?;

            entries.push(journal_entry);
        }

        tx.commit().await?;

        tracing::info!(
            "💰 Posted transaction {} in workspace {}: {} ({} entries, {} total debits)",
            txn_id,
            workspace,
            new.description,
            entries.len(),
            debits
        );

        Ok(Transaction {
            id: txn_id,
            workspace: workspace.to_string(),
            date: new.date,
            description: new.description,
            source: new.source,
            external_id: new.external_id,
            metadata: new.metadata,
            created_at,
            entries,
        })
    }

    /// Load a posted transaction with its entries
    pub async fn get_transaction(
        &self,
        workspace: &str,
        id: Uuid,
    ) -> Result<Transaction, EngineError> {
        let pool = self.pool(workspace).await?;

        let row = sqlx::query(
            r#"
            SELECT id, workspace, txn_date, description, source, external_id, metadata, created_at
            FROM transactions WHERE workspace = ? AND id = ?
            "#,
        )
        .bind(workspace)
        .bind(id.to_string())
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("transaction {id}")))?;

        let entry_rows = sqlx::query(
            r#"
            SELECT id, transaction_id, account_id, entry_type, amount, description
            FROM journal_entries WHERE transaction_id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&pool)
        .await?;

        let mut entries = Vec::with_capacity(entry_rows.len());
        for entry_row in entry_rows {
            entries.push(JournalEntry {
                id: parse_uuid(&entry_row.get::<String, _>("id"))?,
                transaction_id: parse_uuid(&entry_row.get::<String, _>("transaction_id"))?,
                account_id: parse_uuid(&entry_row.get::<String, _>("account_id"))?,
                entry_type: parse_entry_type(&entry_row.get::<String, _>("entry_type"))?,
                amount: parse_amount(&entry_row.get::<String, _>("amount"))?,
                description: entry_row.get("description"),
            });
        }

        Ok(Transaction {
            id,
            workspace: row.get("workspace"),
            date: parse_date(&row.get::<String, _>("txn_date"))?,
            description: row.get("description"),
            source: row.get("source"),
            external_id: row.get("external_id"),
            metadata: row
                .get::<Option<String>, _>("metadata")
                .map(|m| serde_json::from_str(&m))
                .transpose()?,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            entries,
        })
    }

    /// Current balance of one account, signed by its type convention
    ///
    /// Pure read over committed entries — no cache, so a concurrent writer is
    /// seen either entirely or not at all.
    pub async fn get_account_balance(
        &self,
        workspace: &str,
        account_ref: &str,
    ) -> Result<Decimal, EngineError> {
        let pool = self.pool(workspace).await?;
        let account = self.resolve_account(&pool, workspace, account_ref).await?;

        let rows = sqlx::query("SELECT entry_type, amount FROM journal_entries WHERE account_id = ?")
            .bind(account.id.to_string())
            .fetch_all(&pool)
            .await?;

        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for row in rows {
            let amount = parse_amount(&row.get::<String, _>("amount"))?;
            match parse_entry_type(&row.get::<String, _>("entry_type"))? {
                EntryType::Debit => debits += amount,
                EntryType::Credit => credits += amount,
            }
        }

        Ok(signed_balance(account.account_type, debits, credits))
    }

    /// Balance of every account in a workspace
    ///
    /// Reconciliation oracle: debit-normal totals equal credit-normal totals
    /// across the whole workspace.
    pub async fn get_trial_balance(
        &self,
        workspace: &str,
    ) -> Result<Vec<AccountBalance>, EngineError> {
        let pool = self.pool(workspace).await?;

        let rows = sqlx::query(
            r#"
            SELECT a.id, a.code, a.name, a.account_type, e.entry_type, e.amount
            FROM accounts a
            LEFT JOIN journal_entries e ON e.account_id = a.id
            WHERE a.workspace = ?
            ORDER BY a.code
            "#,
        )
        .bind(workspace)
        .fetch_all(&pool)
        .await?;

        // Aggregate in fixed-point; SQL SUM over TEXT would go through floats
        let mut balances: Vec<AccountBalance> = Vec::new();
        for row in rows {
            let id = parse_uuid(&row.get::<String, _>("id"))?;
            if balances.last().map(|b| b.account_id) != Some(id) {
                balances.push(AccountBalance {
                    account_id: id,
                    code: row.get("code"),
                    name: row.get("name"),
                    account_type: parse_account_type(&row.get::<String, _>("account_type"))?,
                    balance: Decimal::ZERO,
                });
            }
            let current = balances.last_mut().expect("just pushed");
            if let Some(amount) = row.get::<Option<String>, _>("amount") {
                let amount = parse_amount(&amount)?;
                let delta = match parse_entry_type(&row.get::<String, _>("entry_type"))? {
                    EntryType::Debit => {
                        if current.account_type.is_debit_normal() {
                            amount
                        } else {
                            -amount
                        }
                    }
                    EntryType::Credit => {
                        if current.account_type.is_debit_normal() {
                            -amount
                        } else {
                            amount
                        }
                    }
                };
                current.balance += delta;
            }
        }

        Ok(balances)
    }

    /// Resolve an account by id or code within a workspace
    pub async fn resolve_account(
        &self,
        pool: &SqlitePool,
        workspace: &str,
        account_ref: &str,
    ) -> Result<Account, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT id, workspace, code, name, account_type, active, created_at
            FROM accounts WHERE workspace = ? AND (id = ? OR code = ?)
            "#,
        )
        .bind(workspace)
        .bind(account_ref)
        .bind(account_ref)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            EngineError::NotFound(format!("account '{account_ref}' in workspace '{workspace}'"))
        })?;

        Ok(Account {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            workspace: row.get("workspace"),
            code: row.get("code"),
            name: row.get("name"),
            account_type: parse_account_type(&row.get::<String, _>("account_type"))?,
            active: row.get("active"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        })
    }
}

fn signed_balance(account_type: AccountType, debits: Decimal, credits: Decimal) -> Decimal {
    if account_type.is_debit_normal() {
        debits - credits
    } else {
        credits - debits
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(s).map_err(|_| EngineError::Validation(format!("corrupt id '{s}' in storage")))
}

fn parse_amount(s: &str) -> Result<Decimal, EngineError> {
    Decimal::from_str(s)
        .map_err(|_| EngineError::Validation(format!("corrupt amount '{s}' in storage")))
}

fn parse_entry_type(s: &str) -> Result<EntryType, EngineError> {
    EntryType::parse(s)
        .ok_or_else(|| EngineError::Validation(format!("corrupt entry type '{s}' in storage")))
}

fn parse_account_type(s: &str) -> Result<AccountType, EngineError> {
    AccountType::parse(s)
        .ok_or_else(|| EngineError::Validation(format!("corrupt account type '{s}' in storage")))
}

fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::from_str(s)
        .map_err(|_| EngineError::Validation(format!("corrupt date '{s}' in storage")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| EngineError::Validation(format!("corrupt timestamp '{s}' in storage")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::NewEntry;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn engine_with_chart() -> LedgerEngine {
        let manager = Arc::new(WorkspaceDatabaseManager::in_memory());
        let engine = LedgerEngine::new(manager);
        engine.seed_default_chart("acme").await.unwrap();
        engine
    }

    fn two_sided(debit: &str, credit: &str, amount: Decimal) -> Vec<NewEntry> {
        vec![
            NewEntry {
                account: debit.to_string(),
                entry_type: EntryType::Debit,
                amount,
                description: None,
            },
            NewEntry {
                account: credit.to_string(),
                entry_type: EntryType::Credit,
                amount,
                description: None,
            },
        ]
    }

    fn new_txn(entries: Vec<NewEntry>) -> NewTransaction {
        NewTransaction {
            date: date("2025-03-01"),
            description: "Test posting".to_string(),
            source: "test".to_string(),
            external_id: None,
            metadata: None,
            entries,
        }
    }

    async fn transaction_count(engine: &LedgerEngine) -> i64 {
        let pool = engine.pool("acme").await.unwrap();
        sqlx::query("SELECT COUNT(*) AS n FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn balanced_transaction_is_posted_with_all_entries() {
        let engine = engine_with_chart().await;

        let posted = engine
            .record_transaction("acme", new_txn(two_sided("6000", "2000", dec("100.00"))))
            .await
            .unwrap();

        assert_eq!(posted.entries.len(), 2);
        let reloaded = engine.get_transaction("acme", posted.id).await.unwrap();
        assert_eq!(reloaded.entries.len(), 2);
        assert_eq!(reloaded.description, "Test posting");

        assert_eq!(engine.get_account_balance("acme", "6000").await.unwrap(), dec("100.00"));
        assert_eq!(engine.get_account_balance("acme", "2000").await.unwrap(), dec("100.00"));
    }

    #[tokio::test]
    async fn unbalanced_transaction_is_rejected_and_leaves_no_rows() {
        let engine = engine_with_chart().await;

        let mut entries = two_sided("6000", "2000", dec("100.00"));
        entries[1].amount = dec("99.99");

        let err = engine.record_transaction("acme", new_txn(entries)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnbalancedTransaction { .. }));

        assert_eq!(transaction_count(&engine).await, 0);
        let trial = engine.get_trial_balance("acme").await.unwrap();
        assert!(trial.iter().all(|b| b.balance == Decimal::ZERO));
    }

    #[tokio::test]
    async fn rounding_within_epsilon_is_accepted() {
        let engine = engine_with_chart().await;

        let mut entries = two_sided("6000", "2000", dec("10.004"));
        entries[1].amount = dec("10.00");

        engine.record_transaction("acme", new_txn(entries)).await.unwrap();
        assert_eq!(transaction_count(&engine).await, 1);
    }

    #[tokio::test]
    async fn external_id_makes_reingestion_idempotent() {
        let engine = engine_with_chart().await;

        let mut txn = new_txn(two_sided("6000", "2000", dec("42.00")));
        txn.external_id = Some("inv-2025-0001".to_string());

        let first = engine.record_transaction("acme", txn.clone()).await.unwrap();
        let second = engine.record_transaction("acme", txn).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(transaction_count(&engine).await, 1);
        assert_eq!(engine.get_account_balance("acme", "6000").await.unwrap(), dec("42.00"));
    }

    #[tokio::test]
    async fn balances_follow_the_sign_convention() {
        let engine = engine_with_chart().await;

        // Expense recognized against payables, then partially paid from cash
        engine
            .record_transaction("acme", new_txn(two_sided("6000", "2000", dec("100.00"))))
            .await
            .unwrap();
        engine
            .record_transaction("acme", new_txn(two_sided("2000", "1000", dec("40.00"))))
            .await
            .unwrap();

        assert_eq!(engine.get_account_balance("acme", "6000").await.unwrap(), dec("100.00"));
        assert_eq!(engine.get_account_balance("acme", "2000").await.unwrap(), dec("60.00"));
        assert_eq!(engine.get_account_balance("acme", "1000").await.unwrap(), dec("-40.00"));
    }

    #[tokio::test]
    async fn trial_balance_nets_to_zero_across_type_conventions() {
        let engine = engine_with_chart().await;

        engine
            .record_transaction("acme", new_txn(two_sided("6000", "2000", dec("250.50"))))
            .await
            .unwrap();
        engine
            .record_transaction("acme", new_txn(two_sided("1100", "4000", dec("980.25"))))
            .await
            .unwrap();

        let trial = engine.get_trial_balance("acme").await.unwrap();
        let signed_sum: Decimal = trial
            .iter()
            .map(|b| {
                if b.account_type.is_debit_normal() {
                    b.balance
                } else {
                    -b.balance
                }
            })
            .sum();
        assert_eq!(signed_sum, Decimal::ZERO);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_write() {
        let engine = engine_with_chart().await;

        let err = engine.record_transaction("acme", new_txn(vec![])).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let mut entries = two_sided("6000", "2000", dec("5.00"));
        entries[0].amount = dec("-5.00");
        entries[1].amount = dec("-5.00");
        let err = engine.record_transaction("acme", new_txn(entries)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = engine
            .record_transaction("acme", new_txn(two_sided("9999", "2000", dec("5.00"))))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        assert_eq!(transaction_count(&engine).await, 0);
    }

    #[tokio::test]
    async fn renaming_keeps_identity_and_balances() {
        let engine = engine_with_chart().await;

        let renamed = engine.rename_account("acme", "6000", "Opex (EMEA)").await.unwrap();
        assert_eq!(renamed.name, "Opex (EMEA)");
        assert_eq!(renamed.code, "6000");

        engine
            .record_transaction("acme", new_txn(two_sided("6000", "2000", dec("12.00"))))
            .await
            .unwrap();
        assert_eq!(engine.get_account_balance("acme", "6000").await.unwrap(), dec("12.00"));
    }

    #[tokio::test]
    async fn deactivated_accounts_reject_new_postings() {
        let engine = engine_with_chart().await;
        engine.deactivate_account("acme", "6000").await.unwrap();

        let err = engine
            .record_transaction("acme", new_txn(two_sided("6000", "2000", dec("5.00"))))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(transaction_count(&engine).await, 0);
    }

    #[tokio::test]
    async fn workspaces_are_isolated() {
        let engine = engine_with_chart().await;
        engine.seed_default_chart("globex").await.unwrap();

        engine
            .record_transaction("acme", new_txn(two_sided("6000", "2000", dec("77.00"))))
            .await
            .unwrap();

        assert_eq!(engine.get_account_balance("globex", "6000").await.unwrap(), Decimal::ZERO);
    }
}
