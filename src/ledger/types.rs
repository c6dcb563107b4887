/// Core ledger type definitions
///
/// Accounts, transactions and journal entries follow classic double-entry
/// bookkeeping. Amounts are fixed-point decimals end to end; floats never
/// touch money.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tolerance for the balance check. Absorbs fixed-point rounding from
/// upstream allocations, never semantic imbalance (a whole cent is out).
pub const BALANCE_EPSILON: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Account classification driving the balance sign convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    /// Debit-normal accounts carry balances as debits − credits;
    /// credit-normal accounts as credits − debits.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ASSET" => Some(AccountType::Asset),
            "LIABILITY" => Some(AccountType::Liability),
            "EQUITY" => Some(AccountType::Equity),
            "REVENUE" => Some(AccountType::Revenue),
            "EXPENSE" => Some(AccountType::Expense),
            _ => None,
        }
    }
}

/// Side of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "DEBIT",
            EntryType::Credit => "CREDIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(EntryType::Debit),
            "CREDIT" => Some(EntryType::Credit),
            _ => None,
        }
    }
}

/// A ledger account
///
/// Identity (id, workspace, code, type) is immutable; only the display name
/// and the active flag ever change. Balances are derived from journal
/// entries, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub workspace: String,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A posted ledger transaction with its entries
///
/// Immutable once recorded: corrections are new offsetting transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub workspace: String,
    pub date: NaiveDate,
    pub description: String,
    /// Origin tag, e.g. "invoice-workflow" or "manual"
    pub source: String,
    /// Caller-supplied idempotency key, unique per workspace
    pub external_id: Option<String>,
    /// Audit blob; workflow postings record execution and step ids here
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<JournalEntry>,
}

/// One leg of a transaction, owned exclusively by it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub description: Option<String>,
}

/// Input for recording a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub source: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub entries: Vec<NewEntry>,
}

/// Input for one entry; `account` accepts an account id or code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub account: String,
    pub entry_type: EntryType,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

/// One line of a trial balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub balance: Decimal,
}

/// Default chart of accounts seeded at workspace provisioning
pub const DEFAULT_CHART: &[(&str, &str, AccountType)] = &[
    ("1000", "Cash", AccountType::Asset),
    ("1100", "Accounts Receivable", AccountType::Asset),
    ("2000", "Accounts Payable", AccountType::Liability),
    ("3000", "Owner Equity", AccountType::Equity),
    ("4000", "Revenue", AccountType::Revenue),
    ("6000", "Operating Expenses", AccountType::Expense),
];
