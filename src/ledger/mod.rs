/// Double-Entry Ledger Engine
///
/// This module enforces the double-entry invariants and computes balances.
/// It provides:
/// - Account, Transaction and JournalEntry types with fixed-point amounts
/// - Atomic transaction recording with idempotent re-ingestion
/// - Derived balances and trial-balance reconciliation
///
/// The ledger has no dependency on workflow types; workflow postings arrive
/// as plain entries plus audit metadata.

// Account, transaction and entry type definitions
pub mod types;

// The engine: validation, atomic writes, balance computation
pub mod engine;

// Re-export commonly used types
pub use engine::LedgerEngine;
pub use types::{
    Account, AccountBalance, AccountType, EntryType, JournalEntry, NewEntry, NewTransaction,
    Transaction,
};
