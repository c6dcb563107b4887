/// Ledger REST API endpoints
///
/// Recording transactions and reading balances. Unbalanced submissions come
/// back as 422 with the debit/credit totals in the error message; retried
/// submissions should carry an external_id.

use crate::api::{parse_id, ApiError, AppState};
use crate::ledger::{Account, AccountBalance, AccountType, NewTransaction, Transaction};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request body for account creation
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
}

/// Balance response for one account
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account: String,
    pub balance: Decimal,
}

/// Create the ledger routes
pub fn create_ledger_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workspaces/{workspace}/ledger/transactions", post(record_transaction))
        .route("/api/workspaces/{workspace}/ledger/transactions/{id}", get(get_transaction))
        .route("/api/workspaces/{workspace}/ledger/accounts", post(create_account))
        .route(
            "/api/workspaces/{workspace}/ledger/accounts/{account}/balance",
            get(get_account_balance),
        )
        .route("/api/workspaces/{workspace}/ledger/trial-balance", get(get_trial_balance))
}

/// Record a balanced transaction
///
/// POST /api/workspaces/:workspace/ledger/transactions
/// Body: { "date": "2025-03-01", "description": "...", "source": "manual",
///         "external_id": "inv-0001",
///         "entries": [ { "account": "6000", "entry_type": "DEBIT", "amount": "100.00" }, ... ] }
async fn record_transaction(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    Json(payload): Json<NewTransaction>,
) -> Result<Json<Transaction>, ApiError> {
    let transaction = state.ledger.record_transaction(&workspace, payload).await?;
    Ok(Json(transaction))
}

/// Get a posted transaction with its entries
///
/// GET /api/workspaces/:workspace/ledger/transactions/:id
async fn get_transaction(
    State(state): State<AppState>,
    Path((workspace, id)): Path<(String, String)>,
) -> Result<Json<Transaction>, ApiError> {
    let transaction = state.ledger.get_transaction(&workspace, parse_id(&id)?).await?;
    Ok(Json(transaction))
}

/// Create an account
///
/// POST /api/workspaces/:workspace/ledger/accounts
async fn create_account(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let account = state
        .ledger
        .create_account(&workspace, &payload.code, &payload.name, payload.account_type)
        .await?;
    Ok(Json(account))
}

/// Current balance of one account (by id or code)
///
/// GET /api/workspaces/:workspace/ledger/accounts/:account/balance
async fn get_account_balance(
    State(state): State<AppState>,
    Path((workspace, account)): Path<(String, String)>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.get_account_balance(&workspace, &account).await?;
    Ok(Json(BalanceResponse { account, balance }))
}

/// Trial balance across all accounts in a workspace
///
/// GET /api/workspaces/:workspace/ledger/trial-balance
async fn get_trial_balance(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
) -> Result<Json<Vec<AccountBalance>>, ApiError> {
    let balances = state.ledger.get_trial_balance(&workspace).await?;
    Ok(Json(balances))
}
