//! Owner-scoped read endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, EntryType, LedgerEntry, Transaction, TransactionStatus,
    TransactionType,
};
use crate::error::AppError;
use crate::middleware::Actor;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_number: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub balance: Decimal,
    pub currency: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            owner_id: account.owner_id,
            balance: account.balance().amount(),
            currency: account.balance().currency().to_string(),
            account_number: account.account_number,
            status: account.status,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            transaction_type: tx.transaction_type,
            status: tx.status(),
            source_account_id: tx.source_account_id,
            target_account_id: tx.target_account_id,
            amount: tx.amount.amount(),
            currency: tx.amount.currency().to_string(),
            completed_at: tx.completed_at(),
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryView {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: EntryType,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub balance_after: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryView {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            transaction_id: entry.transaction_id,
            account_id: entry.account_id,
            entry_type: entry.entry_type,
            amount: entry.amount.amount(),
            balance_after: entry.balance_after.amount(),
            currency: entry.amount.currency().to_string(),
            created_at: entry.created_at,
        }
    }
}

/// `GET /api/v1/accounts`
pub async fn list_accounts(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
) -> Result<Json<Vec<AccountView>>, AppError> {
    let accounts = state.queries.accounts_of(actor_id).await?;
    Ok(Json(accounts.into_iter().map(AccountView::from).collect()))
}

/// `GET /api/v1/accounts/:id`
pub async fn get_account(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountView>, AppError> {
    let account = state.queries.account(actor_id, id).await?;
    Ok(Json(account.into()))
}

/// `GET /api/v1/accounts/:id/transactions`, newest first.
pub async fn account_transactions(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TransactionView>>, AppError> {
    let history = state.queries.history(actor_id, id).await?;
    Ok(Json(history.into_iter().map(TransactionView::from).collect()))
}

/// `GET /api/v1/transactions/:id/ledger`
pub async fn transaction_ledger(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LedgerEntryView>>, AppError> {
    let entries = state.queries.ledger(actor_id, id).await?;
    Ok(Json(entries.into_iter().map(LedgerEntryView::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Money;

    #[test]
    fn test_account_view_serializes_balance_as_number() {
        let account = Account::open(Uuid::new_v4(), "ACC-1", Money::parse("12.5", "USD").unwrap()).unwrap();
        let json = serde_json::to_string(&AccountView::from(account)).unwrap();
        assert!(json.contains(r#""balance":12.5000"#));
        assert!(json.contains(r#""status":"ACTIVE""#));
        assert!(json.contains(r#""accountNumber":"ACC-1""#));
    }
}
