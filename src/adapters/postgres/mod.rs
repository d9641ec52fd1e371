//! Postgres implementation of the storage ports.

mod unit_of_work;

pub use unit_of_work::PostgresUnitOfWork;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Account, LedgerEntry, Money, Transaction};
use crate::ports::{
    AccountStore, AuditEvent, AuditSink, IdempotencyRecord, IdempotencyStore, LedgerStore,
    RepositoryError, RepositoryResult, TransactionStore, UnitOfWork, UnitOfWorkFactory,
};

const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) => return RepositoryError::LockTimeout,
                Some(DEADLOCK_DETECTED) | Some(SERIALIZATION_FAILURE) | Some(UNIQUE_VIOLATION) => {
                    return RepositoryError::Conflict(db.message().to_string())
                }
                _ => {}
            }
        }
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

/// Postgres-backed stores sharing one pool. Calls made directly on the
/// store run on their own connection and commit on their own.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for PostgresStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresUnitOfWork::new(tx, self.lock_timeout)))
    }
}

pub(crate) const ACCOUNT_COLUMNS: &str =
    "id, owner_id, account_number, balance, currency, status, created_at, updated_at";

pub(crate) const TRANSACTION_COLUMNS: &str = "id, idempotency_key, transaction_type, status, \
     source_account_id, target_account_id, amount, currency, description, created_at, completed_at";

const LEDGER_COLUMNS: &str =
    "id, transaction_id, account_id, entry_type, amount, balance_after, currency, created_at";

#[async_trait]
impl AccountStore for PostgresStore {
    async fn insert(&self, account: &Account) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, owner_id, account_number, balance, currency, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id)
        .bind(account.owner_id)
        .bind(&account.account_number)
        .bind(account.balance().amount())
        .bind(account.balance().currency().as_str())
        .bind(account.status.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountRow::into_domain).transpose()
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> RepositoryResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE owner_id = $1 ORDER BY created_at",
            ACCOUNT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AccountRow::into_domain).collect()
    }

    async fn exists_by_account_number(&self, account_number: &str) -> RepositoryResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE account_number = $1)")
                .bind(account_number)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn save(&self, transaction: &Transaction) -> RepositoryResult<()> {
        unit_of_work::upsert_transaction(transaction)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE idempotency_key = $1
            ORDER BY (status = 'COMPLETED') DESC, created_at DESC
            LIMIT 1
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE source_account_id = $1 OR target_account_id = $1
            ORDER BY created_at DESC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn find_by_transaction_id(&self, transaction_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE transaction_id = $1 ORDER BY entry_type DESC",
            LEDGER_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntryRow::into_domain).collect()
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE account_id = $1 ORDER BY created_at DESC",
            LEDGER_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntryRow::into_domain).collect()
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn try_insert(
        &self,
        key: &str,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, owner_id, created_at, expires_at)
            VALUES ($1, $2, NOW(), $3)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(owner_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, key: &str) -> RepositoryResult<Option<IdempotencyRecord>> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            r#"
            SELECT key, owner_id, cached_status, cached_response_body, created_at, expires_at
            FROM idempotency_keys WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IdempotencyRow::into_domain).transpose()
    }

    async fn update_response(&self, key: &str, status: u16, body: &str) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE idempotency_keys SET cached_status = $2, cached_response_body = $3 WHERE key = $1",
        )
        .bind(key)
        .bind(i32::from(status))
        .bind(body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("idempotency key {}", key)));
        }
        Ok(())
    }

    async fn delete_unresolved(&self, key: &str) -> RepositoryResult<bool> {
        let result =
            sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND cached_status IS NULL")
                .bind(key)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditSink for PostgresStore {
    async fn record(&self, event: &AuditEvent) -> RepositoryResult<()> {
        // Runs on the pool, never inside a caller's transaction.
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, entity_type, entity_id, actor_id, action,
                before_snapshot, after_snapshot, balance_before, balance_after, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(event.entity_type.as_str())
        .bind(event.entity_id)
        .bind(event.actor_id)
        .bind(&event.action)
        .bind(&event.before_snapshot)
        .bind(&event.after_snapshot)
        .bind(event.balance_before)
        .bind(event.balance_after)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn corrupt(err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Serialization(err.to_string())
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AccountRow {
    id: Uuid,
    owner_id: Uuid,
    account_number: String,
    balance: Decimal,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    pub(crate) fn into_domain(self) -> RepositoryResult<Account> {
        Ok(Account::restore(
            self.id,
            self.owner_id,
            self.account_number,
            Money::of(self.balance, &self.currency).map_err(corrupt)?,
            self.status.parse().map_err(corrupt)?,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TransactionRow {
    id: Uuid,
    idempotency_key: Option<String>,
    transaction_type: String,
    status: String,
    source_account_id: Uuid,
    target_account_id: Uuid,
    amount: Decimal,
    currency: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    pub(crate) fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction::restore(
            self.id,
            self.idempotency_key,
            self.transaction_type.parse().map_err(corrupt)?,
            self.status.parse().map_err(corrupt)?,
            self.source_account_id,
            self.target_account_id,
            Money::of(self.amount, &self.currency).map_err(corrupt)?,
            self.description,
            self.created_at,
            self.completed_at,
        ))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    transaction_id: Uuid,
    account_id: Uuid,
    entry_type: String,
    amount: Decimal,
    balance_after: Decimal,
    currency: String,
    created_at: DateTime<Utc>,
}

impl LedgerEntryRow {
    fn into_domain(self) -> RepositoryResult<LedgerEntry> {
        Ok(LedgerEntry {
            id: self.id,
            transaction_id: self.transaction_id,
            account_id: self.account_id,
            entry_type: self.entry_type.parse().map_err(corrupt)?,
            amount: Money::of(self.amount, &self.currency).map_err(corrupt)?,
            balance_after: Money::of(self.balance_after, &self.currency).map_err(corrupt)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IdempotencyRow {
    key: String,
    owner_id: Uuid,
    cached_status: Option<i32>,
    cached_response_body: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl IdempotencyRow {
    fn into_domain(self) -> RepositoryResult<IdempotencyRecord> {
        let cached_status = self
            .cached_status
            .map(u16::try_from)
            .transpose()
            .map_err(corrupt)?;
        Ok(IdempotencyRecord {
            key: self.key,
            owner_id: self.owner_id,
            cached_status,
            cached_response_body: self.cached_response_body,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(
            RepositoryError::from(sqlx::Error::RowNotFound),
            RepositoryError::NotFound(_)
        ));
    }

    #[test]
    fn test_other_errors_map_to_database() {
        let err = RepositoryError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, RepositoryError::Database(_)));
    }

    #[test]
    fn test_corrupt_account_row_is_reported() {
        let row = AccountRow {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            account_number: "ACC".to_string(),
            balance: Decimal::ONE,
            currency: "USD".to_string(),
            status: "SUSPENDED".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(row.into_domain(), Err(RepositoryError::Serialization(_))));
    }
}
