use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Transaction as SqlxTransaction};
use std::time::Duration;

use super::{AccountRow, ACCOUNT_COLUMNS};
use crate::domain::{Account, LedgerEntry, Transaction};
use crate::ports::{AccountLockSet, RepositoryError, RepositoryResult, UnitOfWork};

/// One database transaction. Dropped without `commit`, sqlx rolls it back.
pub struct PostgresUnitOfWork {
    tx: Option<SqlxTransaction<'static, Postgres>>,
    lock_timeout: Duration,
}

impl PostgresUnitOfWork {
    pub(super) fn new(tx: SqlxTransaction<'static, Postgres>, lock_timeout: Duration) -> Self {
        Self {
            tx: Some(tx),
            lock_timeout,
        }
    }

    fn open(&mut self) -> RepositoryResult<&mut SqlxTransaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| RepositoryError::Database("unit of work already finished".to_string()))
    }
}

pub(super) fn upsert_transaction(transaction: &Transaction) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, idempotency_key, transaction_type, status, source_account_id,
            target_account_id, amount, currency, description, created_at, completed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status, completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.idempotency_key.as_deref())
    .bind(transaction.transaction_type.as_str())
    .bind(transaction.status().as_str())
    .bind(transaction.source_account_id)
    .bind(transaction.target_account_id)
    .bind(transaction.amount.amount())
    .bind(transaction.amount.currency().as_str())
    .bind(transaction.description.as_deref())
    .bind(transaction.created_at)
    .bind(transaction.completed_at())
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn find_all_for_update(&mut self, ids: &AccountLockSet) -> RepositoryResult<Vec<Account>> {
        let timeout_ms = self.lock_timeout.as_millis();
        let tx = self.open()?;

        // SET cannot take bind parameters; the value is a plain integer.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", timeout_ms))
            .execute(&mut **tx)
            .await?;

        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(ids.ids())
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(AccountRow::into_domain).collect()
    }

    async fn save_account(&mut self, account: &Account) -> RepositoryResult<()> {
        let tx = self.open()?;
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, owner_id, account_number, balance, currency, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET balance = EXCLUDED.balance, status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
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
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> RepositoryResult<()> {
        let tx = self.open()?;
        upsert_transaction(transaction).execute(&mut **tx).await?;
        Ok(())
    }

    async fn save_ledger_entry(&mut self, entry: &LedgerEntry) -> RepositoryResult<()> {
        let tx = self.open()?;
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, transaction_id, account_id, entry_type, amount, balance_after, currency, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.transaction_id)
        .bind(entry.account_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount.amount())
        .bind(entry.balance_after.amount())
        .bind(entry.amount.currency().as_str())
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(RepositoryError::Database("unit of work already finished".to_string())),
        }
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
