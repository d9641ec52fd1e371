//! Outbound ports consumed by the transfer engine.
//!
//! Storage technology lives behind these traits. Everything that must commit
//! atomically with a transfer goes through a [`UnitOfWork`]; the other stores
//! commit each call on their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Account, LedgerEntry, Transaction};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out waiting for row locks")]
    LockTimeout,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Set of account ids to lock, always in ascending id order.
///
/// This is the only way to ask a [`UnitOfWork`] for row locks, so every
/// caller acquires locks in the same global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLockSet(Vec<Uuid>);

impl AccountLockSet {
    pub fn new(ids: impl IntoIterator<Item = Uuid>) -> Self {
        let ordered: BTreeSet<Uuid> = ids.into_iter().collect();
        Self(ordered.into_iter().collect())
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One atomic unit of work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Locks the named rows (ascending id order, bounded by the configured
    /// lock timeout) and returns the accounts found, ascending by id.
    /// Either every found row is locked or none is.
    async fn find_all_for_update(&mut self, ids: &AccountLockSet) -> RepositoryResult<Vec<Account>>;

    async fn save_account(&mut self, account: &Account) -> RepositoryResult<()>;

    async fn save_transaction(&mut self, transaction: &Transaction) -> RepositoryResult<()>;

    async fn save_ledger_entry(&mut self, entry: &LedgerEntry) -> RepositoryResult<()>;

    async fn commit(&mut self) -> RepositoryResult<()>;

    async fn rollback(&mut self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Persists a newly opened account. Duplicate account numbers are a `Conflict`.
    async fn insert(&self, account: &Account) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Account>>;

    async fn find_by_owner(&self, owner_id: Uuid) -> RepositoryResult<Vec<Account>>;

    async fn exists_by_account_number(&self, account_number: &str) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Upserts a transaction outside any unit of work.
    async fn save(&self, transaction: &Transaction) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    /// Returns the COMPLETED transaction for the key when one exists.
    async fn find_by_idempotency_key(&self, key: &str) -> RepositoryResult<Option<Transaction>>;

    /// Transactions touching the account, newest first.
    async fn find_by_account_id(&self, account_id: Uuid) -> RepositoryResult<Vec<Transaction>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_by_transaction_id(&self, transaction_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>>;

    async fn find_by_account_id(&self, account_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>>;
}

/// Stored idempotency claim. Resolved once `cached_status` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub owner_id: Uuid,
    pub cached_status: Option<u16>,
    pub cached_response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn claimed(key: &str, owner_id: Uuid, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            owner_id,
            cached_status: None,
            cached_response_body: None,
            created_at: Utc::now(),
            expires_at,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.cached_status.is_some() && self.cached_response_body.is_some()
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomic insert-if-absent. `true` when this call created the record.
    async fn try_insert(
        &self,
        key: &str,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    async fn find(&self, key: &str) -> RepositoryResult<Option<IdempotencyRecord>>;

    async fn update_response(&self, key: &str, status: u16, body: &str) -> RepositoryResult<()>;

    /// Deletes the record only while it is still unresolved.
    async fn delete_unresolved(&self, key: &str) -> RepositoryResult<bool>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEntity {
    Account,
    Transaction,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Account => "ACCOUNT",
            AuditEntity::Transaction => "TRANSACTION",
        }
    }
}

/// A single audit row. Written through an independently committed path.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub id: Uuid,
    pub entity_type: AuditEntity,
    pub entity_id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub before_snapshot: Option<serde_json::Value>,
    pub after_snapshot: Option<serde_json::Value>,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Must commit on its own, independent of any open unit of work.
    async fn record(&self, event: &AuditEvent) -> RepositoryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_set_sorts_and_dedups() {
        let a = Uuid::from_u128(3);
        let b = Uuid::from_u128(1);
        let set = AccountLockSet::new([a, b, a]);
        assert_eq!(set.ids(), &[b, a]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_lock_set_order_is_independent_of_roles() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(AccountLockSet::new([a, b]), AccountLockSet::new([b, a]));
    }

    #[test]
    fn test_record_resolution() {
        let mut record = IdempotencyRecord::claimed("k", Uuid::new_v4(), Utc::now());
        assert!(!record.is_resolved());
        record.cached_status = Some(201);
        record.cached_response_body = Some("{}".to_string());
        assert!(record.is_resolved());
    }
}
