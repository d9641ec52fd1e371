//! In-process implementation of every port.
//!
//! Rows carry their own async mutex so `find_all_for_update` behaves like a
//! row-level `FOR UPDATE`: locks are taken in ascending id order, bounded by
//! the lock timeout, and writes become visible only on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{Account, LedgerEntry, Transaction, TransactionStatus};
use crate::ports::{
    AccountLockSet, AccountStore, AuditEvent, AuditSink, IdempotencyRecord, IdempotencyStore,
    LedgerStore, RepositoryError, RepositoryResult, TransactionStore, UnitOfWork,
    UnitOfWorkFactory,
};

struct AccountRow {
    lock: Arc<RowLock<()>>,
    committed: Account,
}

#[derive(Default)]
struct Tables {
    accounts: RwLock<HashMap<Uuid, AccountRow>>,
    transactions: Mutex<HashMap<Uuid, Transaction>>,
    ledger: Mutex<Vec<LedgerEntry>>,
    idempotency: Mutex<HashMap<String, IdempotencyRecord>>,
    audit: Mutex<Vec<AuditEvent>>,
    fail_audit: AtomicBool,
}

/// Shared handle; clones see the same tables.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<Tables>,
    lock_timeout: Duration,
}

fn poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Database("in-memory table lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Tables::default()),
            lock_timeout,
        }
    }

    /// All audit events recorded so far, in order.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.tables
            .audit
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.tables
            .ledger
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.tables
            .transactions
            .lock()
            .map(|txs| txs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes every subsequent audit write fail.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.tables.fail_audit.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(InMemoryUnitOfWork {
            store: self.clone(),
            guards: Vec::new(),
            locked: HashSet::new(),
            accounts: HashMap::new(),
            transactions: Vec::new(),
            entries: Vec::new(),
        }))
    }
}

pub struct InMemoryUnitOfWork {
    store: InMemoryStore,
    guards: Vec<OwnedMutexGuard<()>>,
    locked: HashSet<Uuid>,
    accounts: HashMap<Uuid, Account>,
    transactions: Vec<Transaction>,
    entries: Vec<LedgerEntry>,
}

impl InMemoryUnitOfWork {
    fn release(&mut self) {
        self.accounts.clear();
        self.transactions.clear();
        self.entries.clear();
        self.locked.clear();
        self.guards.clear();
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn find_all_for_update(&mut self, ids: &AccountLockSet) -> RepositoryResult<Vec<Account>> {
        let pending: Vec<(Uuid, Arc<RowLock<()>>)> = {
            let accounts = self.store.tables.accounts.read().map_err(poisoned)?;
            ids.ids()
                .iter()
                .filter(|id| !self.locked.contains(id))
                .filter_map(|id| accounts.get(id).map(|row| (*id, row.lock.clone())))
                .collect()
        };

        let acquire = async {
            let mut guards = Vec::with_capacity(pending.len());
            for (_, lock) in &pending {
                guards.push(lock.clone().lock_owned().await);
            }
            guards
        };
        // On timeout the partially built guard list is dropped with the future.
        let guards = tokio::time::timeout(self.store.lock_timeout, acquire)
            .await
            .map_err(|_| RepositoryError::LockTimeout)?;

        self.guards.extend(guards);
        self.locked.extend(pending.iter().map(|(id, _)| *id));

        let accounts = self.store.tables.accounts.read().map_err(poisoned)?;
        Ok(ids
            .ids()
            .iter()
            .filter_map(|id| {
                self.accounts
                    .get(id)
                    .cloned()
                    .or_else(|| accounts.get(id).map(|row| row.committed.clone()))
            })
            .collect())
    }

    async fn save_account(&mut self, account: &Account) -> RepositoryResult<()> {
        self.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> RepositoryResult<()> {
        self.transactions.push(transaction.clone());
        Ok(())
    }

    async fn save_ledger_entry(&mut self, entry: &LedgerEntry) -> RepositoryResult<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        {
            let mut accounts = self.store.tables.accounts.write().map_err(poisoned)?;
            for (id, account) in self.accounts.drain() {
                match accounts.get_mut(&id) {
                    Some(row) => row.committed = account,
                    None => {
                        accounts.insert(
                            id,
                            AccountRow {
                                lock: Arc::new(RowLock::new(())),
                                committed: account,
                            },
                        );
                    }
                }
            }
        }
        {
            let mut transactions = self.store.tables.transactions.lock().map_err(poisoned)?;
            for tx in self.transactions.drain(..) {
                transactions.insert(tx.id, tx);
            }
        }
        self.store
            .tables
            .ledger
            .lock()
            .map_err(poisoned)?
            .append(&mut self.entries);

        self.release();
        Ok(())
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        self.release();
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn insert(&self, account: &Account) -> RepositoryResult<()> {
        let mut accounts = self.tables.accounts.write().map_err(poisoned)?;
        if accounts.contains_key(&account.id) {
            return Err(RepositoryError::Conflict(format!("account {} exists", account.id)));
        }
        if accounts
            .values()
            .any(|row| row.committed.account_number == account.account_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "account number {} is taken",
                account.account_number
            )));
        }
        accounts.insert(
            account.id,
            AccountRow {
                lock: Arc::new(RowLock::new(())),
                committed: account.clone(),
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Account>> {
        let accounts = self.tables.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(&id).map(|row| row.committed.clone()))
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> RepositoryResult<Vec<Account>> {
        let accounts = self.tables.accounts.read().map_err(poisoned)?;
        let mut owned: Vec<Account> = accounts
            .values()
            .filter(|row| row.committed.owner_id == owner_id)
            .map(|row| row.committed.clone())
            .collect();
        owned.sort_by_key(|account| account.created_at);
        Ok(owned)
    }

    async fn exists_by_account_number(&self, account_number: &str) -> RepositoryResult<bool> {
        let accounts = self.tables.accounts.read().map_err(poisoned)?;
        Ok(accounts
            .values()
            .any(|row| row.committed.account_number == account_number))
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn save(&self, transaction: &Transaction) -> RepositoryResult<()> {
        self.tables
            .transactions
            .lock()
            .map_err(poisoned)?
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let transactions = self.tables.transactions.lock().map_err(poisoned)?;
        Ok(transactions.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> RepositoryResult<Option<Transaction>> {
        let transactions = self.tables.transactions.lock().map_err(poisoned)?;
        let mut matching: Vec<&Transaction> = transactions
            .values()
            .filter(|tx| tx.idempotency_key.as_deref() == Some(key))
            .collect();
        matching.sort_by_key(|tx| tx.status() != TransactionStatus::Completed);
        Ok(matching.first().map(|tx| (*tx).clone()))
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> RepositoryResult<Vec<Transaction>> {
        let transactions = self.tables.transactions.lock().map_err(poisoned)?;
        let mut touching: Vec<Transaction> = transactions
            .values()
            .filter(|tx| tx.source_account_id == account_id || tx.target_account_id == account_id)
            .cloned()
            .collect();
        touching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(touching)
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn find_by_transaction_id(&self, transaction_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>> {
        let ledger = self.tables.ledger.lock().map_err(poisoned)?;
        Ok(ledger
            .iter()
            .filter(|entry| entry.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> RepositoryResult<Vec<LedgerEntry>> {
        let ledger = self.tables.ledger.lock().map_err(poisoned)?;
        let mut entries: Vec<LedgerEntry> = ledger
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn try_insert(
        &self,
        key: &str,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut records = self.tables.idempotency.lock().map_err(poisoned)?;
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(
            key.to_string(),
            IdempotencyRecord::claimed(key, owner_id, expires_at),
        );
        Ok(true)
    }

    async fn find(&self, key: &str) -> RepositoryResult<Option<IdempotencyRecord>> {
        let records = self.tables.idempotency.lock().map_err(poisoned)?;
        Ok(records.get(key).cloned())
    }

    async fn update_response(&self, key: &str, status: u16, body: &str) -> RepositoryResult<()> {
        let mut records = self.tables.idempotency.lock().map_err(poisoned)?;
        let record = records
            .get_mut(key)
            .ok_or_else(|| RepositoryError::NotFound(format!("idempotency key {}", key)))?;
        record.cached_status = Some(status);
        record.cached_response_body = Some(body.to_string());
        Ok(())
    }

    async fn delete_unresolved(&self, key: &str) -> RepositoryResult<bool> {
        let mut records = self.tables.idempotency.lock().map_err(poisoned)?;
        match records.get(key) {
            Some(record) if !record.is_resolved() => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut records = self.tables.idempotency.lock().map_err(poisoned)?;
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, event: &AuditEvent) -> RepositoryResult<()> {
        if self.tables.fail_audit.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("audit log unavailable".to_string()));
        }
        self.tables.audit.lock().map_err(poisoned)?.push(event.clone());
        Ok(())
    }
}
