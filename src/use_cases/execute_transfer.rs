//! Execute transfer use case.
//! Claims the idempotency key, locks both accounts in ascending id order,
//! runs the double-entry posting and commits it as one unit of work.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, DomainError, Money, MoneyError, Transaction, TransactionStatus,
    TransferDomainService, TransferOutcome,
};
use crate::ports::{
    AccountLockSet, RepositoryError, TransactionStore, UnitOfWork, UnitOfWorkFactory,
};
use crate::services::audit::{self, AuditTrail};
use crate::services::idempotency::{
    CachedResponse, IdempotencyCoordinator, IdempotencyKey, IdempotencyState,
};

/// Status stored with a resolved idempotency key.
pub const CREATED_STATUS: u16 = 201;

/// Tunables shared by the engine's collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub lock_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub replay_wait: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5000),
            idempotency_ttl: Duration::from_secs(86_400),
            replay_wait: Duration::from_millis(5000),
        }
    }
}

/// Input for the transfer use case. Amount and currency are validated
/// at the adapter boundary before they get here.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub transaction_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision_option")]
    pub source_balance_after: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::arbitrary_precision_option")]
    pub target_balance_after: Option<Decimal>,
    pub status: TransactionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub replayed: bool,
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Account {account_id} has insufficient funds: balance={current_balance}, requested={requested_amount}")]
    InsufficientFunds {
        account_id: Uuid,
        current_balance: Money,
        requested_amount: Money,
    },

    #[error("Account {account_id} is not active (status={status})")]
    AccountNotActive {
        account_id: Uuid,
        status: AccountStatus,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("You do not have access to this account")]
    AccountOwnership { account_id: Uuid, actor_id: Uuid },

    #[error("Request with idempotency key '{0}' is currently being processed")]
    RequestInProgress(String),

    #[error("{0}")]
    IllegalArgument(String),

    #[error("Timed out waiting for account locks")]
    LockTimeout,

    #[error("Infrastructure failure: {0}")]
    Infrastructure(RepositoryError),
}

impl TransferError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::LockTimeout
                | TransferError::Infrastructure(RepositoryError::Conflict(_))
        )
    }
}

impl From<DomainError> for TransferError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientFunds {
                account_id,
                current_balance,
                requested_amount,
            } => TransferError::InsufficientFunds {
                account_id,
                current_balance,
                requested_amount,
            },
            DomainError::AccountNotActive { account_id, status } => {
                TransferError::AccountNotActive { account_id, status }
            }
            DomainError::IllegalArgument(message) => TransferError::IllegalArgument(message),
        }
    }
}

impl From<MoneyError> for TransferError {
    fn from(err: MoneyError) -> Self {
        TransferError::IllegalArgument(err.to_string())
    }
}

impl From<RepositoryError> for TransferError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::LockTimeout => TransferError::LockTimeout,
            other => TransferError::Infrastructure(other),
        }
    }
}

enum Claim {
    Owned,
    Replay(TransferResult),
}

/// Failure inside the locked section. A rejected posting carries the
/// PENDING transaction so it can be recorded as FAILED after rollback.
enum LockedFailure {
    Rejected {
        transaction: Transaction,
        error: DomainError,
    },
    Aborted(TransferError),
}

impl From<RepositoryError> for LockedFailure {
    fn from(err: RepositoryError) -> Self {
        LockedFailure::Aborted(err.into())
    }
}

struct Posted {
    transaction: Transaction,
    outcome: TransferOutcome,
    source_balance_before: Decimal,
    target_balance_before: Decimal,
}

/// Use case for moving money between two accounts.
pub struct TransferOrchestrator {
    units: Arc<dyn UnitOfWorkFactory>,
    transactions: Arc<dyn TransactionStore>,
    idempotency: IdempotencyCoordinator,
    audit: AuditTrail,
    domain: TransferDomainService,
}

impl TransferOrchestrator {
    pub fn new(
        units: Arc<dyn UnitOfWorkFactory>,
        transactions: Arc<dyn TransactionStore>,
        idempotency: IdempotencyCoordinator,
        audit: AuditTrail,
    ) -> Self {
        Self {
            units,
            transactions,
            idempotency,
            audit,
            domain: TransferDomainService::new(),
        }
    }

    pub fn idempotency(&self) -> &IdempotencyCoordinator {
        &self.idempotency
    }

    pub async fn execute(&self, command: TransferCommand) -> Result<TransferResult, TransferError> {
        info!(
            source = %command.source_account_id,
            target = %command.target_account_id,
            amount = %command.amount,
            currency = %command.currency,
            "Processing transfer"
        );

        if command.source_account_id == command.target_account_id {
            return Err(TransferError::IllegalArgument(
                "Cannot transfer to the same account".to_string(),
            ));
        }
        let amount = Money::of(command.amount, &command.currency)?;
        if !amount.is_positive() {
            return Err(TransferError::IllegalArgument(
                "Transfer amount must be positive".to_string(),
            ));
        }

        let Some(key) = command.idempotency_key.clone() else {
            return self.transfer(&command, amount).await;
        };

        if let Claim::Replay(result) = self.claim(&key, &command).await? {
            info!(idempotency_key = %key, transaction_id = %result.transaction_id, "Replaying transfer");
            return Ok(result);
        }

        match self.transfer(&command, amount).await {
            Ok(result) => {
                self.resolve(&key, &result).await;
                Ok(result)
            }
            Err(err) => {
                if let Err(e) = self.idempotency.release(&key).await {
                    warn!(idempotency_key = %key, error = %e, "Failed to release idempotency claim");
                }
                Err(err)
            }
        }
    }

    /// Claims `key`, or parks until the current claimant resolves or releases it.
    /// A key held by another actor is never replayed to the caller.
    async fn claim(
        &self,
        key: &IdempotencyKey,
        command: &TransferCommand,
    ) -> Result<Claim, TransferError> {
        let deadline = Instant::now() + self.idempotency.replay_wait();
        loop {
            if self.idempotency.try_claim(key, command.actor_id).await? {
                return Ok(Claim::Owned);
            }
            info!(idempotency_key = %key, "Duplicate idempotency key detected");

            if let Some(owner_id) = self.idempotency.owner(key).await? {
                ensure_key_owner(key, owner_id, command)?;
            }

            match self.idempotency.await_resolution(key, deadline).await? {
                IdempotencyState::Resolved(cached) => {
                    ensure_key_owner(key, cached.owner_id, command)?;
                    return Ok(Claim::Replay(replay(cached)?));
                }
                IdempotencyState::Absent if Instant::now() < deadline => continue,
                IdempotencyState::Absent | IdempotencyState::Claimed => {
                    return Err(TransferError::RequestInProgress(key.to_string()))
                }
            }
        }
    }

    async fn resolve(&self, key: &IdempotencyKey, result: &TransferResult) {
        let body = match serde_json::to_string(result) {
            Ok(body) => body,
            Err(e) => {
                error!(idempotency_key = %key, error = %e, "Failed to serialize transfer result");
                return;
            }
        };
        if let Err(e) = self.idempotency.resolve(key, CREATED_STATUS, &body).await {
            error!(idempotency_key = %key, error = %e, "Failed to cache transfer result");
        }
    }

    async fn transfer(&self, command: &TransferCommand, amount: Money) -> Result<TransferResult, TransferError> {
        let mut uow = self.units.begin().await?;

        let posted = match self.post_locked(uow.as_mut(), command, amount).await {
            Ok(posted) => posted,
            Err(failure) => {
                if let Err(e) = uow.rollback().await {
                    warn!(error = %e, "Rollback failed");
                }
                return Err(self.record_failure(failure, command.actor_id).await);
            }
        };
        uow.commit().await?;

        let Posted {
            transaction,
            outcome,
            source_balance_before,
            target_balance_before,
        } = posted;

        self.audit
            .account_change(
                command.source_account_id,
                command.actor_id,
                audit::ACTION_DEBIT,
                source_balance_before,
                outcome.source_balance_after.amount(),
            )
            .await;
        self.audit
            .account_change(
                command.target_account_id,
                command.actor_id,
                audit::ACTION_CREDIT,
                target_balance_before,
                outcome.target_balance_after.amount(),
            )
            .await;

        info!(
            transaction_id = %transaction.id,
            source_balance = %outcome.source_balance_after,
            target_balance = %outcome.target_balance_after,
            "Transfer completed"
        );

        Ok(TransferResult {
            transaction_id: transaction.id,
            source_account_id: transaction.source_account_id,
            target_account_id: transaction.target_account_id,
            amount: transaction.amount.amount(),
            currency: transaction.amount.currency().to_string(),
            source_balance_after: Some(outcome.source_balance_after.amount()),
            target_balance_after: Some(outcome.target_balance_after.amount()),
            status: transaction.status(),
            completed_at: transaction.completed_at(),
            replayed: false,
        })
    }

    /// Everything that runs while both row locks are held.
    async fn post_locked(
        &self,
        uow: &mut dyn UnitOfWork,
        command: &TransferCommand,
        amount: Money,
    ) -> Result<Posted, LockedFailure> {
        let lock_set = AccountLockSet::new([command.source_account_id, command.target_account_id]);
        let locked = uow.find_all_for_update(&lock_set).await?;

        let mut source = take_account(&locked, command.source_account_id)?;
        let mut target = take_account(&locked, command.target_account_id)?;

        if source.owner_id != command.actor_id {
            warn!(account_id = %source.id, actor_id = %command.actor_id, "Transfer rejected: actor does not own source account");
            return Err(LockedFailure::Aborted(TransferError::AccountOwnership {
                account_id: source.id,
                actor_id: command.actor_id,
            }));
        }

        let source_balance_before = source.balance().amount();
        let target_balance_before = target.balance().amount();

        let mut transaction = Transaction::new_transfer(
            source.id,
            target.id,
            amount.clone(),
            command.description.clone(),
            command.idempotency_key.as_ref().map(|key| key.to_string()),
        )
        .map_err(|e| LockedFailure::Aborted(e.into()))?;

        let outcome = match self
            .domain
            .execute_transfer(&mut source, &mut target, &amount, &mut transaction)
        {
            Ok(outcome) => outcome,
            Err(error) => return Err(LockedFailure::Rejected { transaction, error }),
        };

        uow.save_transaction(&transaction).await?;
        uow.save_ledger_entry(&outcome.debit_entry).await?;
        uow.save_ledger_entry(&outcome.credit_entry).await?;
        uow.save_account(&source).await?;
        uow.save_account(&target).await?;

        Ok(Posted {
            transaction,
            outcome,
            source_balance_before,
            target_balance_before,
        })
    }

    /// Persists a FAILED transaction and its audit event outside the
    /// rolled-back unit of work, then hands back the error to raise.
    async fn record_failure(&self, failure: LockedFailure, actor_id: Uuid) -> TransferError {
        let (mut transaction, error) = match failure {
            LockedFailure::Aborted(err) => return err,
            LockedFailure::Rejected { transaction, error } => (transaction, error),
        };

        warn!(transaction_id = %transaction.id, error = %error, "Transfer rejected");

        if let Err(e) = transaction.mark_failed() {
            error!(transaction_id = %transaction.id, error = %e, "Could not mark transaction failed");
        } else if let Err(e) = self.transactions.save(&transaction).await {
            error!(transaction_id = %transaction.id, error = %e, "Failed to persist FAILED transaction");
        }

        self.audit
            .transaction_event(
                transaction.id,
                actor_id,
                audit::ACTION_TRANSFER_FAILED,
                None,
                Some(json!({ "error": error.to_string() })),
            )
            .await;

        error.into()
    }
}

fn take_account(locked: &[Account], id: Uuid) -> Result<Account, LockedFailure> {
    locked
        .iter()
        .find(|account| account.id == id)
        .cloned()
        .ok_or(LockedFailure::Aborted(TransferError::AccountNotFound(id)))
}

fn ensure_key_owner(
    key: &IdempotencyKey,
    owner_id: Uuid,
    command: &TransferCommand,
) -> Result<(), TransferError> {
    if owner_id == command.actor_id {
        return Ok(());
    }
    warn!(
        idempotency_key = %key,
        actor = %command.actor_id,
        "Idempotency key belongs to another actor"
    );
    Err(TransferError::AccountOwnership {
        account_id: command.source_account_id,
        actor_id: command.actor_id,
    })
}

fn replay(cached: CachedResponse) -> Result<TransferResult, TransferError> {
    let mut result: TransferResult = serde_json::from_str(&cached.body).map_err(|e| {
        TransferError::Infrastructure(RepositoryError::Serialization(e.to_string()))
    })?;
    result.replayed = true;
    Ok(result)
}
