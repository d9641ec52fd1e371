//! Transaction domain entity.
//! Framework-agnostic record of one transfer between two accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;
use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "TRANSFER",
        }
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSFER" => Ok(TransactionType::Transfer),
            other => Err(DomainError::illegal(format!("unknown transaction type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(DomainError::illegal(format!("unknown transaction status '{}'", other))),
        }
    }
}

/// A transfer between two distinct accounts.
///
/// Created PENDING; moves exactly once to COMPLETED or FAILED.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub idempotency_key: Option<String>,
    pub transaction_type: TransactionType,
    status: TransactionStatus,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Money,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new_transfer(
        source_account_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
        description: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<Self, DomainError> {
        if source_account_id == target_account_id {
            return Err(DomainError::illegal("Source and target accounts must differ"));
        }
        if !amount.is_positive() {
            return Err(DomainError::illegal("Transaction amount must be positive"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            idempotency_key,
            transaction_type: TransactionType::Transfer,
            status: TransactionStatus::Pending,
            source_account_id,
            target_account_id,
            amount,
            description,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    /// Rebuilds a transaction from persisted state.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        idempotency_key: Option<String>,
        transaction_type: TransactionType,
        status: TransactionStatus,
        source_account_id: Uuid,
        target_account_id: Uuid,
        amount: Money,
        description: Option<String>,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            idempotency_key,
            transaction_type,
            status,
            source_account_id,
            target_account_id,
            amount,
            description,
            created_at,
            completed_at,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn mark_completed(&mut self) -> Result<(), DomainError> {
        self.finish(TransactionStatus::Completed)
    }

    pub fn mark_failed(&mut self) -> Result<(), DomainError> {
        self.finish(TransactionStatus::Failed)
    }

    fn finish(&mut self, status: TransactionStatus) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::illegal(format!(
                "Transaction {} is already {}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}
