//! Business-rule violations raised by the pure domain layer.

use thiserror::Error;
use uuid::Uuid;

use super::account::AccountStatus;
use super::money::{Money, MoneyError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
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

    #[error("{0}")]
    IllegalArgument(String),
}

impl DomainError {
    pub fn illegal(message: impl Into<String>) -> Self {
        DomainError::IllegalArgument(message.into())
    }
}

impl From<MoneyError> for DomainError {
    fn from(err: MoneyError) -> Self {
        DomainError::IllegalArgument(err.to_string())
    }
}
