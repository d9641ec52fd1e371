//! Open account use case.

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Account, DomainError, Money};
use crate::ports::{AccountStore, RepositoryError};

#[derive(Debug, Clone)]
pub struct OpenAccountInput {
    pub owner_id: Uuid,
    pub account_number: String,
    pub opening_balance: Decimal,
    pub currency: String,
}

#[derive(Error, Debug)]
pub enum OpenAccountError {
    #[error("{0}")]
    Invalid(#[from] DomainError),

    #[error("Account number {0} already exists")]
    DuplicateAccountNumber(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct OpenAccount {
    accounts: Arc<dyn AccountStore>,
}

impl OpenAccount {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    pub async fn execute(&self, input: OpenAccountInput) -> Result<Account, OpenAccountError> {
        if self
            .accounts
            .exists_by_account_number(&input.account_number)
            .await?
        {
            return Err(OpenAccountError::DuplicateAccountNumber(input.account_number));
        }

        let balance = Money::of(input.opening_balance, &input.currency).map_err(DomainError::from)?;
        let account = Account::open(input.owner_id, input.account_number, balance)?;

        match self.accounts.insert(&account).await {
            Ok(()) => {
                tracing::info!(account_id = %account.id, owner_id = %account.owner_id, "Account opened");
                Ok(account)
            }
            Err(RepositoryError::Conflict(_)) => Err(OpenAccountError::DuplicateAccountNumber(
                account.account_number,
            )),
            Err(e) => Err(e.into()),
        }
    }
}
