//! Owner-scoped read access to accounts, their transactions and ledger entries.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Account, LedgerEntry, Transaction};
use crate::ports::{AccountStore, LedgerStore, RepositoryError, TransactionStore};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("You do not have access to this account")]
    Forbidden,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct AccountQueries {
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl AccountQueries {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            accounts,
            transactions,
            ledger,
        }
    }

    pub async fn account(&self, actor_id: Uuid, account_id: Uuid) -> Result<Account, QueryError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .ok_or(QueryError::NotFound {
                entity: "Account",
                id: account_id,
            })?;
        if account.owner_id != actor_id {
            return Err(QueryError::Forbidden);
        }
        Ok(account)
    }

    pub async fn accounts_of(&self, actor_id: Uuid) -> Result<Vec<Account>, QueryError> {
        Ok(self.accounts.find_by_owner(actor_id).await?)
    }

    /// Transactions touching the account, newest first.
    pub async fn history(&self, actor_id: Uuid, account_id: Uuid) -> Result<Vec<Transaction>, QueryError> {
        self.account(actor_id, account_id).await?;
        Ok(self.transactions.find_by_account_id(account_id).await?)
    }

    /// Postings of a transaction, visible to the owner of either side.
    pub async fn ledger(&self, actor_id: Uuid, transaction_id: Uuid) -> Result<Vec<LedgerEntry>, QueryError> {
        let transaction = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or(QueryError::NotFound {
                entity: "Transaction",
                id: transaction_id,
            })?;

        let mut visible = false;
        for account_id in [transaction.source_account_id, transaction.target_account_id] {
            if let Some(account) = self.accounts.find_by_id(account_id).await? {
                visible |= account.owner_id == actor_id;
            }
        }
        if !visible {
            return Err(QueryError::Forbidden);
        }

        Ok(self.ledger.find_by_transaction_id(transaction_id).await?)
    }
}
