//! Domain layer: value objects, aggregates and the pure transfer service.

pub mod account;
pub mod error;
pub mod ledger_entry;
pub mod money;
pub mod transaction;
pub mod transfer_service;

pub use account::{Account, AccountStatus};
pub use error::DomainError;
pub use ledger_entry::{EntryType, LedgerEntry};
pub use money::{Currency, Money, MoneyError};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use transfer_service::{TransferDomainService, TransferOutcome};
