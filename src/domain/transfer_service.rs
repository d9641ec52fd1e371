//! Pure double-entry transfer logic. No I/O.

use super::account::Account;
use super::error::DomainError;
use super::ledger_entry::{EntryType, LedgerEntry};
use super::money::Money;
use super::transaction::{Transaction, TransactionStatus};

/// Postings and balances produced by a successful transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub debit_entry: LedgerEntry,
    pub credit_entry: LedgerEntry,
    pub source_balance_after: Money,
    pub target_balance_after: Money,
}

/// Computes a balanced transfer between two locked accounts.
///
/// Validation runs before any mutation and the debit runs before the credit,
/// so an error never leaves a half-applied transfer behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferDomainService;

impl TransferDomainService {
    pub fn new() -> Self {
        Self
    }

    pub fn execute_transfer(
        &self,
        source: &mut Account,
        target: &mut Account,
        amount: &Money,
        transaction: &mut Transaction,
    ) -> Result<TransferOutcome, DomainError> {
        if source.id == target.id {
            return Err(DomainError::illegal("Cannot transfer to the same account"));
        }
        if !amount.is_positive() {
            return Err(DomainError::illegal("Transfer amount must be positive"));
        }
        if transaction.status() != TransactionStatus::Pending {
            return Err(DomainError::illegal(format!(
                "Transaction {} is already {}",
                transaction.id,
                transaction.status()
            )));
        }
        if !source.is_active() {
            return Err(DomainError::AccountNotActive {
                account_id: source.id,
                status: source.status,
            });
        }
        if !target.is_active() {
            return Err(DomainError::AccountNotActive {
                account_id: target.id,
                status: target.status,
            });
        }
        if source.balance().currency() != amount.currency()
            || target.balance().currency() != amount.currency()
        {
            return Err(DomainError::illegal(format!(
                "Currency mismatch: source={}, target={}, amount={}",
                source.balance().currency(),
                target.balance().currency(),
                amount.currency()
            )));
        }

        let source_balance_after = source.debit(amount)?;
        let target_balance_after = target.credit(amount)?;

        let debit_entry = LedgerEntry::new(
            transaction.id,
            source.id,
            EntryType::Debit,
            amount.clone(),
            source_balance_after.clone(),
        );
        let credit_entry = LedgerEntry::new(
            transaction.id,
            target.id,
            EntryType::Credit,
            amount.clone(),
            target_balance_after.clone(),
        );

        transaction.mark_completed()?;

        Ok(TransferOutcome {
            debit_entry,
            credit_entry,
            source_balance_after,
            target_balance_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountStatus;
    use uuid::Uuid;

    fn usd(amount: &str) -> Money {
        Money::parse(amount, "USD").unwrap()
    }

    fn account(balance: &str) -> Account {
        Account::open(Uuid::new_v4(), "ACC", usd(balance)).unwrap()
    }

    fn pending(source: &Account, target: &Account, amount: &str) -> Transaction {
        Transaction::new_transfer(source.id, target.id, usd(amount), None, None).unwrap()
    }

    #[test]
    fn test_transfer_moves_money_and_builds_balanced_entries() {
        let service = TransferDomainService::new();
        let mut source = account("1000");
        let mut target = account("500");
        let mut tx = pending(&source, &target, "250");

        let outcome = service
            .execute_transfer(&mut source, &mut target, &usd("250"), &mut tx)
            .unwrap();

        assert_eq!(source.balance(), &usd("750"));
        assert_eq!(target.balance(), &usd("750"));
        assert_eq!(outcome.source_balance_after, usd("750"));
        assert_eq!(outcome.target_balance_after, usd("750"));

        assert_eq!(outcome.debit_entry.entry_type, EntryType::Debit);
        assert_eq!(outcome.debit_entry.account_id, source.id);
        assert_eq!(outcome.debit_entry.balance_after, usd("750"));
        assert_eq!(outcome.credit_entry.entry_type, EntryType::Credit);
        assert_eq!(outcome.credit_entry.account_id, target.id);
        assert_eq!(outcome.debit_entry.amount, outcome.credit_entry.amount);
        assert_eq!(outcome.debit_entry.transaction_id, tx.id);
        assert_eq!(outcome.credit_entry.transaction_id, tx.id);
        assert_ne!(outcome.debit_entry.id, outcome.credit_entry.id);

        assert_eq!(tx.status(), TransactionStatus::Completed);
        assert!(tx.completed_at().is_some());
    }

    #[test]
    fn test_conservation_over_transfer() {
        let service = TransferDomainService::new();
        let mut source = account("123.4567");
        let mut target = account("0.0001");
        let total_before = source.balance().add(target.balance()).unwrap();
        let mut tx = pending(&source, &target, "23.4567");

        service
            .execute_transfer(&mut source, &mut target, &usd("23.4567"), &mut tx)
            .unwrap();

        let total_after = source.balance().add(target.balance()).unwrap();
        assert_eq!(total_before, total_after);
    }

    #[test]
    fn test_self_transfer_is_rejected() {
        let service = TransferDomainService::new();
        let mut source = account("100");
        let mut same = source.clone();
        let mut tx =
            Transaction::new_transfer(source.id, Uuid::new_v4(), usd("1"), None, None).unwrap();

        let err = service
            .execute_transfer(&mut source, &mut same, &usd("1"), &mut tx)
            .unwrap_err();
        assert!(matches!(err, DomainError::IllegalArgument(_)));
        assert_eq!(source.balance(), &usd("100"));
        assert_eq!(tx.status(), TransactionStatus::Pending);
    }

    #[test]
    fn test_non_positive_amount_is_rejected() {
        let service = TransferDomainService::new();
        let mut source = account("100");
        let mut target = account("100");
        let mut tx = pending(&source, &target, "1");

        let err = service
            .execute_transfer(&mut source, &mut target, &usd("0"), &mut tx)
            .unwrap_err();
        assert!(matches!(err, DomainError::IllegalArgument(_)));
    }

    #[test]
    fn test_inactive_source_checked_before_target() {
        let service = TransferDomainService::new();
        let mut source = account("100");
        let mut target = account("100");
        source.status = AccountStatus::Frozen;
        target.status = AccountStatus::Closed;
        let mut tx = pending(&source, &target, "10");

        let err = service
            .execute_transfer(&mut source, &mut target, &usd("10"), &mut tx)
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::AccountNotActive {
                account_id: source.id,
                status: AccountStatus::Frozen,
            }
        );
    }

    #[test]
    fn test_inactive_target_is_rejected_without_mutation() {
        let service = TransferDomainService::new();
        let mut source = account("100");
        let mut target = account("100");
        target.status = AccountStatus::Closed;
        let mut tx = pending(&source, &target, "10");

        let err = service
            .execute_transfer(&mut source, &mut target, &usd("10"), &mut tx)
            .unwrap_err();
        assert!(matches!(err, DomainError::AccountNotActive { account_id, .. } if account_id == target.id));
        assert_eq!(source.balance(), &usd("100"));
        assert_eq!(target.balance(), &usd("100"));
    }

    #[test]
    fn test_insufficient_funds_leaves_both_accounts_untouched() {
        let service = TransferDomainService::new();
        let mut source = account("10");
        let mut target = account("5");
        let mut tx = pending(&source, &target, "10.0001");

        let err = service
            .execute_transfer(&mut source, &mut target, &usd("10.0001"), &mut tx)
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientFunds { .. }));
        assert_eq!(source.balance(), &usd("10"));
        assert_eq!(target.balance(), &usd("5"));
        assert_eq!(tx.status(), TransactionStatus::Pending);
    }

    #[test]
    fn test_currency_mismatch_is_rejected_before_mutation() {
        let service = TransferDomainService::new();
        let mut source = account("10");
        let mut target =
            Account::open(Uuid::new_v4(), "EUR-1", Money::parse("5", "EUR").unwrap()).unwrap();
        let mut tx = pending(&source, &target, "1");

        let err = service
            .execute_transfer(&mut source, &mut target, &usd("1"), &mut tx)
            .unwrap_err();
        assert!(matches!(err, DomainError::IllegalArgument(_)));
        assert_eq!(source.balance(), &usd("10"));
    }

    #[test]
    fn test_completed_transaction_cannot_be_reused() {
        let service = TransferDomainService::new();
        let mut source = account("10");
        let mut target = account("0");
        let mut tx = pending(&source, &target, "1");
        tx.mark_failed().unwrap();

        assert!(service
            .execute_transfer(&mut source, &mut target, &usd("1"), &mut tx)
            .is_err());
        assert_eq!(source.balance(), &usd("10"));
    }
}
