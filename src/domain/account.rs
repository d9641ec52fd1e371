//! Account aggregate.
//! Holds a balance that can only move through `debit` and `credit`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;
use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Frozen => "FROZEN",
            AccountStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AccountStatus::Active),
            "FROZEN" => Ok(AccountStatus::Frozen),
            "CLOSED" => Ok(AccountStatus::Closed),
            other => Err(DomainError::illegal(format!("unknown account status '{}'", other))),
        }
    }
}

/// Domain entity representing a customer account.
///
/// Invariant: `balance >= 0`. A debit that would break it is rejected and
/// leaves the account untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_number: String,
    balance: Money,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Opens a new ACTIVE account with a non-negative starting balance.
    pub fn open(
        owner_id: Uuid,
        account_number: impl Into<String>,
        opening_balance: Money,
    ) -> Result<Self, DomainError> {
        let account_number = account_number.into();
        if account_number.trim().is_empty() {
            return Err(DomainError::illegal("account number must not be blank"));
        }
        if opening_balance.is_negative() {
            return Err(DomainError::illegal("opening balance must not be negative"));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            account_number,
            balance: opening_balance,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an account from persisted state.
    pub fn restore(
        id: Uuid,
        owner_id: Uuid,
        account_number: String,
        balance: Money,
        status: AccountStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            account_number,
            balance,
            status,
            created_at,
            updated_at,
        }
    }

    pub fn balance(&self) -> &Money {
        &self.balance
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Withdraws `amount`, returning the balance after the debit.
    pub fn debit(&mut self, amount: &Money) -> Result<Money, DomainError> {
        if !amount.is_positive() {
            return Err(DomainError::illegal("Debit amount must be positive"));
        }
        if self.balance.is_less_than(amount)? {
            return Err(DomainError::InsufficientFunds {
                account_id: self.id,
                current_balance: self.balance.clone(),
                requested_amount: amount.clone(),
            });
        }

        self.balance = self.balance.subtract(amount)?;
        self.updated_at = Utc::now();
        Ok(self.balance.clone())
    }

    /// Deposits `amount`, returning the balance after the credit.
    pub fn credit(&mut self, amount: &Money) -> Result<Money, DomainError> {
        if !amount.is_positive() {
            return Err(DomainError::illegal("Credit amount must be positive"));
        }

        self.balance = self.balance.add(amount)?;
        self.updated_at = Utc::now();
        Ok(self.balance.clone())
    }
}
