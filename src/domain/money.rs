//! Money value object.
//! Fixed-point amount at scale 4 with banker's rounding, tagged with an ISO 4217 code.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits every amount is normalised to.
pub const SCALE: u32 = 4;

/// Maximum number of integer digits accepted at the wire boundary.
pub const MAX_INTEGER_DIGITS: u32 = 15;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency must be a 3-letter ISO 4217 code, got '{0}'")]
    InvalidCurrency(String),

    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Arithmetic overflow")]
    Overflow,
}

/// Upper-case three letter currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: &str) -> Result<Self, MoneyError> {
        if code.len() != 3 || !code.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Immutable monetary value. Every operation returns a new instance.
///
/// Equality compares the numeric value, so `100.5` and `100.5000` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    pub fn of(amount: Decimal, currency: &str) -> Result<Self, MoneyError> {
        Ok(Self::new(amount, Currency::parse(currency)?))
    }

    /// Parses a decimal literal such as `"100.50"`.
    pub fn parse(amount: &str, currency: &str) -> Result<Self, MoneyError> {
        let amount = Decimal::from_str(amount.trim())
            .map_err(|e| MoneyError::InvalidAmount(format!("{}: {}", amount, e)))?;
        Self::of(amount, currency)
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: normalize(amount),
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.assert_same_currency(other)?;
        let sum = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(sum, self.currency.clone()))
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.assert_same_currency(other)?;
        let difference = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(difference, self.currency.clone()))
    }

    pub fn negate(&self) -> Money {
        Self::new(-self.amount, self.currency.clone())
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn compare(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.assert_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    pub fn is_less_than(&self, other: &Money) -> Result<bool, MoneyError> {
        Ok(self.compare(other)? == Ordering::Less)
    }

    pub fn is_greater_than_or_equal(&self, other: &Money) -> Result<bool, MoneyError> {
        Ok(self.compare(other)? != Ordering::Less)
    }

    fn assert_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Rounds half-to-even at [`SCALE`] and pins the representation to exactly four digits.
pub fn normalize(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(SCALE);
    rounded
}

/// True when the value fits the accepted wire precision (15 integer, 4 fractional digits).
pub fn fits_wire_precision(amount: &Decimal) -> bool {
    if normalize(*amount) != *amount {
        return false;
    }
    let limit = Decimal::from(10u64.pow(MAX_INTEGER_DIGITS));
    amount.abs().trunc() < limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(amount: &str) -> Money {
        Money::parse(amount, "USD").unwrap()
    }

    #[test]
    fn test_of_normalises_to_scale_four() {
        let money = usd("100.50");
        assert_eq!(money.amount(), Decimal::new(1_005_000, 4));
        assert_eq!(money.amount().scale(), 4);
        assert_eq!(money.amount().to_string(), "100.5000");
    }

    #[test]
    fn test_rounding_is_half_even() {
        assert_eq!(usd("1.00005").amount().to_string(), "1.0000");
        assert_eq!(usd("1.00015").amount().to_string(), "1.0002");
        assert_eq!(usd("1.00025").amount().to_string(), "1.0002");
        assert_eq!(usd("-1.00015").amount().to_string(), "-1.0002");
    }

    #[test]
    fn test_equality_ignores_trailing_zeros() {
        let a = Money::of(Decimal::new(1005, 1), "USD").unwrap();
        let b = Money::of(Decimal::new(1_005_000, 4), "usd").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_currency_must_be_three_letters() {
        assert!(Money::parse("1", "US").is_err());
        assert!(Money::parse("1", "USDT").is_err());
        assert!(Money::parse("1", "U5D").is_err());
        assert!(Money::parse("1", " USD ").is_err());
        assert!(Money::of(Decimal::ONE, " usd ").is_err());
        assert!(Money::of(Decimal::ONE, "USD\n").is_err());
        assert_eq!(usd("1").currency().as_str(), "USD");
        assert_eq!(Money::parse("1", "eur").unwrap().currency().as_str(), "EUR");
    }

    #[test]
    fn test_arithmetic() {
        let a = usd("10.25");
        let b = usd("0.75");
        assert_eq!(a.add(&b).unwrap(), usd("11"));
        assert_eq!(a.subtract(&b).unwrap(), usd("9.5"));
        assert_eq!(b.subtract(&a).unwrap(), usd("-9.5"));
        assert_eq!(a.negate(), usd("-10.25"));
    }

    #[test]
    fn test_arithmetic_stays_at_scale_four() {
        let sum = usd("0.0001").add(&usd("0.0002")).unwrap();
        assert_eq!(sum.amount().to_string(), "0.0003");
        assert_eq!(sum.amount().scale(), 4);
    }

    #[test]
    fn test_currency_mismatch_is_rejected() {
        let eur = Money::parse("1", "EUR").unwrap();
        let err = usd("1").add(&eur).unwrap_err();
        assert!(matches!(err, MoneyError::CurrencyMismatch { .. }));
        assert!(usd("1").subtract(&eur).is_err());
        assert!(usd("1").is_less_than(&eur).is_err());
        assert!(usd("1").is_greater_than_or_equal(&eur).is_err());
    }

    #[test]
    fn test_sign_predicates() {
        assert!(usd("0.0001").is_positive());
        assert!(usd("-0.0001").is_negative());
        assert!(usd("0.00").is_zero());
        assert!(!usd("0").is_positive());
        assert!(!usd("0").is_negative());
    }

    #[test]
    fn test_comparisons() {
        assert!(usd("5").is_less_than(&usd("5.0001")).unwrap());
        assert!(!usd("5").is_less_than(&usd("5")).unwrap());
        assert!(usd("5").is_greater_than_or_equal(&usd("5.0000")).unwrap());
        assert_eq!(usd("7").compare(&usd("3")).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_wire_precision() {
        assert!(fits_wire_precision(&Decimal::from_str("999999999999999.9999").unwrap()));
        assert!(!fits_wire_precision(&Decimal::from_str("1000000000000000").unwrap()));
        assert!(fits_wire_precision(&Decimal::from_str("1.50000").unwrap()));
        assert!(!fits_wire_precision(&Decimal::from_str("1.00001").unwrap()));
    }

    #[test]
    fn test_display() {
        assert_eq!(usd("250").to_string(), "250.0000 USD");
    }
}
