use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use uuid::Uuid;

use crate::domain::money::{fits_wire_precision, MAX_INTEGER_DIGITS, SCALE};
use crate::services::idempotency::MAX_KEY_LENGTH;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DESCRIPTION_MAX_LEN: usize = 500;
pub const ACCOUNT_NUMBER_MAX_LEN: usize = 34;

/// Body of `POST /api/v1/transfers`. Unknown fields are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransferRequest {
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A transfer request that passed boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidTransfer {
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_currency(currency: &str) -> ValidationResult {
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be a 3-letter uppercase ISO 4217 code",
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &Decimal) -> ValidationResult {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    if !fits_wire_precision(amount) {
        return Err(ValidationError::new(
            "amount",
            format!(
                "must have at most {} integer and {} fractional digits",
                MAX_INTEGER_DIGITS, SCALE
            ),
        ));
    }

    Ok(())
}

pub fn validate_idempotency_key(key: &str) -> ValidationResult {
    let length = key.chars().count();
    if length == 0 || length > MAX_KEY_LENGTH {
        return Err(ValidationError::new(
            "Idempotency-Key",
            format!("must be between 1 and {} characters", MAX_KEY_LENGTH),
        ));
    }

    Ok(())
}

pub fn validate_account_number(account_number: &str) -> ValidationResult {
    validate_required("account_number", account_number)?;
    validate_max_len("account_number", account_number, ACCOUNT_NUMBER_MAX_LEN)?;

    if !account_number
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    {
        return Err(ValidationError::new(
            "account_number",
            "must contain only letters, digits and '-'",
        ));
    }

    Ok(())
}

pub fn validate_transfer(request: TransferRequest) -> Result<ValidTransfer, ValidationError> {
    if request.source_account_id == request.target_account_id {
        return Err(ValidationError::new(
            "targetAccountId",
            "must differ from sourceAccountId",
        ));
    }

    validate_positive_amount(&request.amount)?;

    let currency = request
        .currency
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    validate_currency(&currency)?;

    let description = match request.description {
        Some(raw) => {
            validate_max_len("description", &raw, DESCRIPTION_MAX_LEN)?;
            let cleaned = sanitize_string(&raw);
            (!cleaned.is_empty()).then_some(cleaned)
        }
        None => None,
    };

    Ok(ValidTransfer {
        source_account_id: request.source_account_id,
        target_account_id: request.target_account_id,
        amount: request.amount,
        currency,
        description,
    })
}
