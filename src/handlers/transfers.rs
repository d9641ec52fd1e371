use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::error::AppError;
use crate::middleware::Actor;
use crate::services::IdempotencyKey;
use crate::use_cases::TransferCommand;
use crate::validation::{validate_idempotency_key, validate_transfer, TransferRequest, ValidationError};
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "idempotency-replayed";

fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, AppError> {
    let Some(raw) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| ValidationError::new("Idempotency-Key", "must be visible ASCII"))?;
    validate_idempotency_key(raw)?;
    IdempotencyKey::parse(raw)
        .map(Some)
        .map_err(|e| ValidationError::new("Idempotency-Key", e.to_string()).into())
}

/// `POST /api/v1/transfers`
pub async fn create_transfer(
    State(state): State<AppState>,
    Actor(actor_id): Actor,
    headers: HeaderMap,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let idempotency_key = idempotency_key(&headers)?;
    let valid = validate_transfer(request)?;

    let result = state
        .transfers
        .execute(TransferCommand {
            source_account_id: valid.source_account_id,
            target_account_id: valid.target_account_id,
            amount: valid.amount,
            currency: valid.currency,
            description: valid.description,
            idempotency_key,
            actor_id,
        })
        .await?;

    if result.replayed {
        let mut response = (StatusCode::OK, Json(result)).into_response();
        response
            .headers_mut()
            .insert(IDEMPOTENCY_REPLAYED_HEADER, HeaderValue::from_static("true"));
        return Ok(response);
    }

    Ok((StatusCode::CREATED, Json(result)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_key_is_none() {
        assert!(idempotency_key(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_oversized_key_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            IDEMPOTENCY_KEY_HEADER,
            HeaderValue::from_str(&"k".repeat(256)).unwrap(),
        );
        assert!(matches!(
            idempotency_key(&headers),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_valid_key_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("order-17"));
        let key = idempotency_key(&headers).unwrap().unwrap();
        assert_eq!(key.as_str(), "order-17");
    }
}
