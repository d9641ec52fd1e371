use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::use_cases::{QueryError, TransferError};
use crate::validation::ValidationError;

const ACCESS_DENIED: &str = "You do not have access to this account";
const GENERIC_FAILURE: &str = "An unexpected error occurred";

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Transfer(err) => match err {
                TransferError::InsufficientFunds { .. } | TransferError::AccountNotActive { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                TransferError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                TransferError::AccountOwnership { .. } => StatusCode::FORBIDDEN,
                TransferError::RequestInProgress(_) => StatusCode::CONFLICT,
                TransferError::IllegalArgument(_) => StatusCode::BAD_REQUEST,
                TransferError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
                TransferError::Infrastructure(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
                TransferError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Query(QueryError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Query(QueryError::Forbidden) => StatusCode::FORBIDDEN,
            AppError::Query(QueryError::Repository(_)) | AppError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable, machine-readable error kind.
    fn kind(&self) -> &'static str {
        match self {
            AppError::Transfer(err) => match err {
                TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
                TransferError::AccountNotActive { .. } => "ACCOUNT_NOT_ACTIVE",
                TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
                TransferError::AccountOwnership { .. } => "ACCESS_DENIED",
                TransferError::RequestInProgress(_) => "REQUEST_IN_PROGRESS",
                TransferError::IllegalArgument(_) => "ILLEGAL_ARGUMENT",
                TransferError::LockTimeout => "LOCK_TIMEOUT",
                TransferError::Infrastructure(RepositoryError::Conflict(_)) => "CONFLICT",
                TransferError::Infrastructure(_) => "INTERNAL_ERROR",
            },
            AppError::Query(QueryError::NotFound { .. }) => "NOT_FOUND",
            AppError::Query(QueryError::Forbidden) => "ACCESS_DENIED",
            AppError::Query(QueryError::Repository(_)) | AppError::Database(_) => "INTERNAL_ERROR",
            AppError::Validation(_) | AppError::BadRequest(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }

    fn detail(&self) -> String {
        match self {
            AppError::Transfer(TransferError::AccountOwnership { .. })
            | AppError::Query(QueryError::Forbidden) => ACCESS_DENIED.to_string(),
            AppError::Transfer(TransferError::Infrastructure(RepositoryError::Conflict(_))) => {
                "The request conflicted with a concurrent update; retry it".to_string()
            }
            AppError::Transfer(TransferError::Infrastructure(_))
            | AppError::Query(QueryError::Repository(_))
            | AppError::Database(_) => GENERIC_FAILURE.to_string(),
            other => other.to_string(),
        }
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        match self {
            AppError::Transfer(TransferError::InsufficientFunds {
                account_id,
                current_balance,
                requested_amount,
            }) => {
                context.insert("accountId".into(), json!(account_id));
                context.insert("currentBalance".into(), json!(current_balance.amount().to_string()));
                context.insert("requestedAmount".into(), json!(requested_amount.amount().to_string()));
            }
            AppError::Transfer(TransferError::AccountNotActive { account_id, status }) => {
                context.insert("accountId".into(), json!(account_id));
                context.insert("accountStatus".into(), json!(status.as_str()));
            }
            AppError::Transfer(TransferError::AccountNotFound(account_id)) => {
                context.insert("accountId".into(), json!(account_id));
            }
            AppError::Validation(err) => {
                context.insert("field".into(), json!(err.field));
            }
            _ => {}
        }
        context
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let mut body = Map::new();
        body.insert("type".into(), json!(self.kind()));
        body.insert("title".into(), json!(status.canonical_reason().unwrap_or("Error")));
        body.insert("status".into(), json!(status.as_u16()));
        body.insert("detail".into(), json!(self.detail()));
        body.extend(self.context());
        body.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));

        let mut response = (status, Json(Value::Object(body))).into_response();
        if matches!(self, AppError::Transfer(TransferError::LockTimeout)) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountStatus, Money};
    use uuid::Uuid;

    fn transfer(err: TransferError) -> AppError {
        AppError::Transfer(err)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation(ValidationError::new("amount", "must be greater than zero"));
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_business_rule_status_codes() {
        let funds = transfer(TransferError::InsufficientFunds {
            account_id: Uuid::nil(),
            current_balance: Money::parse("1", "USD").unwrap(),
            requested_amount: Money::parse("2", "USD").unwrap(),
        });
        assert_eq!(funds.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let inactive = transfer(TransferError::AccountNotActive {
            account_id: Uuid::nil(),
            status: AccountStatus::Closed,
        });
        assert_eq!(inactive.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(
            transfer(TransferError::AccountNotFound(Uuid::nil())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            transfer(TransferError::RequestInProgress("k".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            transfer(TransferError::IllegalArgument("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_unauthorized_error_status_code() {
        let error = AppError::Unauthorized("missing X-User-Id".to_string());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ownership_message_is_uniform() {
        let response = transfer(TransferError::AccountOwnership {
            account_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["detail"], ACCESS_DENIED);
        assert!(body.get("accountId").is_none());

        let query = AppError::Query(QueryError::Forbidden).into_response();
        assert_eq!(body_json(query).await["detail"], ACCESS_DENIED);
    }

    #[tokio::test]
    async fn test_lock_timeout_sets_retry_after() {
        let response = transfer(TransferError::LockTimeout).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn test_insufficient_funds_body_carries_context() {
        let account_id = Uuid::new_v4();
        let response = transfer(TransferError::InsufficientFunds {
            account_id,
            current_balance: Money::parse("10", "USD").unwrap(),
            requested_amount: Money::parse("10.0001", "USD").unwrap(),
        })
        .into_response();

        let body = body_json(response).await;
        assert_eq!(body["type"], "INSUFFICIENT_FUNDS");
        assert_eq!(body["status"], 422);
        assert_eq!(body["accountId"], account_id.to_string());
        assert_eq!(body["currentBalance"], "10.0000");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_infrastructure_detail_is_generic() {
        let response = transfer(TransferError::Infrastructure(RepositoryError::Database(
            "connection refused on 10.0.0.5".into(),
        )))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["detail"], GENERIC_FAILURE);
    }
}
