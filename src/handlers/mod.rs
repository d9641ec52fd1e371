pub mod accounts;
pub mod transfers;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::HealthChecks;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = state.health.run().await;

    // 503 only when a critical dependency is down; degraded still serves.
    let status_code = if HealthChecks::is_healthy(&response) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
