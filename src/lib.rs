pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod use_cases;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::adapters::{InMemoryStore, PostgresStore, RedisIdempotencyStore};
use crate::health::HealthChecks;
use crate::ports::IdempotencyStore;
use crate::services::{AuditTrail, IdempotencyCoordinator};
use crate::use_cases::{AccountQueries, TransferOrchestrator, TransferSettings};

#[derive(Clone)]
pub struct AppState {
    pub transfers: Arc<TransferOrchestrator>,
    pub queries: Arc<AccountQueries>,
    pub health: HealthChecks,
}

impl AppState {
    /// Wires every port to one in-process store.
    pub fn in_memory(store: &InMemoryStore, settings: TransferSettings) -> Self {
        let shared = Arc::new(store.clone());
        let idempotency = IdempotencyCoordinator::new(
            shared.clone(),
            settings.idempotency_ttl,
            settings.replay_wait,
        );
        Self {
            transfers: Arc::new(TransferOrchestrator::new(
                shared.clone(),
                shared.clone(),
                idempotency,
                AuditTrail::new(shared.clone()),
            )),
            queries: Arc::new(AccountQueries::new(shared.clone(), shared.clone(), shared)),
            health: HealthChecks::new(),
        }
    }

    /// Postgres for the ledger; idempotency records go to Redis when given.
    pub fn postgres(
        store: PostgresStore,
        redis: Option<RedisIdempotencyStore>,
        settings: TransferSettings,
    ) -> Self {
        let shared = Arc::new(store);
        let mut health = HealthChecks::new().with("postgres", true, shared.clone());

        let idempotency_store: Arc<dyn IdempotencyStore> = match redis {
            Some(redis) => {
                let redis = Arc::new(redis);
                health = health.with("redis", false, redis.clone());
                redis as Arc<dyn IdempotencyStore>
            }
            None => shared.clone() as Arc<dyn IdempotencyStore>,
        };

        Self {
            transfers: Arc::new(TransferOrchestrator::new(
                shared.clone(),
                shared.clone(),
                IdempotencyCoordinator::new(
                    idempotency_store,
                    settings.idempotency_ttl,
                    settings.replay_wait,
                ),
                AuditTrail::new(shared.clone()),
            )),
            queries: Arc::new(AccountQueries::new(shared.clone(), shared.clone(), shared)),
            health,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/transfers", post(handlers::transfers::create_transfer))
        .route("/api/v1/accounts", get(handlers::accounts::list_accounts))
        .route("/api/v1/accounts/:id", get(handlers::accounts::get_account))
        .route(
            "/api/v1/accounts/:id/transactions",
            get(handlers::accounts::account_transactions),
        )
        .route(
            "/api/v1/transactions/:id/ledger",
            get(handlers::accounts::transaction_ledger),
        )
        .layer(axum::middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .with_state(state)
}
