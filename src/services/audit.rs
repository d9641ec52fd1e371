//! Log-and-continue front for the [`AuditSink`] port.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::ports::{AuditEntity, AuditEvent, AuditSink};

pub const ACTION_DEBIT: &str = "DEBIT";
pub const ACTION_CREDIT: &str = "CREDIT";
pub const ACTION_TRANSFER_FAILED: &str = "TRANSFER_FAILED";

/// Audit writes never fail the caller; a failed write is logged at `error`.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn account_change(
        &self,
        account_id: Uuid,
        actor_id: Uuid,
        action: &str,
        balance_before: Decimal,
        balance_after: Decimal,
    ) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            entity_type: AuditEntity::Account,
            entity_id: account_id,
            actor_id,
            action: action.to_string(),
            before_snapshot: Some(json!({ "balance": balance_before.to_string() })),
            after_snapshot: Some(json!({ "balance": balance_after.to_string() })),
            balance_before: Some(balance_before),
            balance_after: Some(balance_after),
            occurred_at: Utc::now(),
        };
        self.write(event).await;
    }

    pub async fn transaction_event(
        &self,
        transaction_id: Uuid,
        actor_id: Uuid,
        action: &str,
        before_snapshot: Option<serde_json::Value>,
        after_snapshot: Option<serde_json::Value>,
    ) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            entity_type: AuditEntity::Transaction,
            entity_id: transaction_id,
            actor_id,
            action: action.to_string(),
            before_snapshot,
            after_snapshot,
            balance_before: None,
            balance_after: None,
            occurred_at: Utc::now(),
        };
        self.write(event).await;
    }

    async fn write(&self, event: AuditEvent) {
        if let Err(e) = self.sink.record(&event).await {
            tracing::error!(
                entity_type = event.entity_type.as_str(),
                entity_id = %event.entity_id,
                action = %event.action,
                error = %e,
                "Failed to write audit event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_account_change_records_balances() {
        let store = InMemoryStore::new(Duration::from_secs(1));
        let trail = AuditTrail::new(Arc::new(store.clone()));
        let account_id = Uuid::new_v4();

        trail
            .account_change(account_id, Uuid::new_v4(), ACTION_DEBIT, Decimal::new(100, 0), Decimal::new(75, 0))
            .await;

        let events = store.audit_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_type, AuditEntity::Account);
        assert_eq!(events[0].entity_id, account_id);
        assert_eq!(events[0].balance_after, Some(Decimal::new(75, 0)));
        assert_eq!(events[0].after_snapshot, Some(json!({ "balance": "75" })));
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let store = InMemoryStore::new(Duration::from_secs(1));
        store.fail_audit_writes(true);
        let trail = AuditTrail::new(Arc::new(store.clone()));

        trail
            .transaction_event(Uuid::new_v4(), Uuid::new_v4(), ACTION_TRANSFER_FAILED, None, None)
            .await;

        assert!(store.audit_events().is_empty());
    }
}
