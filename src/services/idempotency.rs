//! Idempotency-key claiming and response caching.
//!
//! A key moves `ABSENT -> CLAIMED -> RESOLVED`. Only the caller whose
//! `try_claim` succeeds runs the protected operation; duplicates park in
//! [`IdempotencyCoordinator::await_resolution`] until the claimant resolves
//! or releases the key.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ports::{IdempotencyStore, RepositoryResult};

pub const MAX_KEY_LENGTH: usize = 255;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Idempotency-Key must be between 1 and {MAX_KEY_LENGTH} characters")]
pub struct InvalidIdempotencyKey;

/// Client-supplied idempotency token, 1 to 255 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: &str) -> Result<Self, InvalidIdempotencyKey> {
        let length = raw.chars().count();
        if length == 0 || length > MAX_KEY_LENGTH {
            return Err(InvalidIdempotencyKey);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub owner_id: Uuid,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyState {
    Absent,
    Claimed,
    Resolved(CachedResponse),
}

#[derive(Clone)]
pub struct IdempotencyCoordinator {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    replay_wait: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration, replay_wait: Duration) -> Self {
        Self {
            store,
            ttl,
            replay_wait,
        }
    }

    pub fn replay_wait(&self) -> Duration {
        self.replay_wait
    }

    /// Single atomic insert-if-absent. `true` means this caller owns the key.
    pub async fn try_claim(&self, key: &IdempotencyKey, owner_id: Uuid) -> RepositoryResult<bool> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let claimed = self
            .store
            .try_insert(key.as_str(), owner_id, Utc::now() + ttl)
            .await?;
        tracing::debug!(idempotency_key = %key, claimed, "Idempotency claim attempted");
        Ok(claimed)
    }

    /// Cached response, only once the key is RESOLVED.
    pub async fn lookup(&self, key: &IdempotencyKey) -> RepositoryResult<Option<CachedResponse>> {
        match self.state(key).await? {
            IdempotencyState::Resolved(cached) => Ok(Some(cached)),
            _ => Ok(None),
        }
    }

    pub async fn state(&self, key: &IdempotencyKey) -> RepositoryResult<IdempotencyState> {
        let state = match self.store.find(key.as_str()).await? {
            None => IdempotencyState::Absent,
            Some(record) => match (record.cached_status, record.cached_response_body) {
                (Some(status), Some(body)) => IdempotencyState::Resolved(CachedResponse {
                    owner_id: record.owner_id,
                    status,
                    body,
                }),
                _ => IdempotencyState::Claimed,
            },
        };
        Ok(state)
    }

    /// Actor that claimed `key`, if any record exists.
    pub async fn owner(&self, key: &IdempotencyKey) -> RepositoryResult<Option<Uuid>> {
        Ok(self.store.find(key.as_str()).await?.map(|record| record.owner_id))
    }

    pub async fn resolve(&self, key: &IdempotencyKey, status: u16, body: &str) -> RepositoryResult<()> {
        self.store.update_response(key.as_str(), status, body).await?;
        tracing::debug!(idempotency_key = %key, status, "Idempotency key resolved");
        Ok(())
    }

    /// Drops an unresolved claim so the client can retry with the same key.
    pub async fn release(&self, key: &IdempotencyKey) -> RepositoryResult<bool> {
        let released = self.store.delete_unresolved(key.as_str()).await?;
        if released {
            tracing::debug!(idempotency_key = %key, "Idempotency claim released");
        }
        Ok(released)
    }

    pub async fn purge_expired(&self) -> RepositoryResult<u64> {
        let purged = self.store.delete_expired(Utc::now()).await?;
        tracing::info!(purged, "Purged expired idempotency keys");
        Ok(purged)
    }

    /// Polls a CLAIMED key with exponential backoff until it is resolved,
    /// released, or `deadline` passes. Returns the last observed state.
    pub async fn await_resolution(
        &self,
        key: &IdempotencyKey,
        deadline: Instant,
    ) -> RepositoryResult<IdempotencyState> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let state = self.state(key).await?;
            if state != IdempotencyState::Claimed {
                return Ok(state);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(state);
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}
