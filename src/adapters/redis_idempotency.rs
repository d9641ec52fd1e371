//! Redis implementation of [`IdempotencyStore`].
//!
//! Each key holds the JSON-encoded record with a native TTL, so expired
//! claims disappear on their own and `delete_expired` has nothing to do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use uuid::Uuid;

use crate::ports::{IdempotencyRecord, IdempotencyStore, RepositoryError, RepositoryResult};

const KEY_PREFIX: &str = "idempotency:";

// Deletes the record only while cached_status is still null.
const RELEASE_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return 0
end
local record = cjson.decode(value)
if record.cached_status == nil or record.cached_status == cjson.null then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisIdempotencyStore {
    client: redis::Client,
}

fn redis_error(err: redis::RedisError) -> RepositoryError {
    RepositoryError::Database(format!("redis: {}", err))
}

fn json_error(err: serde_json::Error) -> RepositoryError {
    RepositoryError::Serialization(err.to_string())
}

impl RedisIdempotencyStore {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn connection(&self) -> RepositoryResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)
    }

    fn redis_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    pub async fn ping(&self) -> RepositoryResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn try_insert(
        &self,
        key: &str,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let record = IdempotencyRecord::claimed(key, owner_id, expires_at);
        let value = serde_json::to_string(&record).map_err(json_error)?;
        let ttl_ms = (expires_at - Utc::now()).num_milliseconds().max(1);

        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(reply.is_some())
    }

    async fn find(&self, key: &str) -> RepositoryResult<Option<IdempotencyRecord>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(Self::redis_key(key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        value
            .map(|v| serde_json::from_str(&v).map_err(json_error))
            .transpose()
    }

    async fn update_response(&self, key: &str, status: u16, body: &str) -> RepositoryResult<()> {
        let mut record = self
            .find(key)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("idempotency key {}", key)))?;
        record.cached_status = Some(status);
        record.cached_response_body = Some(body.to_string());
        let value = serde_json::to_string(&record).map_err(json_error)?;

        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(key))
            .arg(value)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        match reply {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(format!("idempotency key {}", key))),
        }
    }

    async fn delete_unresolved(&self, key: &str) -> RepositoryResult<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(Self::redis_key(key))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(deleted > 0)
    }

    async fn delete_expired(&self, _now: DateTime<Utc>) -> RepositoryResult<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(RedisIdempotencyStore::redis_key("abc"), "idempotency:abc");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisIdempotencyStore::new("not a url").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis at REDIS_URL
    async fn test_claim_resolve_release_against_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisIdempotencyStore::new(&url).unwrap();
        let key = format!("test-{}", Uuid::new_v4());
        let expires = Utc::now() + chrono::Duration::minutes(1);

        assert!(store.try_insert(&key, Uuid::new_v4(), expires).await.unwrap());
        assert!(!store.try_insert(&key, Uuid::new_v4(), expires).await.unwrap());

        store.update_response(&key, 201, "{}").await.unwrap();
        assert!(!store.delete_unresolved(&key).await.unwrap());
        assert!(store.find(&key).await.unwrap().unwrap().is_resolved());
    }
}
