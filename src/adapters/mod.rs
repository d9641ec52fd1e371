pub mod memory;
pub mod postgres;
pub mod redis_idempotency;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use redis_idempotency::RedisIdempotencyStore;
