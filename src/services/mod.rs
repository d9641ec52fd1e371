pub mod audit;
pub mod idempotency;
pub mod purge_scheduler;

pub use audit::AuditTrail;
pub use idempotency::{CachedResponse, IdempotencyCoordinator, IdempotencyKey, IdempotencyState};
pub use purge_scheduler::PurgeScheduler;
