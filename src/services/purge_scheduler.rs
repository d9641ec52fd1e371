use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use super::idempotency::IdempotencyCoordinator;

/// Periodically drops expired idempotency records on a cron schedule.
pub struct PurgeScheduler {
    coordinator: IdempotencyCoordinator,
    schedule: Schedule,
}

impl PurgeScheduler {
    /// `expression` uses the six-field form with seconds, e.g. `0 0 * * * *`.
    pub fn new(coordinator: IdempotencyCoordinator, expression: &str) -> Result<Self, cron::error::Error> {
        Ok(Self {
            coordinator,
            schedule: Schedule::from_str(expression)?,
        })
    }

    /// Time until the next scheduled run, if the schedule has one.
    pub fn next_delay(&self) -> Option<Duration> {
        let next = self.schedule.upcoming(Utc).next()?;
        (next - Utc::now()).to_std().ok().or(Some(Duration::ZERO))
    }

    /// Start the purge loop as a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Some(delay) = self.next_delay() else {
                    warn!("Idempotency purge schedule has no upcoming runs; stopping");
                    return;
                };
                tokio::time::sleep(delay).await;

                match self.coordinator.purge_expired().await {
                    Ok(purged) => info!(purged, "Idempotency purge completed"),
                    Err(e) => error!("Idempotency purge failed: {}", e),
                }
            }
        })
    }
}
