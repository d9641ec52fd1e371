use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::adapters::{PostgresStore, RedisIdempotencyStore};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

#[async_trait]
impl DependencyChecker for PostgresStore {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

#[async_trait]
impl DependencyChecker for RedisIdempotencyStore {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

#[derive(Clone)]
struct Dependency {
    name: &'static str,
    critical: bool,
    checker: Arc<dyn DependencyChecker>,
}

/// Set of dependencies probed by `GET /health`.
#[derive(Clone)]
pub struct HealthChecks {
    dependencies: Vec<Dependency>,
    start_time: Instant,
}

impl Default for HealthChecks {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecks {
    pub fn new() -> Self {
        Self {
            dependencies: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// A failing critical dependency makes the service `unhealthy`;
    /// any other failure only `degraded`.
    pub fn with(mut self, name: &'static str, critical: bool, checker: Arc<dyn DependencyChecker>) -> Self {
        self.dependencies.push(Dependency {
            name,
            critical,
            checker,
        });
        self
    }

    pub async fn run(&self) -> HealthResponse {
        let results = join_all(self.dependencies.iter().map(|dep| async move {
            let status = timeout(CHECK_TIMEOUT, dep.checker.check())
                .await
                .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
            (dep, status)
        }))
        .await;

        let mut has_critical_failure = false;
        let mut has_non_critical_failure = false;
        let mut dependencies = HashMap::new();
        for (dep, status) in results {
            if matches!(status, DependencyStatus::Unhealthy { .. }) {
                if dep.critical {
                    has_critical_failure = true;
                } else {
                    has_non_critical_failure = true;
                }
            }
            dependencies.insert(dep.name.to_string(), status);
        }

        let status = if has_critical_failure {
            "unhealthy"
        } else if has_non_critical_failure {
            "degraded"
        } else {
            "healthy"
        };

        HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            dependencies,
        }
    }

    pub fn is_healthy(response: &HealthResponse) -> bool {
        response.status != "unhealthy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    #[async_trait]
    impl DependencyChecker for Fixed {
        async fn check(&self) -> DependencyStatus {
            if self.0 {
                DependencyStatus::healthy(Instant::now())
            } else {
                DependencyStatus::unhealthy("down")
            }
        }
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let checks = HealthChecks::new().with("postgres", true, Arc::new(Fixed(true)));
        let response = checks.run().await;
        assert_eq!(response.status, "healthy");
        assert!(HealthChecks::is_healthy(&response));
    }

    #[tokio::test]
    async fn test_non_critical_failure_degrades() {
        let checks = HealthChecks::new()
            .with("postgres", true, Arc::new(Fixed(true)))
            .with("redis", false, Arc::new(Fixed(false)));
        let response = checks.run().await;
        assert_eq!(response.status, "degraded");
        assert!(HealthChecks::is_healthy(&response));
    }

    #[tokio::test]
    async fn test_critical_failure_is_unhealthy() {
        let checks = HealthChecks::new().with("postgres", true, Arc::new(Fixed(false)));
        let response = checks.run().await;
        assert_eq!(response.status, "unhealthy");
        assert!(!HealthChecks::is_healthy(&response));
        assert!(matches!(
            response.dependencies["postgres"],
            DependencyStatus::Unhealthy { .. }
        ));
    }

    #[tokio::test]
    async fn test_no_dependencies_is_healthy() {
        assert_eq!(HealthChecks::new().run().await.status, "healthy");
    }
}
