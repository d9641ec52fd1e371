use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::adapters::RedisIdempotencyStore;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    /// `None` when no Redis is configured.
    pub redis: Option<bool>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.redis.unwrap_or(true)
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        match self.redis {
            Some(ok) => println!("Redis Connectivity:    {}", status(ok)),
            None => println!("Redis Connectivity:    - (not configured)"),
        }

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        redis: None,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Some(redis_url) = &config.redis_url {
        match validate_redis(redis_url).await {
            Ok(()) => report.redis = Some(true),
            Err(e) => {
                report.redis = Some(false);
                report.errors.push(format!("Redis: {}", e));
            }
        }
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.database_max_connections == 0 {
        anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
    }
    if config.lock_timeout_ms == 0 {
        anyhow::bail!("LOCK_TIMEOUT_MS must be greater than 0");
    }
    if config.idempotency_ttl_secs == 0 {
        anyhow::bail!("IDEMPOTENCY_TTL_SECS must be greater than 0");
    }

    url::Url::parse(&config.database_url).context("DATABASE_URL is not a valid URL")?;
    if let Some(redis_url) = &config.redis_url {
        url::Url::parse(redis_url).context("REDIS_URL is not a valid URL")?;
    }
    config
        .idempotency_purge_schedule
        .parse::<cron::Schedule>()
        .context("IDEMPOTENCY_PURGE_SCHEDULE is not a valid cron expression")?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_redis(redis_url: &str) -> Result<()> {
    let store = RedisIdempotencyStore::new(redis_url).context("Invalid Redis URL")?;
    store.ping().await.context("Redis PING failed")?;
    Ok(())
}
