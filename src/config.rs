use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::use_cases::TransferSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub lock_timeout_ms: u64,
    pub idempotency_ttl_secs: u64,
    pub idempotency_replay_wait_ms: u64,
    pub idempotency_purge_schedule: String,
    pub log_format: LogFormat,
}

pub const DEFAULT_PURGE_SCHEDULE: &str = "0 0 * * * *";

fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}", name)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: var_or("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            lock_timeout_ms: var_or("LOCK_TIMEOUT_MS", 5000)?,
            idempotency_ttl_secs: var_or("IDEMPOTENCY_TTL_SECS", 86_400)?,
            idempotency_replay_wait_ms: var_or("IDEMPOTENCY_REPLAY_WAIT_MS", 5000)?,
            idempotency_purge_schedule: env::var("IDEMPOTENCY_PURGE_SCHEDULE")
                .unwrap_or_else(|_| DEFAULT_PURGE_SCHEDULE.to_string()),
            log_format: match env::var("LOG_FORMAT") {
                Ok(raw) => raw.parse()?,
                Err(_) => LogFormat::Text,
            },
        })
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_secs),
            replay_wait: Duration::from_millis(self.idempotency_replay_wait_ms),
        }
    }
}
