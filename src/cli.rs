use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::{PostgresStore, RedisIdempotencyStore};
use crate::config::Config;
use crate::ports::IdempotencyStore;
use crate::services::IdempotencyCoordinator;
use crate::use_cases::{OpenAccount, OpenAccountInput};
use crate::validation::{validate_account_number, validate_currency, DEFAULT_CURRENCY};

#[derive(Parser)]
#[command(name = "ledger-core")]
#[command(about = "Ledger Core - double-entry money transfer service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Idempotency record maintenance
    #[command(subcommand)]
    Idempotency(IdempotencyCommands),

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Print and validate the configuration
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum IdempotencyCommands {
    /// Delete expired idempotency records now
    Purge,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new ACTIVE account
    Open {
        /// Owner UUID
        #[arg(long)]
        owner: Uuid,

        /// Unique account number
        #[arg(long)]
        number: String,

        /// Opening balance
        #[arg(long, default_value = "0")]
        balance: Decimal,

        /// ISO 4217 currency code
        #[arg(long, default_value = DEFAULT_CURRENCY)]
        currency: String,
    },
}

async fn postgres_store(config: &Config) -> anyhow::Result<PostgresStore> {
    let pool = crate::db::create_pool(config).await?;
    Ok(PostgresStore::new(pool, config.transfer_settings().lock_timeout))
}

async fn idempotency_coordinator(config: &Config) -> anyhow::Result<IdempotencyCoordinator> {
    let store: Arc<dyn IdempotencyStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisIdempotencyStore::new(url)?),
        None => Arc::new(postgres_store(config).await?),
    };
    let settings = config.transfer_settings();
    Ok(IdempotencyCoordinator::new(
        store,
        settings.idempotency_ttl,
        settings.replay_wait,
    ))
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_idempotency_purge(config: &Config) -> anyhow::Result<()> {
    let coordinator = idempotency_coordinator(config).await?;
    let purged = coordinator.purge_expired().await?;

    tracing::info!(purged, "Expired idempotency records purged");
    println!("✓ Purged {} expired idempotency record(s)", purged);
    Ok(())
}

pub async fn handle_account_open(
    config: &Config,
    owner: Uuid,
    number: String,
    balance: Decimal,
    currency: String,
) -> anyhow::Result<()> {
    validate_account_number(&number)?;
    validate_currency(&currency)?;

    let store = postgres_store(config).await?;
    let account = OpenAccount::new(Arc::new(store))
        .execute(OpenAccountInput {
            owner_id: owner,
            account_number: number,
            opening_balance: balance,
            currency,
        })
        .await?;

    tracing::info!(account_id = %account.id, "Account opened");
    println!(
        "✓ Account {} opened ({}, balance {})",
        account.id,
        account.account_number,
        account.balance()
    );
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Database Max Connections: {}", config.database_max_connections);
    match &config.redis_url {
        Some(url) => println!("  Redis URL: {}", mask_password(url)),
        None => println!("  Redis URL: (unset, idempotency records in Postgres)"),
    }
    println!("  Lock Timeout: {}ms", config.lock_timeout_ms);
    println!("  Idempotency TTL: {}s", config.idempotency_ttl_secs);
    println!("  Idempotency Replay Wait: {}ms", config.idempotency_replay_wait_ms);
    println!("  Idempotency Purge Schedule: {}", config.idempotency_purge_schedule);
    println!("  Log Format: {:?}", config.log_format);

    config
        .idempotency_purge_schedule
        .parse::<cron::Schedule>()
        .map_err(|e| anyhow::anyhow!("invalid IDEMPOTENCY_PURGE_SCHEDULE: {}", e))?;

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}
