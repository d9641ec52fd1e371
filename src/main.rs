use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ledger_core::adapters::{PostgresStore, RedisIdempotencyStore};
use ledger_core::cli::{AccountCommands, Cli, Commands, DbCommands, IdempotencyCommands};
use ledger_core::config::{Config, LogFormat};
use ledger_core::services::PurgeScheduler;
use ledger_core::{cli, create_app, db, startup, AppState};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let args = Cli::parse();
    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Idempotency(IdempotencyCommands::Purge) => {
            cli::handle_idempotency_purge(&config).await
        }
        Commands::Account(AccountCommands::Open {
            owner,
            number,
            balance,
            currency,
        }) => cli::handle_account_open(&config, owner, number, balance, currency).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("startup validation failed");
    }

    let settings = config.transfer_settings();
    let redis = config
        .redis_url
        .as_deref()
        .map(RedisIdempotencyStore::new)
        .transpose()?;
    if redis.is_some() {
        tracing::info!("Idempotency records stored in Redis");
    }

    let state = AppState::postgres(PostgresStore::new(pool, settings.lock_timeout), redis, settings);

    let scheduler = PurgeScheduler::new(
        state.transfers.idempotency().clone(),
        &config.idempotency_purge_schedule,
    )?;
    let _purge_task = scheduler.start();
    tracing::info!(
        schedule = %config.idempotency_purge_schedule,
        "Idempotency purge scheduler started"
    );

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
