use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use brains_db::repositories::{ServerRepository, SubscriptionRepository, UserRepository};
use brains_gateway::{GatewayLocks, ProtocolFactory, SshConnector};
use chrono::Utc;
use clap::{Parser, Subcommand};
use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod config;
mod messages;
mod services;
mod state;

use crate::config::BotConfig;
use crate::services::expiry_service::ExpirySweeper;
use crate::services::notifier::{Notifier, TelegramNotifier};
use crate::services::provisioning_service::ProvisioningService;
use crate::services::referral_service::ReferralService;
use crate::services::store::{PgStore, SubscriptionStore};
pub use crate::state::AppState;

#[derive(Parser)]
#[command(name = "brains-bot")]
#[command(about = "Brains Secure VPN subscription bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot and the expiry sweeper (default)
    Serve,
    /// Run one expiry sweep and exit
    Sweep,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        println!("Warning: failed to load .env file: {}", e);
    }
    let cli = Cli::parse();
    let (config, source) = BotConfig::load().context("Failed to load configuration")?;

    let log_dir = config
        .log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let log_name = config
        .log_file
        .file_name()
        .context("log_file must name a file")?;
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "brains_bot=debug,brains_gateway=debug,sqlx=warn,teloxide=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!("Brains bot {} starting, config from {}", env!("CARGO_PKG_VERSION"), source);

    let pool = brains_db::connect(&config.database_url).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            // connect() has already applied them
            info!("Database schema is up to date");
        }
        Commands::Sweep => {
            let bot = Bot::new(&config.bot_token);
            let sweeper = build_sweeper(&config, pool, bot)?;
            let report = sweeper.run_cycle(Utc::now()).await?;
            info!("Sweep finished: {:?}", report);
        }
        Commands::Serve => serve(config, pool).await?,
    }
    Ok(())
}

fn build_factory(config: &BotConfig) -> Result<ProtocolFactory> {
    let connector = SshConnector::new(config.ssh_settings());
    Ok(ProtocolFactory::new(Arc::new(connector), config.address_pool()?))
}

fn build_sweeper(config: &BotConfig, pool: brains_db::sqlx::PgPool, bot: Bot) -> Result<ExpirySweeper> {
    let store: Arc<dyn SubscriptionStore> = Arc::new(PgStore::new(pool));
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot));
    Ok(ExpirySweeper::new(
        store,
        build_factory(config)?,
        GatewayLocks::new(),
        notifier,
        config.payment_url.clone(),
    ))
}

async fn serve(config: BotConfig, pool: brains_db::sqlx::PgPool) -> Result<()> {
    let bot = Bot::new(&config.bot_token);
    let store: Arc<dyn SubscriptionStore> = Arc::new(PgStore::new(pool.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone()));
    let factory = build_factory(&config)?;
    // one lock table shared by the bot and the sweeper
    let locks = GatewayLocks::new();

    let sweeper = ExpirySweeper::new(
        store.clone(),
        factory.clone(),
        locks.clone(),
        notifier.clone(),
        config.payment_url.clone(),
    );
    let period = config.sweep_interval();

    let state = AppState {
        users: UserRepository::new(pool.clone()),
        subscriptions: SubscriptionRepository::new(pool.clone()),
        servers: ServerRepository::new(pool.clone()),
        referrals: ReferralService::new(pool),
        provisioning: ProvisioningService::new(store, factory, locks),
        notifier,
        bot_username: Arc::new(OnceLock::new()),
        config: Arc::new(config),
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let sweeper_rx = shutdown_tx.subscribe();
    let sweeper_task = tokio::spawn(async move {
        sweeper.run(period, sweeper_rx).await;
    });
    let bot_task = tokio::spawn(bot::run_bot(bot, shutdown_tx.subscribe(), state));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());

    for (name, task) in [("sweeper", sweeper_task), ("bot", bot_task)] {
        if let Err(e) = task.await {
            error!("{} task failed: {}", name, e);
        }
    }
    info!("Stopped");
    Ok(())
}
