mod bot;
mod commands;
mod config;
mod format;
mod forms;
mod platform;
mod poll;
mod scheduler;
mod store;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::commands::Commands;
use crate::config::Config;
use crate::forms::google::GoogleClient;
use crate::platform::telegram::TelegramSink;
use crate::poll::{PollSettings, Poller};
use crate::scheduler::Scheduler;
use crate::store::SubscriptionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,formbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Responses created before this instant are never delivered.
    let baseline = chrono::Utc::now();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Poll interval: {:?}", config.poll.interval());
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);

    let store = SubscriptionStore::open(&config.storage.database_path)?;
    let google = Arc::new(GoogleClient::new(&config.google)?);
    let bot = Bot::new(&config.telegram.bot_token);

    let poller = Arc::new(Poller::new(
        store.clone(),
        google.clone(),
        google.clone(),
        Arc::new(TelegramSink::new(bot.clone())),
        PollSettings {
            call_timeout: config.google.request_timeout(),
            drive_view_base_url: config.google.drive_view_base_url.clone(),
        },
        baseline,
    ));
    info!("Delivering responses created after {}", poller.baseline());

    let mut scheduler = Scheduler::new().await?;
    scheduler::tasks::register_builtin_tasks(&scheduler, Arc::clone(&poller), &config.poll).await?;
    scheduler.start().await?;

    let commands = Commands::new(
        store,
        google,
        config.storage.legacy_sent_ids_path.clone(),
        config.google.request_timeout(),
    );
    let state = Arc::new(AppState::new(config, commands));

    // Run the Telegram bot until Ctrl-C
    info!("Bot is starting...");
    bot::run(state, bot).await?;

    scheduler.shutdown().await?;
    Ok(())
}
