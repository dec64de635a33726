use std::path::Path;
use std::sync::Arc;

use leadbot::config::BotConfig;
use leadbot::dispatch::Dispatcher;
use leadbot::messenger::{Messenger, TelegramMessenger};
use leadbot::store::{LibSqlStore, RecordStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export BOT_TOKEN=123456:ABC-...");
        std::process::exit(1);
    });

    eprintln!("🤖 leadbot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Reporting zone: UTC{:+}",
        config.reporting_zone.local_minus_utc() / 3600
    );

    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlStore::new_local(Path::new(&config.db_path), config.reporting_zone)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {e}", config.db_path);
                std::process::exit(1);
            }),
    );

    // Seed the super-operator allow-list; grants are upserts, so re-seeding
    // on every start is safe.
    for &id in &config.super_operators {
        store.grant_super_operator(id, "super operator").await?;
        tracing::info!(operator = id, "Seeded super operator");
    }
    if config.super_operators.is_empty() {
        tracing::warn!("LEADBOT_SUPER_OPERATORS is empty; no one can open the admin panel");
    }

    let telegram = TelegramMessenger::new(config.bot_token.clone(), config.poll_timeout_secs);
    let mut updates = telegram.start();
    let messenger: Arc<dyn Messenger> = Arc::new(telegram);

    let dispatcher = Arc::new(Dispatcher::new(store, messenger, config.reporting_zone));

    tracing::info!("leadbot running");
    while let Some(inbound) = updates.recv().await {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher.handle(inbound).await;
        });
    }

    Ok(())
}
