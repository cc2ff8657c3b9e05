mod telegram;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use humanlike_engine::engine::{Engine, EventOutcome};
use humanlike_engine::http_client::build_http_client;
use humanlike_engine::runtime::EngineRuntime;
use humanlike_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

use telegram::{to_inbound_event, TelegramClient, TelegramUser};

// Long polls hold the connection for 30 s, leave headroom on top.
const GATEWAY_TIMEOUT_SECS: u64 = 60;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,humanlike=debug,humanlike_engine=debug")),
        )
        .init();

    let config = EngineConfig::load();
    if !config.enabled {
        tracing::info!("Humanlike chat is disabled (set enabled = true or HUMANLIKE_ENABLED=1)");
        return Ok(());
    }

    let token = std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty())
        .context("TELEGRAM_BOT_TOKEN must be set")?;

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(run(config, token))
}

async fn run(mut config: EngineConfig, token: String) -> Result<()> {
    let http = build_http_client(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
        .context("failed to build gateway HTTP client")?;
    let telegram = Arc::new(TelegramClient::new(&token, http));

    let me = telegram.get_me().await?;
    tracing::info!(
        "Connected to Telegram as @{} ({})",
        me.username.as_deref().unwrap_or("?"),
        me.id
    );
    if config.bot.self_id == 0 {
        config.bot.self_id = me.id;
    }

    let runtime = EngineRuntime::bootstrap(config, telegram.clone())
        .context("failed to bootstrap engine runtime")?;
    let scheduler = runtime.spawn_scheduler();

    tokio::select! {
        _ = poll_loop(telegram, runtime.engine.clone(), me) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down...");
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}

async fn poll_loop(telegram: Arc<TelegramClient>, engine: Arc<Engine>, me: TelegramUser) {
    let mut offset: i64 = 0;

    loop {
        let Some(updates) = telegram.poll_updates(offset).await else {
            continue;
        };

        for update in updates {
            offset = update.update_id + 1;

            let Some(event) = to_inbound_event(update, &me) else {
                continue;
            };

            let engine = engine.clone();
            tokio::spawn(async move {
                let channel_id = event.channel_id;
                match engine.handle_event(event).await {
                    Ok(EventOutcome::Replied { sent, .. }) => {
                        tracing::debug!("Replied in chat {} with {} message(s)", channel_id, sent)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Reply turn in chat {} failed: {}", channel_id, e),
                }
            });
        }
    }
}
