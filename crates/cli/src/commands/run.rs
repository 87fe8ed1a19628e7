//! `chatterbox run` — Poll Telegram and answer until interrupted.

use std::sync::Arc;
use std::time::Duration;

use chatterbox_agent::{Responder, ResponderSettings, SessionStore};
use chatterbox_channels::{TelegramChannel, TelegramConfig};
use chatterbox_config::AppConfig;
use chatterbox_core::channel::Channel;
use chatterbox_core::cooldown::CooldownTracker;
use chatterbox_store::{InMemoryCooldowns, SqliteLog};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// How often expired sessions and cooldown records are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    std::fs::create_dir_all(AppConfig::config_dir())?;
    let store = Arc::new(SqliteLog::new(&config.database_url()).await?);
    let provider = Arc::new(chatterbox_providers::from_config(&config)?);
    let telegram = Arc::new(TelegramChannel::new(TelegramConfig::from_settings(
        &config.telegram,
    )?)?);
    let assistant = telegram.get_me().await?;

    let memory_cooldowns = Arc::new(InMemoryCooldowns::new());
    let cooldowns: Arc<dyn CooldownTracker> = if config.cooldown.persist {
        store.clone()
    } else {
        memory_cooldowns.clone()
    };
    let sessions = Arc::new(SessionStore::from_config(&config.sessions));

    let mut responder = Responder::new(
        store.clone(),
        telegram.clone(),
        provider,
        cooldowns,
        assistant.clone(),
        ResponderSettings::from_config(&config),
    )
    .with_resolver(telegram.clone())
    .with_sessions(sessions.clone());
    if let Some(search) = chatterbox_providers::search_from_config(&config) {
        info!(endpoint = ?config.search.endpoint, "Image search enabled");
        responder = responder.with_search(Arc::new(search));
    }
    let responder = Arc::new(responder);

    info!(
        bot = %assistant.name,
        username = ?assistant.username,
        model = %config.default_model,
        strategy = ?config.history.strategy,
        "Chatterbox started"
    );

    let longest_cooldown = chrono::Duration::seconds(
        config
            .cooldown
            .analyze_secs
            .max(config.cooldown.image_search_secs)
            .min(u64::from(u32::MAX)) as i64,
    );
    let sweeper = tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let swept = sessions.evict_expired().await;
            memory_cooldowns.prune(chrono::Utc::now(), longest_cooldown);
            if swept > 0 {
                debug!(swept, "Expired sessions evicted");
            }
        }
    });

    let mut updates = telegram.start().await?;
    let permits = Arc::new(Semaphore::new(config.runtime.max_concurrent_handlers));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            update = updates.recv() => {
                let Some(update) = update else {
                    warn!("Update stream closed");
                    break;
                };
                let update = match update {
                    Ok(update) => update,
                    Err(e) => {
                        warn!(error = %e, "Polling failed");
                        continue;
                    }
                };
                let permit = permits.clone().acquire_owned().await?;
                let responder = responder.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = responder.handle(update).await {
                        error!(error = %e, "Update handling failed");
                    }
                });
            }
        }
    }

    sweeper.abort();
    telegram.stop().await?;
    Ok(())
}
