//! `chatterbox doctor` — Diagnose configuration and connectivity.

use chatterbox_channels::{TelegramChannel, TelegramConfig};
use chatterbox_config::AppConfig;
use chatterbox_core::provider::Provider;
use chatterbox_store::SqliteLog;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Chatterbox Doctor — Diagnostics");
    println!("==================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file — run `chatterbox onboard` (environment only)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  Fix the configuration before further checks.");
            return Ok(());
        }
    };

    // Database
    let _ = std::fs::create_dir_all(AppConfig::config_dir());
    match SqliteLog::new(&config.database_url()).await {
        Ok(_) => println!("  ✅ Database opens and migrates"),
        Err(e) => {
            println!("  ❌ Database: {e}");
            issues += 1;
        }
    }

    // Model provider
    match chatterbox_providers::from_config(&config) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => println!("  ✅ Model API reachable at {}", config.api_url),
            Ok(false) => {
                println!("  ⚠️  Model API at {} answered but looks unhealthy", config.api_url);
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Model API: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Model provider: {e}");
            issues += 1;
        }
    }

    // Telegram
    let telegram = TelegramConfig::from_settings(&config.telegram).and_then(TelegramChannel::new);
    match telegram {
        Ok(channel) => match channel.get_me().await {
            Ok(me) => println!(
                "  ✅ Telegram bot: {} (@{})",
                me.name,
                me.username.as_deref().unwrap_or("?")
            ),
            Err(e) => {
                println!("  ❌ Telegram: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Telegram: {e}");
            issues += 1;
        }
    }

    if config.search.endpoint.is_none() {
        println!("  ℹ️  Image search disabled (no [search] endpoint)");
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
