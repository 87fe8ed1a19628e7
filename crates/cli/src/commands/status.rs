//! `chatterbox status` — Show the effective configuration.

use chatterbox_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let set = |present: bool| if present { "set" } else { "missing" };

    println!("💬 Chatterbox Status");
    println!("====================");
    println!("  Config dir:    {}", AppConfig::config_dir().display());
    println!("  Database:      {}", config.database_url());
    println!("  API endpoint:  {}", config.api_url);
    println!("  API key:       {}", set(config.api_key.is_some()));
    println!("  Bot token:     {}", set(config.telegram.bot_token.is_some()));
    println!("  Model:         {}", config.default_model);
    println!("  Temperature:   {}", config.default_temperature);
    println!("  Allowed chats: {}", config.telegram.allowed_chats.join(", "));
    println!(
        "  History:       {:?} (depth {}, {}+{} focused)",
        config.history.strategy,
        config.history.max_depth,
        config.history.from_assistant,
        config.history.to_assistant
    );
    println!(
        "  Cooldowns:     analyze {}s, image search {}s ({})",
        config.cooldown.analyze_secs,
        config.cooldown.image_search_secs,
        if config.cooldown.persist { "persisted" } else { "in memory" }
    );
    println!(
        "  Image search:  {}",
        config.search.endpoint.as_deref().unwrap_or("disabled")
    );
    println!("  Handlers:      {}", config.runtime.max_concurrent_handlers);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `chatterbox onboard` first");
    }

    Ok(())
}
