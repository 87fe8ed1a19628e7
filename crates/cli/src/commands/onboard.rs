//! `chatterbox onboard` — First-time setup.

use chatterbox_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("💬 Chatterbox — First-Time Setup");
    println!("================================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Put your bot token under [telegram] bot_token (or set CHATTERBOX_BOT_TOKEN)");
    println!("   2. Set api_key (or CHATTERBOX_API_KEY / OPENAI_API_KEY)");
    println!("   3. Optionally list chats in [telegram] allowed_chats");
    println!("   4. Run: chatterbox doctor, then chatterbox run\n");

    Ok(())
}
