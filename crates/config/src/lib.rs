//! Configuration loading, validation, and management for Chatterbox.
//!
//! Loads configuration from `~/.chatterbox/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use chatterbox_core::{ChatId, UserId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chatterbox/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model used when a chat has not selected one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Temperature used when a chat has not set one
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Upper bound for one inference call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User allowed to run admin-only commands (`!say`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<UserId>,

    /// Chat that `!say` relays into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_chat_id: Option<ChatId>,

    #[serde(default)]
    pub telegram: TelegramSettings,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub cooldown: CooldownConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_request_timeout() -> u64 {
    90
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("admin_id", &self.admin_id)
            .field("broadcast_chat_id", &self.broadcast_chat_id)
            .field("telegram", &self.telegram)
            .field("database", &self.database)
            .field("history", &self.history)
            .field("sessions", &self.sessions)
            .field("cooldown", &self.cooldown)
            .field("search", &self.search)
            .field("runtime", &self.runtime)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Long-polling timeout passed to `getUpdates`
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Chat IDs the bot answers in. Empty = deny all. ["*"] = allow all.
    #[serde(default = "default_allowed_chats")]
    pub allowed_chats: Vec<String>,
}

fn default_poll_timeout() -> u64 {
    30
}
fn default_allowed_chats() -> Vec<String> {
    vec!["*".into()]
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            poll_timeout_secs: default_poll_timeout(),
            allowed_chats: default_allowed_chats(),
        }
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &redact(&self.bot_token))
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("allowed_chats", &self.allowed_chats)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL; defaults to `~/.chatterbox/log.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Which history strategy builds the model context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Reply chain when the trigger is a reply, focused history otherwise
    #[default]
    Auto,
    /// Always walk the reply chain
    Thread,
    /// Always use recent assistant and addressed-to-assistant turns
    Focused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Maximum reply-chain hops walked from the trigger message
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Recent assistant turns kept by the focused strategy
    #[serde(default = "default_history_limit")]
    pub from_assistant: usize,

    /// Recent human turns addressed to the assistant kept by the focused strategy
    #[serde(default = "default_history_limit")]
    pub to_assistant: usize,
}

fn default_max_depth() -> usize {
    10
}
fn default_history_limit() -> usize {
    5
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            max_depth: default_max_depth(),
            from_assistant: default_history_limit(),
            to_assistant: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum live search sessions before the least recently used is evicted
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,

    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

fn default_session_capacity() -> usize {
    256
}
fn default_session_ttl() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            ttl_secs: default_session_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_analyze_cooldown")]
    pub analyze_secs: u64,

    #[serde(default = "default_image_search_cooldown")]
    pub image_search_secs: u64,

    /// Keep cooldown records in the database instead of process memory
    #[serde(default)]
    pub persist: bool,
}

fn default_analyze_cooldown() -> u64 {
    300
}
fn default_image_search_cooldown() -> u64 {
    10
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            analyze_secs: default_analyze_cooldown(),
            image_search_secs: default_image_search_cooldown(),
            persist: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// SearXNG-compatible JSON endpoint; image search is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    20
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Inbound updates handled concurrently
    #[serde(default = "default_max_handlers")]
    pub max_concurrent_handlers: usize,
}

fn default_max_handlers() -> usize {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: default_max_handlers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatterbox/config.toml).
    ///
    /// Environment variables override file values:
    /// - `CHATTERBOX_BOT_TOKEN`, then `BOT_TOKEN`
    /// - `CHATTERBOX_API_KEY`, then `OPENAI_API_KEY`
    /// - `CHATTERBOX_DATABASE_URL`
    /// - `CHATTERBOX_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("CHATTERBOX_BOT_TOKEN").or_else(|| lookup("BOT_TOKEN")) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(key) = lookup("CHATTERBOX_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("CHATTERBOX_DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(model) = lookup("CHATTERBOX_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatterbox")
    }

    /// The SQLite URL to open, falling back to a file in the config dir.
    pub fn database_url(&self) -> String {
        self.database.url.clone().unwrap_or_else(|| {
            format!("sqlite://{}", Self::config_dir().join("log.db").display())
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }

        if self.sessions.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.capacity must be > 0".into(),
            ));
        }

        if self.runtime.max_concurrent_handlers == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.max_concurrent_handlers must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            admin_id: None,
            broadcast_chat_id: None,
            telegram: TelegramSettings::default(),
            database: DatabaseConfig::default(),
            history: HistoryConfig::default(),
            sessions: SessionConfig::default(),
            cooldown: CooldownConfig::default(),
            search: SearchConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.max_depth, 10);
        assert_eq!(config.history.strategy, StrategyKind::Auto);
        assert_eq!(config.telegram.allowed_chats, vec!["*".to_string()]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.sessions.capacity, config.sessions.capacity);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
    }

    #[test]
    fn parses_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_model = "gpt-4o"
admin_id = 548789253

[history]
strategy = "focused"
from_assistant = 3

[cooldown]
analyze_secs = 60
persist = true
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.admin_id, Some(548789253));
        assert_eq!(config.history.strategy, StrategyKind::Focused);
        assert_eq!(config.history.from_assistant, 3);
        assert_eq!(config.history.to_assistant, 5);
        assert_eq!(config.cooldown.analyze_secs, 60);
        assert!(config.cooldown.persist);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "default_temperature = \"hot\"").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let env: HashMap<&str, &str> = [
            ("BOT_TOKEN", "fallback-token"),
            ("CHATTERBOX_BOT_TOKEN", "primary-token"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("CHATTERBOX_MODEL", "gpt-4.1-mini"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.telegram.bot_token.as_deref(), Some("primary-token"));
        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.default_model, "gpt-4.1-mini");
        assert!(config.database.url.is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret".into());
        config.telegram.bot_token = Some("123:ABC".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(!dbg.contains("123:ABC"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn database_url_falls_back_to_config_dir() {
        let config = AppConfig::default();
        let url = config.database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("log.db"));
    }
}
