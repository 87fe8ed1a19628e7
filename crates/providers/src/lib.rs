//! Provider implementations for Chatterbox.
//!
//! Model providers implement `chatterbox_core::Provider`; search backends
//! implement `chatterbox_core::ResourceSearch`. [`from_config`] builds the
//! configured pair.

pub mod openai_compat;
pub mod searxng;

pub use openai_compat::OpenAiCompatProvider;
pub use searxng::SearxngSearch;

use chatterbox_config::AppConfig;
use chatterbox_core::error::ProviderError;
use std::time::Duration;

/// Build the model provider from configuration.
pub fn from_config(config: &AppConfig) -> Result<OpenAiCompatProvider, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key; set api_key in config.toml or CHATTERBOX_API_KEY".into(),
        )
    })?;
    OpenAiCompatProvider::with_timeout(
        "openai",
        &config.api_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )
}

/// Build the image search backend, if one is configured.
pub fn search_from_config(config: &AppConfig) -> Option<SearxngSearch> {
    config
        .search
        .endpoint
        .as_deref()
        .and_then(|endpoint| SearxngSearch::new(endpoint).ok())
}
