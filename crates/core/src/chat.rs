//! Per-chat configuration and chat participants.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChatId, MessageKind, UserId};

/// Overrides persisted for a chat by configuration commands.
///
/// `None` fields fall back to the application defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// The effective configuration of one chat, read by context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub model_name: String,
}

impl ChatConfig {
    /// Merge stored overrides with application defaults.
    pub fn resolve(
        chat_id: ChatId,
        settings: Option<ChatSettings>,
        default_model: &str,
        default_temperature: f32,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        Self {
            chat_id,
            system_prompt: settings.system_prompt.filter(|p| !p.trim().is_empty()),
            temperature: settings.temperature.unwrap_or(default_temperature),
            model_name: settings
                .model_name
                .unwrap_or_else(|| default_model.to_string()),
        }
    }
}

/// A chat participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    pub display_name: String,

    /// Latest expensive operation across all kinds (read-only view)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_expensive_op_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            username: None,
            display_name: display_name.into(),
            last_expensive_op_at: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// An HTML mention: `@username` when known, otherwise a `tg://user` link.
    pub fn mention_html(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => format!(
                "<a href='tg://user?id={}'>{}</a>",
                self.user_id,
                escape_html(&self.display_name)
            ),
        }
    }
}

/// Message count of one author in one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorStats {
    pub user_id: UserId,
    pub display_name: String,
    pub message_count: u64,
}

/// Message volume of a chat over a period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatActivity {
    /// Messages of every kind
    pub total: u64,
    /// Most active authors, descending
    pub top: Vec<AuthorStats>,
}

/// How many messages of one kind an author sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: MessageKind,
    pub count: u64,
}

/// Reporting window for chat statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatsPeriod {
    Day,
    Week,
    Month,
    All,
}

impl StatsPeriod {
    pub const ALL: [Self; 4] = [Self::Day, Self::Week, Self::Month, Self::All];

    /// Compact code used in callback data.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Day => "1d",
            Self::Week => "7d",
            Self::Month => "30d",
            Self::All => "all",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Day => "1 day",
            Self::Week => "1 week",
            Self::Month => "1 month",
            Self::All => "all time",
        }
    }

    /// Start of the window ending at `now`; `None` covers the whole log.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
            Self::All => return None,
        };
        Some(now - Duration::days(days))
    }
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
