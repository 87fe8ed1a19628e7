//! MessageLog trait — the persisted, append-mostly chat log.
//!
//! The log holds messages, users, per-chat settings and visibility flags.
//! From the context engine's perspective it is read-only; only the
//! responder writes to it (idempotently) when messages arrive or are sent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::{AuthorStats, ChatActivity, ChatSettings, KindCount, User};
use crate::error::StoreError;
use crate::message::{ChatId, ChatMessage, LogRow, MsgId, UserId};

/// Which side of the assistant/human split a history page reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user_id")]
pub enum AuthorFilter {
    /// Only messages written by this user
    Only(UserId),
    /// Every message not written by this user
    Except(UserId),
}

impl AuthorFilter {
    pub fn matches(&self, author_id: UserId) -> bool {
        match self {
            Self::Only(id) => author_id == *id,
            Self::Except(id) => author_id != *id,
        }
    }
}

/// Position in a chat's history; pages continue strictly before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub msg_id: MsgId,
}

impl Cursor {
    pub fn of(message: &ChatMessage) -> Self {
        Self {
            timestamp: message.timestamp,
            msg_id: message.msg_id,
        }
    }

    /// Whether `message` sorts strictly before this cursor.
    pub fn admits(&self, message: &ChatMessage) -> bool {
        (message.timestamp, message.msg_id) < (self.timestamp, self.msg_id)
    }
}

/// A request for one page of recent history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub chat_id: ChatId,
    pub author: AuthorFilter,

    /// Continue strictly before this position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Cursor>,

    pub limit: usize,

    /// Skip messages without text (pure photos and stickers)
    #[serde(default)]
    pub text_only: bool,
}

impl HistoryPage {
    pub fn new(chat_id: ChatId, author: AuthorFilter, limit: usize) -> Self {
        Self {
            chat_id,
            author,
            before: None,
            limit,
            text_only: false,
        }
    }

    pub fn text_only(mut self) -> Self {
        self.text_only = true;
        self
    }

    pub fn before(mut self, cursor: Option<Cursor>) -> Self {
        self.before = cursor;
        self
    }
}

/// The core MessageLog trait.
///
/// Implementations: SQLite (production), in-memory (testing).
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert a message. Returns `false` if `(chat_id, msg_id)` already existed,
    /// in which case the stored row is left untouched.
    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, StoreError>;

    /// Insert or refresh a user's names.
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Fetch a user, with their latest expensive-operation time.
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    /// Fetch one message with its author name and parent author.
    async fn get(&self, chat_id: ChatId, msg_id: MsgId) -> Result<Option<LogRow>, StoreError>;

    /// Fetch a page of history, newest first, ordered by `(timestamp, msg_id)`.
    async fn recent(&self, page: &HistoryPage) -> Result<Vec<LogRow>, StoreError>;

    /// Stored overrides for a chat, if any command ever touched it.
    async fn chat_settings(&self, chat_id: ChatId) -> Result<Option<ChatSettings>, StoreError>;

    /// Set (`Some`) or clear (`None`) the chat's system prompt.
    async fn set_system_prompt(
        &self,
        chat_id: ChatId,
        prompt: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_temperature(&self, chat_id: ChatId, temperature: f32) -> Result<(), StoreError>;

    async fn set_model(&self, chat_id: ChatId, model: &str) -> Result<(), StoreError>;

    /// Flip a member's opt-out from broadcast mentions. Returns `true` if the
    /// member is now hidden.
    async fn toggle_visibility(&self, chat_id: ChatId, user_id: UserId)
    -> Result<bool, StoreError>;

    /// Every member that has written in the chat and is not hidden.
    async fn chat_members(&self, chat_id: ChatId) -> Result<Vec<User>, StoreError>;

    /// Authors with the most text messages in the chat, descending.
    async fn top_authors(&self, chat_id: ChatId, limit: usize)
    -> Result<Vec<AuthorStats>, StoreError>;

    /// Message total and the `limit` most active authors, counting every
    /// message kind sent at or after `since` (the whole log when `None`).
    async fn activity(
        &self,
        chat_id: ChatId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<ChatActivity, StoreError>;

    /// One author's message counts per kind since `since`, descending.
    async fn kind_counts(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<KindCount>, StoreError>;

    /// The most recent non-empty texts of one author, newest first.
    async fn author_texts(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn author_filter_matches() {
        assert!(AuthorFilter::Only(1).matches(1));
        assert!(!AuthorFilter::Only(1).matches(2));
        assert!(AuthorFilter::Except(1).matches(2));
        assert!(!AuthorFilter::Except(1).matches(1));
    }

    #[test]
    fn cursor_orders_by_time_then_id() {
        let t = Utc.timestamp_opt(100, 0).single().unwrap();
        let cursor = Cursor {
            timestamp: t,
            msg_id: 10,
        };
        assert!(cursor.admits(&ChatMessage::text(1, 9, 1, t, "same second, lower id")));
        assert!(!cursor.admits(&ChatMessage::text(1, 10, 1, t, "the cursor itself")));
        assert!(!cursor.admits(&ChatMessage::text(
            1,
            3,
            1,
            Utc.timestamp_opt(101, 0).single().unwrap(),
            "later"
        )));
    }

    #[test]
    fn history_page_builder() {
        let page = HistoryPage::new(-5, AuthorFilter::Except(7), 20).text_only();
        assert!(page.text_only);
        assert!(page.before.is_none());
        assert_eq!(page.limit, 20);
    }
}
