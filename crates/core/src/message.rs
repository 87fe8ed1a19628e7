//! Message, turn and role-block domain types.
//!
//! These are the value objects that flow through the context pipeline:
//! Channel receives a `ChatMessage` → the log stores it → a resolver reads
//! `LogRow`s back → they become `ResolvedTurn`s → the assembler turns them
//! into `RoleBlock`s for the provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform chat identifier (negative for Telegram groups).
pub type ChatId = i64;

/// Message identifier, unique within a chat.
pub type MsgId = i64;

/// Platform user identifier. The assistant has one too.
pub type UserId = i64;

/// What kind of content a logged message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Photo,
    Sticker,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Sticker => "sticker",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "photo" => Ok(Self::Photo),
            "sticker" => Ok(Self::Sticker),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// A single message as persisted in the chat log.
///
/// Immutable once written. `reply_to` points at another message in the same
/// chat and may form a cycle; consumers must not assume a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: ChatId,
    pub msg_id: MsgId,
    pub author_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,

    /// Message text, or the caption for photos
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Opaque platform reference to the largest photo size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MsgId>,
}

impl ChatMessage {
    /// Create a plain text message.
    pub fn text(
        chat_id: ChatId,
        msg_id: MsgId,
        author_id: UserId,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            chat_id,
            msg_id,
            author_id,
            timestamp,
            kind: MessageKind::Text,
            text: Some(text.into()),
            photo_ref: None,
            reply_to: None,
        }
    }

    /// Create a photo message with an optional caption.
    pub fn photo(
        chat_id: ChatId,
        msg_id: MsgId,
        author_id: UserId,
        timestamp: DateTime<Utc>,
        photo_ref: impl Into<String>,
        caption: Option<String>,
    ) -> Self {
        Self {
            chat_id,
            msg_id,
            author_id,
            timestamp,
            kind: MessageKind::Photo,
            text: caption,
            photo_ref: Some(photo_ref.into()),
            reply_to: None,
        }
    }

    /// Mark this message as a reply to `parent`.
    pub fn replying_to(mut self, parent: MsgId) -> Self {
        self.reply_to = Some(parent);
        self
    }
}

/// A message read back from the log, joined with what the context
/// pipeline needs about its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub message: ChatMessage,

    /// Display name of the author, if the user row is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// Author of the message this one replies to, if that message is logged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_author_id: Option<UserId>,
}

impl LogRow {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            author_name: None,
            parent_author_id: None,
        }
    }
}

/// One retrieved message, reduced to what the assembler consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTurn {
    pub msg_id: MsgId,
    pub author_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl From<LogRow> for ResolvedTurn {
    fn from(row: LogRow) -> Self {
        let LogRow {
            message,
            author_name,
            ..
        } = row;
        Self {
            msg_id: message.msg_id,
            author_id: message.author_id,
            author_name,
            timestamp: message.timestamp,
            text: message.text,
            image_ref: message.photo_ref,
        }
    }
}

/// Order turns oldest first; equal timestamps fall back to message id.
pub fn sort_chronologically(turns: &mut [ResolvedTurn]) {
    turns.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.msg_id.cmp(&b.msg_id))
    });
}

/// The role of a block in the model-facing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Chat-level instructions
    System,
    /// Any human participant
    User,
    /// The assistant itself
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One piece of multimodal content inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

/// One entry of the payload handed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBlock {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl RoleBlock {
    /// A block with a single text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    /// Concatenated text parts (images skipped).
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn log_row_becomes_turn() {
        let msg = ChatMessage::photo(-100, 7, 42, at(10), "file-abc", Some("look".into()));
        let mut row = LogRow::new(msg);
        row.author_name = Some("Alice".into());

        let turn = ResolvedTurn::from(row);
        assert_eq!(turn.msg_id, 7);
        assert_eq!(turn.author_name.as_deref(), Some("Alice"));
        assert_eq!(turn.text.as_deref(), Some("look"));
        assert_eq!(turn.image_ref.as_deref(), Some("file-abc"));
    }

    #[test]
    fn chronological_sort_breaks_ties_by_id() {
        let turn = |id, secs| ResolvedTurn {
            msg_id: id,
            author_id: 1,
            author_name: None,
            timestamp: at(secs),
            text: None,
            image_ref: None,
        };
        let mut turns = vec![turn(5, 20), turn(3, 10), turn(2, 20)];
        sort_chronologically(&mut turns);
        let ids: Vec<_> = turns.iter().map(|t| t.msg_id).collect();
        assert_eq!(ids, vec![3, 2, 5]);
    }

    #[test]
    fn message_kind_parses() {
        assert_eq!("photo".parse::<MessageKind>().unwrap(), MessageKind::Photo);
        assert!("video".parse::<MessageKind>().is_err());
    }

    #[test]
    fn role_block_text_content_skips_images() {
        let block = RoleBlock {
            role: Role::User,
            parts: vec![
                ContentPart::Text { text: "Bob: see".into() },
                ContentPart::Image { url: "https://x/y.jpg".into() },
            ],
        };
        assert_eq!(block.text_content(), "Bob: see");
        assert!(block.has_image());
    }

    #[test]
    fn content_part_serializes_tagged() {
        let json = serde_json::to_string(&ContentPart::Image { url: "u".into() }).unwrap();
        assert!(json.contains(r#""type":"image""#));
    }
}
