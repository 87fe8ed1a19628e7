//! Channel trait — the abstraction over the chat transport.
//!
//! A Channel connects Chatterbox to a messaging platform. It yields inbound
//! updates (messages and button presses) and accepts outbound sends and edits.
//! The core never talks to it except through the `Responder`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::User;
use crate::error::ChannelError;
use crate::message::{ChatId, ChatMessage, MessageKind, MsgId, UserId};

/// The kind of conversation an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

/// An inbound chat message, as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_title: Option<String>,
    pub msg_id: MsgId,
    pub from: User,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MsgId>,
    /// Author of the replied-to message, when the platform embeds it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_author: Option<UserId>,
}

impl InboundMessage {
    /// The log row this message becomes.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            chat_id: self.chat_id,
            msg_id: self.msg_id,
            author_id: self.from.user_id,
            timestamp: self.timestamp,
            kind: self.kind,
            text: self.text.clone(),
            photo_ref: self.photo_ref.clone(),
            reply_to: self.reply_to,
        }
    }
}

/// A press on an inline keyboard button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    /// The message carrying the keyboard
    pub msg_id: MsgId,
    pub from: User,
    pub data: String,
}

/// Anything the transport hands to the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    Message(InboundMessage),
    Callback(CallbackQuery),
}

/// An inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// A message to send or an edit to apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,

    /// Render `text` with HTML markup
    #[serde(default)]
    pub html: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MsgId>,

    /// Inline keyboard rows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyboard: Vec<Vec<Button>>,

    /// Photo URL to send instead of a text message; `text` becomes the caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl OutboundMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: true,
            ..Default::default()
        }
    }

    pub fn replying_to(mut self, msg_id: MsgId) -> Self {
        self.reply_to = Some(msg_id);
        self
    }

    pub fn with_keyboard(mut self, keyboard: Vec<Vec<Button>>) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn with_photo(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// One platform message produced by a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub msg_id: MsgId,
    pub timestamp: DateTime<Utc>,
    /// The part of the outbound text this message carries
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MsgId>,
}

/// The core Channel trait.
///
/// Implementations handle platform-specific polling, formatting and
/// authentication.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram").
    fn name(&self) -> &str;

    /// Start listening for inbound updates.
    ///
    /// Returns a receiver that yields updates; the implementation handles
    /// polling internally.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<Update, ChannelError>>,
        ChannelError,
    >;

    /// Send a message to a chat.
    ///
    /// Text over the platform limit goes out as several messages, each
    /// replying to the one before it. Returns every delivered message in
    /// order; the first carries `message.reply_to`.
    async fn send(
        &self,
        chat_id: ChatId,
        message: &OutboundMessage,
    ) -> std::result::Result<Vec<SentMessage>, ChannelError>;

    /// Replace the text and keyboard of a previously sent message.
    async fn edit(
        &self,
        chat_id: ChatId,
        msg_id: MsgId,
        message: &OutboundMessage,
    ) -> std::result::Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: ChatId) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Acknowledge a button press, optionally with a toast.
    async fn answer_callback(
        &self,
        _callback_id: &str,
        _text: Option<&str>,
    ) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Check if a chat is allowed to talk to the assistant.
    fn is_allowed(&self, chat_id: ChatId) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }
}
