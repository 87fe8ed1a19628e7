//! Assistant identity — who "the assistant" is inside a chat.
//!
//! Resolved once at startup from the transport (Telegram `getMe`) and passed
//! explicitly into every core function that must tell assistant turns apart
//! from human ones.

use serde::{Deserialize, Serialize};

use crate::message::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantIdentity {
    /// Platform user id of the bot account
    pub id: UserId,

    /// Display name used when the assistant's own messages are logged
    pub name: String,

    /// Bot username without the leading `@`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl AssistantIdentity {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            username: None,
        }
    }

    pub fn is_assistant(&self, author_id: UserId) -> bool {
        self.id == author_id
    }
}
