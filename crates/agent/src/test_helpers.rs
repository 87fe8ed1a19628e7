//! Shared test doubles for responder tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chatterbox_core::channel::{Channel, OutboundMessage, SentMessage, Update};
use chatterbox_core::error::{ChannelError, ProviderError, SearchError};
use chatterbox_core::message::{ChatId, MsgId};
use chatterbox_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use chatterbox_core::search::ResourceSearch;
use chrono::Utc;
use tokio::sync::mpsc;

/// A provider that answers from a script and records every request.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
    models: Vec<String>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
            models: vec!["gpt-4o".into(), "gpt-4o-mini".into()],
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let mut replies = self.replies.lock().unwrap();
        assert!(!replies.is_empty(), "ScriptedProvider: script exhausted");
        let text = replies.remove(0)?;
        Ok(ProviderResponse {
            text,
            model,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }
}

/// What a [`RecordingChannel`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message { chat_id: ChatId, message: OutboundMessage },
    Edit { chat_id: ChatId, msg_id: MsgId, message: OutboundMessage },
    Toast { text: Option<String> },
    Typing { chat_id: ChatId },
}

/// A channel that records outbound traffic and hands out message ids.
pub struct RecordingChannel {
    pub sent: Mutex<Vec<Sent>>,
    next_id: Mutex<MsgId>,
    allowed: Vec<ChatId>,
    max_chars: Option<usize>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::allowing(Vec::new())
    }

    /// Restrict the allowlist; an empty list allows every chat.
    pub fn allowing(allowed: Vec<ChatId>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            next_id: Mutex::new(1000),
            allowed,
            max_chars: None,
        }
    }

    /// Split texts longer than `max_chars` into chained parts.
    pub fn splitting(max_chars: usize) -> Self {
        Self {
            max_chars: Some(max_chars),
            ..Self::new()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Texts of sent messages and edits, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message { message, .. } | Sent::Edit { message, .. } => Some(message.text),
                _ => None,
            })
            .collect()
    }

    pub fn last_outbound(&self) -> OutboundMessage {
        self.sent()
            .into_iter()
            .rev()
            .find_map(|s| match s {
                Sent::Message { message, .. } | Sent::Edit { message, .. } => Some(message),
                _ => None,
            })
            .unwrap()
    }

    pub fn toasts(&self) -> Vec<Option<String>> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Toast { text } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<mpsc::Receiver<Result<Update, ChannelError>>, ChannelError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: ChatId,
        message: &OutboundMessage,
    ) -> Result<Vec<SentMessage>, ChannelError> {
        let chars: Vec<char> = message.text.chars().collect();
        let parts: Vec<String> = match self.max_chars {
            Some(max) if chars.len() > max => chars.chunks(max).map(|c| c.iter().collect()).collect(),
            _ => vec![message.text.clone()],
        };

        let mut sent: Vec<SentMessage> = Vec::new();
        for text in parts {
            let reply_to = sent.last().map(|s| s.msg_id).or(message.reply_to);
            self.sent.lock().unwrap().push(Sent::Message {
                chat_id,
                message: OutboundMessage {
                    text: text.clone(),
                    reply_to,
                    ..message.clone()
                },
            });
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            sent.push(SentMessage {
                msg_id: *next,
                timestamp: Utc::now(),
                text,
                reply_to,
            });
        }
        Ok(sent)
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        msg_id: MsgId,
        message: &OutboundMessage,
    ) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(Sent::Edit {
            chat_id,
            msg_id,
            message: message.clone(),
        });
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(Sent::Typing { chat_id });
        Ok(())
    }

    async fn answer_callback(&self, _id: &str, text: Option<&str>) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(Sent::Toast {
            text: text.map(String::from),
        });
        Ok(())
    }

    fn is_allowed(&self, chat_id: ChatId) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&chat_id)
    }
}

/// A search backend returning fixed results.
pub struct FixedSearch(pub Vec<String>);

#[async_trait]
impl ResourceSearch for FixedSearch {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<String>, SearchError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}
