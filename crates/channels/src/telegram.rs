//! Telegram channel adapter.
//!
//! Talks to the Telegram Bot API over HTTPS with long polling
//! (`getUpdates`). Inbound messages and inline-keyboard presses are mapped
//! to core `Update`s; outbound messages support HTML, replies, inline
//! keyboards and photos.
//!
//! The channel also resolves photo `file_id`s for the context assembler:
//! the file is downloaded and inlined as a `data:` URI so the bot token
//! never leaves the process.

use async_trait::async_trait;
use base64::Engine;
use chatterbox_config::TelegramSettings;
use chatterbox_core::channel::{
    Button, CallbackQuery, Channel, ChatKind, InboundMessage, OutboundMessage, SentMessage, Update,
};
use chatterbox_core::chat::User;
use chatterbox_core::error::{ChannelError, ResolveError};
use chatterbox_core::identity::AssistantIdentity;
use chatterbox_core::message::{ChatId, MessageKind, MsgId};
use chatterbox_core::resolver::ImageResolver;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Longest text Telegram accepts in one message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Longest photo caption Telegram accepts.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Photos larger than this are not inlined into model requests.
const MAX_INLINE_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Allowed chat IDs. Empty = deny all, ["*"] = allow all.
    pub allowed_chats: Vec<String>,
    /// Long-polling timeout in seconds.
    pub poll_timeout_secs: u64,
    /// Bot API base URL, without trailing slash.
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            allowed_chats: vec!["*".into()],
            poll_timeout_secs: 30,
            api_base: "https://api.telegram.org".into(),
        }
    }

    /// Build from the `[telegram]` config section.
    pub fn from_settings(settings: &TelegramSettings) -> Result<Self, ChannelError> {
        let token = settings.bot_token.clone().ok_or_else(|| {
            ChannelError::NotConfigured(
                "no bot token; set telegram.bot_token or CHATTERBOX_BOT_TOKEN".into(),
            )
        })?;
        Ok(Self {
            allowed_chats: settings.allowed_chats.clone(),
            poll_timeout_secs: settings.poll_timeout_secs,
            ..Self::new(token)
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("allowed_chats", &self.allowed_chats)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Telegram channel adapter.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
    running: Arc<AtomicBool>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Result<Self, ChannelError> {
        // Requests must outlive the long-poll window.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_base, self.config.bot_token, method)
    }

    /// Call a Bot API method and unwrap its `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChannelError> {
        call_api(&self.client, &self.method_url(method), body).await
    }

    /// Fetch the bot's own account.
    pub async fn get_me(&self) -> Result<AssistantIdentity, ChannelError> {
        let me: TgUser = self.call("getMe", &serde_json::json!({})).await?;
        let mut identity = AssistantIdentity::new(me.id, me.display_name());
        identity.username = me.username;
        Ok(identity)
    }

    async fn send_one(
        &self,
        chat_id: ChatId,
        text: &str,
        message: &OutboundMessage,
    ) -> Result<SentMessage, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "link_preview_options": { "is_disabled": true },
        });
        if message.html {
            body["parse_mode"] = "HTML".into();
        }
        apply_reply_and_keyboard(&mut body, message);
        let sent: TgMessage = self.call("sendMessage", &body).await?;
        Ok(sent.as_sent())
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        url: &str,
        message: &OutboundMessage,
    ) -> Result<SentMessage, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "photo": url,
        });
        if !message.text.is_empty() {
            body["caption"] = truncate_chars(&message.text, MAX_CAPTION_CHARS).into();
            if message.html {
                body["parse_mode"] = "HTML".into();
            }
        }
        apply_reply_and_keyboard(&mut body, message);
        let sent: TgMessage = self.call("sendPhoto", &body).await?;
        Ok(sent.as_sent())
    }

    async fn download(&self, file_path: &str) -> Result<Vec<u8>, ResolveError> {
        let url = format!(
            "{}/file/bot{}/{}",
            self.config.api_base, self.config.bot_token, file_path
        );
        let failed = |reason: String| ResolveError::ResolutionFailed {
            reference: file_path.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("download status {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        if bytes.len() > MAX_INLINE_IMAGE_BYTES {
            return Err(failed(format!("image too large ({} bytes)", bytes.len())));
        }
        Ok(bytes.to_vec())
    }
}

/// POST `body` to a Bot API method URL and unwrap the envelope.
async fn call_api<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<T, ChannelError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;

    let envelope: TgResponse<T> = response
        .json()
        .await
        .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

    envelope.into_result()
}

fn apply_reply_and_keyboard(body: &mut serde_json::Value, message: &OutboundMessage) {
    if let Some(reply_to) = message.reply_to {
        body["reply_parameters"] = serde_json::json!({
            "message_id": reply_to,
            "allow_sending_without_reply": true,
        });
    }
    if !message.keyboard.is_empty() {
        body["reply_markup"] = keyboard_markup(&message.keyboard);
    }
}

fn keyboard_markup(rows: &[Vec<Button>]) -> serde_json::Value {
    let rows: Vec<Vec<serde_json::Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| serde_json::json!({ "text": b.label, "callback_data": b.data }))
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Split `text` into chunks of at most `max` chars, preferring line breaks.
pub fn split_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn mime_for(file_path: &str) -> &'static str {
    let ext = file_path
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

/// Map one raw Bot API update to a core update. Unsupported kinds yield `None`.
pub fn parse_update(update: TgUpdate) -> Option<Update> {
    if let Some(cb) = update.callback_query {
        let message = cb.message?;
        return Some(Update::Callback(CallbackQuery {
            id: cb.id,
            chat_id: message.chat.id,
            chat_kind: message.chat.kind(),
            msg_id: message.message_id,
            from: cb.from.to_user(),
            data: cb.data.unwrap_or_default(),
        }));
    }

    let message = update.message?;
    let from = message.from.as_ref()?.to_user();

    let (kind, photo_ref) = if let Some(largest) = message.photo.as_ref().and_then(|p| p.last()) {
        (MessageKind::Photo, Some(largest.file_id.clone()))
    } else if message.sticker.is_some() {
        (MessageKind::Sticker, None)
    } else if message.text.is_some() {
        (MessageKind::Text, None)
    } else {
        return None;
    };

    let reply = message.reply_to_message.as_deref();
    Some(Update::Message(InboundMessage {
        chat_id: message.chat.id,
        chat_kind: message.chat.kind(),
        chat_title: message.chat.title.clone(),
        msg_id: message.message_id,
        from,
        timestamp: from_unix(message.date),
        kind,
        text: message.text.clone().or_else(|| message.caption.clone()),
        photo_ref,
        reply_to: reply.map(|r| r.message_id),
        reply_to_author: reply.and_then(|r| r.from.as_ref()).map(|u| u.id),
    }))
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

async fn poll_loop(
    client: reqwest::Client,
    url: String,
    poll_timeout_secs: u64,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<Result<Update, ChannelError>>,
) {
    let mut offset: i64 = 0;
    while running.load(Ordering::SeqCst) {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });

        let updates: Vec<TgUpdate> = match call_api(&client, &url, &body).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                if tx.send(Err(e)).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };

        for raw in updates {
            offset = offset.max(raw.update_id + 1);
            let update_id = raw.update_id;
            match parse_update(raw) {
                Some(update) => {
                    if tx.send(Ok(update)).await.is_err() {
                        info!("Update receiver dropped, stopping poller");
                        return;
                    }
                }
                None => debug!(update_id, "Skipping unsupported update"),
            }
        }
    }
    info!("Telegram poller stopped");
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<Update, ChannelError>>, ChannelError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::NotConfigured("channel already started".into()));
        }
        info!(
            poll_timeout_secs = self.config.poll_timeout_secs,
            "Telegram channel starting (long polling)"
        );

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(poll_loop(
            self.client.clone(),
            self.method_url("getUpdates"),
            self.config.poll_timeout_secs,
            self.running.clone(),
            tx,
        ));
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: ChatId,
        message: &OutboundMessage,
    ) -> Result<Vec<SentMessage>, ChannelError> {
        debug!(
            chat_id,
            reply_to = ?message.reply_to,
            content_len = message.text.len(),
            "Telegram send"
        );

        if let Some(url) = &message.photo_url {
            return Ok(vec![self.send_photo(chat_id, url, message).await?]);
        }

        // Long texts go out as a chain: each part replies to the previous
        // one and only the last carries the keyboard.
        let chunks = split_text(&message.text, MAX_MESSAGE_CHARS);
        if chunks.is_empty() {
            return Err(ChannelError::DeliveryFailed {
                chat_id,
                reason: "empty message".into(),
            });
        }
        let last = chunks.len() - 1;
        let mut sent: Vec<SentMessage> = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let mut part = OutboundMessage {
                keyboard: if i == last { message.keyboard.clone() } else { Vec::new() },
                reply_to: sent.last().map(|s| s.msg_id).or(message.reply_to),
                ..message.clone()
            };
            part.text.clear();
            sent.push(self.send_one(chat_id, chunk, &part).await?);
        }
        Ok(sent)
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        msg_id: MsgId,
        message: &OutboundMessage,
    ) -> Result<(), ChannelError> {
        let mut body = match &message.photo_url {
            Some(url) => {
                let mut media = serde_json::json!({ "type": "photo", "media": url });
                if !message.text.is_empty() {
                    media["caption"] = truncate_chars(&message.text, MAX_CAPTION_CHARS).into();
                    if message.html {
                        media["parse_mode"] = "HTML".into();
                    }
                }
                serde_json::json!({ "chat_id": chat_id, "message_id": msg_id, "media": media })
            }
            None => {
                let mut body = serde_json::json!({
                    "chat_id": chat_id,
                    "message_id": msg_id,
                    "text": truncate_chars(&message.text, MAX_MESSAGE_CHARS),
                });
                if message.html {
                    body["parse_mode"] = "HTML".into();
                }
                body
            }
        };
        if !message.keyboard.is_empty() {
            body["reply_markup"] = keyboard_markup(&message.keyboard);
        }

        let method = if message.photo_url.is_some() {
            "editMessageMedia"
        } else {
            "editMessageText"
        };
        // Both methods return the edited message (or `true` for inline ones).
        let _: serde_json::Value = self.call(method, &body).await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "sendChatAction",
                &serde_json::json!({ "chat_id": chat_id, "action": "typing" }),
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = text.into();
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    fn is_allowed(&self, chat_id: ChatId) -> bool {
        if self.config.allowed_chats.is_empty() {
            return false;
        }
        if self.config.allowed_chats.iter().any(|c| c == "*") {
            return true;
        }
        let id = chat_id.to_string();
        self.config.allowed_chats.iter().any(|c| *c == id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ImageResolver for TelegramChannel {
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError> {
        let file: TgFile = self
            .call("getFile", &serde_json::json!({ "file_id": reference }))
            .await
            .map_err(|e| ResolveError::ResolutionFailed {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;
        let path = file
            .file_path
            .ok_or_else(|| ResolveError::NotFound(reference.to_string()))?;

        let bytes = self.download(&path).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(format!("data:{};base64,{}", mime_for(&path), encoded))
    }
}

// --- Bot API types ---

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

impl<T> TgResponse<T> {
    fn into_result(self) -> Result<T, ChannelError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(ChannelError::InvalidPayload("ok response without result".into())),
            (false, _) => Err(ChannelError::Api {
                code: self.error_code.unwrap_or_default(),
                description: self.description.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TgUpdate {
    pub update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: MsgId,
    date: i64,
    chat: TgChat,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Option<Vec<TgPhotoSize>>,
    #[serde(default)]
    sticker: Option<serde_json::Value>,
    #[serde(default)]
    reply_to_message: Option<Box<TgMessage>>,
}

impl TgMessage {
    fn as_sent(&self) -> SentMessage {
        SentMessage {
            msg_id: self.message_id,
            timestamp: from_unix(self.date),
            text: self
                .text
                .clone()
                .or_else(|| self.caption.clone())
                .unwrap_or_default(),
            reply_to: self.reply_to_message.as_ref().map(|r| r.message_id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: ChatId,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Option<String>,
}

impl TgChat {
    fn kind(&self) -> ChatKind {
        match self.kind.as_str() {
            "private" => ChatKind::Private,
            "supergroup" => ChatKind::Supergroup,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Group,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl TgUser {
    fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    fn to_user(&self) -> User {
        User {
            user_id: self.id,
            username: self.username.clone(),
            display_name: self.display_name(),
            last_expensive_op_at: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgCallbackQuery {
    id: String,
    from: TgUser,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    #[serde(default)]
    file_path: Option<String>,
}
