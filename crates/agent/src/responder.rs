//! The responder — dispatches inbound updates.
//!
//! Every inbound message is logged first. Commands then run against the log
//! and the chat settings; anything addressed to the assistant builds a
//! context and goes to the model. Replies from the model are sent as
//! replies and logged, so later context can see them. Bookkeeping replies
//! are never logged.

use std::sync::Arc;
use std::time::Duration;

use chatterbox_config::{AppConfig, HistoryConfig};
use chatterbox_core::channel::{
    Button, CallbackQuery, Channel, InboundMessage, OutboundMessage, SentMessage, Update,
};
use chatterbox_core::chat::{ChatConfig, KindCount, StatsPeriod, User, escape_html};
use chatterbox_core::cooldown::{CooldownDecision, CooldownTracker, OperationKind, format_wait};
use chatterbox_core::error::{ProviderError, Result, SessionError, StoreError};
use chatterbox_core::identity::AssistantIdentity;
use chatterbox_core::message::{
    ChatId, ChatMessage, MessageKind, MsgId, ResolvedTurn, RoleBlock, UserId,
};
use chatterbox_core::provider::{Provider, ProviderRequest, ProviderResponse};
use chatterbox_core::resolver::{ImageResolver, PassthroughResolver};
use chatterbox_core::search::ResourceSearch;
use chatterbox_core::store::MessageLog;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::commands::{ANALYZE_COUNTS, CallbackAction, Command, StatsScope, mentions};
use crate::context::{ChatContext, HistoryStrategy};
use crate::session::SessionStore;

/// Authors offered by the analysis menu.
const ANALYZE_MENU_SIZE: usize = 20;

/// Authors in the whole-chat statistics.
const STATS_TOP: usize = 5;

/// Members offered by the per-member statistics list.
const STATS_MEMBERS: usize = 20;

const LOG_UNAVAILABLE: &str = "⚠️ The chat log is unavailable, try again later.";

const ANALYSIS_TEMPERATURE: f32 = 0.7;

const ANALYSIS_SYSTEM_PROMPT: &str = "You are an experienced psychoanalyst.";

const HELP_TEXT: &str = "🤖 <b>Commands</b>\n\
💬 <b>!text</b> ask the model (or reply to me)\n\
🧠 <b>!system</b> [prompt], <b>!clearsystem</b> persona\n\
🌡 <b>!temp</b> [0.0-2.0] temperature\n\
🤖 <b>!models</b>, <b>!model</b> [name] model\n\
🧹 <b>!forget</b> refresh context\n\
🕵️ <b>!analyze</b> psychological portrait\n\
🖼 <b>!img</b> query image search\n\
📊 <b>!stats</b> chat activity\n\
📢 <b>!here</b> call everyone, <b>!hideme</b> opt out";

/// Knobs the responder reads from application config.
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub default_model: String,
    pub default_temperature: f32,
    pub request_timeout: Duration,
    pub history: HistoryConfig,
    pub analyze_cooldown: chrono::Duration,
    pub image_search_cooldown: chrono::Duration,
    pub max_search_results: usize,
    pub admin_id: Option<UserId>,
    pub broadcast_chat_id: Option<ChatId>,
}

impl ResponderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_model: config.default_model.clone(),
            default_temperature: config.default_temperature,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            history: config.history.clone(),
            analyze_cooldown: secs(config.cooldown.analyze_secs),
            image_search_cooldown: secs(config.cooldown.image_search_secs),
            max_search_results: config.search.max_results,
            admin_id: config.admin_id,
            broadcast_chat_id: config.broadcast_chat_id,
        }
    }
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Cooldown periods are capped at `u32::MAX` seconds so timestamp math
/// cannot overflow.
fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(u64::from(u32::MAX)) as i64)
}

pub struct Responder {
    store: Arc<dyn MessageLog>,
    channel: Arc<dyn Channel>,
    provider: Arc<dyn Provider>,
    cooldowns: Arc<dyn CooldownTracker>,
    resolver: Arc<dyn ImageResolver>,
    search: Option<Arc<dyn ResourceSearch>>,
    sessions: Arc<SessionStore>,
    assistant: AssistantIdentity,
    settings: ResponderSettings,
}

impl Responder {
    pub fn new(
        store: Arc<dyn MessageLog>,
        channel: Arc<dyn Channel>,
        provider: Arc<dyn Provider>,
        cooldowns: Arc<dyn CooldownTracker>,
        assistant: AssistantIdentity,
        settings: ResponderSettings,
    ) -> Self {
        let sessions = Arc::new(SessionStore::from_config(&Default::default()));
        Self {
            store,
            channel,
            provider,
            cooldowns,
            resolver: Arc::new(PassthroughResolver),
            search: None,
            sessions,
            assistant,
            settings,
        }
    }

    /// Resolve photo references through `resolver` instead of passing URLs through.
    pub fn with_resolver(mut self, resolver: Arc<dyn ImageResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enable `!img`.
    pub fn with_search(mut self, search: Arc<dyn ResourceSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one inbound update to completion.
    pub async fn handle(&self, update: Update) -> Result<()> {
        match update {
            Update::Message(message) => self.on_message(message).await,
            Update::Callback(query) => self.on_callback(query).await,
        }
    }

    // ── Messages ────────────────────────────────────────────────────────

    async fn on_message(&self, msg: InboundMessage) -> Result<()> {
        let command = self.classify(&msg);

        if !self.channel.is_allowed(msg.chat_id) {
            if let Some(Command::Say(text)) = &command {
                if self.is_admin_dm(&msg) {
                    return self.relay(text).await;
                }
            }
            debug!(chat_id = msg.chat_id, "Ignoring update from chat outside the allowlist");
            return Ok(());
        }

        self.log_inbound(&msg).await;

        let Some(command) = command else {
            return Ok(());
        };
        info!(
            chat_id = msg.chat_id,
            msg_id = msg.msg_id,
            user_id = msg.from.user_id,
            command = command.name(),
            "Handling command"
        );

        match command {
            Command::Help => self.say_html(&msg, HELP_TEXT).await,
            Command::System(prompt) => self.system_prompt(&msg, prompt).await,
            Command::ClearSystem => {
                self.store.set_system_prompt(msg.chat_id, None).await?;
                self.say_html(&msg, "🔄 <b>System prompt cleared.</b>").await
            }
            Command::Temp(value) => self.temperature(&msg, value).await,
            Command::Models => self.list_models(&msg).await,
            Command::Model(name) => self.model(&msg, name).await,
            Command::Forget => {
                self.say_html(
                    &msg,
                    "🧹 <b>Context refreshed.</b> Configuration chatter never reaches my memory, so just ask again.",
                )
                .await
            }
            Command::Analyze => self.analyze_menu(&msg).await,
            Command::Stats => {
                self.channel.send(msg.chat_id, &stats_menu()).await?;
                Ok(())
            }
            Command::Img(query) => self.image_search(&msg, query).await,
            Command::Here => self.call_everyone(&msg).await,
            Command::HideMe => self.hide_me(&msg).await,
            Command::Say(text) => {
                if self.is_admin_dm(&msg) {
                    self.relay(&text).await
                } else {
                    Ok(())
                }
            }
            Command::Prompt(_) => self.answer(&msg).await,
        }
    }

    /// A `!` command, or a prompt when the message replies to or mentions
    /// the assistant.
    fn classify(&self, msg: &InboundMessage) -> Option<Command> {
        let text = msg.text.as_deref().unwrap_or_default();
        if let Some(command) = Command::parse(text) {
            return Some(command);
        }
        let replied = msg
            .reply_to_author
            .is_some_and(|author| self.assistant.is_assistant(author));
        let mentioned = self
            .assistant
            .username
            .as_deref()
            .is_some_and(|username| mentions(text, username));
        let has_content = !text.trim().is_empty() || msg.photo_ref.is_some();
        ((replied || mentioned) && has_content).then(|| Command::Prompt(text.trim().to_string()))
    }

    fn is_admin_dm(&self, msg: &InboundMessage) -> bool {
        msg.chat_kind.is_private() && self.settings.admin_id == Some(msg.from.user_id)
    }

    /// Log the sender and the message. A log failure only costs history.
    async fn log_inbound(&self, msg: &InboundMessage) {
        if let Err(e) = self.store.upsert_user(&msg.from).await {
            warn!(user_id = msg.from.user_id, error = %e, "Failed to record user");
        }
        if let Err(e) = self.store.insert_message(&msg.to_chat_message()).await {
            warn!(chat_id = msg.chat_id, msg_id = msg.msg_id, error = %e, "Failed to log message");
        }
    }

    async fn say_html(&self, msg: &InboundMessage, html: &str) -> Result<()> {
        self.channel
            .send(msg.chat_id, &OutboundMessage::html(html))
            .await?;
        Ok(())
    }

    /// Effective settings of a chat; defaults when the log is unreadable.
    async fn chat_config(&self, chat_id: ChatId) -> ChatConfig {
        let settings = match self.store.chat_settings(chat_id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(chat_id, error = %e, "Chat settings unavailable, using defaults");
                None
            }
        };
        ChatConfig::resolve(
            chat_id,
            settings,
            &self.settings.default_model,
            self.settings.default_temperature,
        )
    }

    async fn system_prompt(&self, msg: &InboundMessage, prompt: Option<String>) -> Result<()> {
        match prompt {
            None => {
                let config = self.chat_config(msg.chat_id).await;
                let shown = config
                    .system_prompt
                    .as_deref()
                    .map(escape_html)
                    .unwrap_or_else(|| "(empty, model default)".into());
                self.say_html(msg, &format!("🧠 <b>System prompt:</b>\n<code>{shown}</code>"))
                    .await
            }
            Some(prompt) => {
                self.store
                    .set_system_prompt(msg.chat_id, Some(&prompt))
                    .await?;
                self.say_html(
                    msg,
                    &format!("✅ <b>New persona:</b> {}", escape_html(&prompt)),
                )
                .await
            }
        }
    }

    async fn temperature(&self, msg: &InboundMessage, value: Option<String>) -> Result<()> {
        let Some(value) = value else {
            let config = self.chat_config(msg.chat_id).await;
            return self
                .say_html(
                    msg,
                    &format!("🌡 <b>Current temperature:</b> {}", config.temperature),
                )
                .await;
        };

        let Ok(temperature) = value.replace(',', ".").parse::<f32>() else {
            return self.say_html(msg, "❌ Send a number, for example 0.7.").await;
        };
        if !(0.0..=2.0).contains(&temperature) {
            return self
                .say_html(msg, "❌ Temperature must be between 0.0 and 2.0.")
                .await;
        }
        self.store.set_temperature(msg.chat_id, temperature).await?;
        self.say_html(msg, &format!("🌡 <b>Temperature set:</b> {temperature}"))
            .await
    }

    async fn list_models(&self, msg: &InboundMessage) -> Result<()> {
        let config = self.chat_config(msg.chat_id).await;
        match self.provider.list_models().await {
            Ok(models) if !models.is_empty() => {
                let list = models
                    .iter()
                    .take(50)
                    .map(|m| format!("<code>{}</code>", escape_html(m)))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.say_html(
                    msg,
                    &format!(
                        "🧠 <b>Current model:</b> <code>{}</code>\n\n{list}",
                        escape_html(&config.model_name)
                    ),
                )
                .await
            }
            Ok(_) => self.say_html(msg, "❌ The provider lists no models.").await,
            Err(e) => {
                warn!(chat_id = msg.chat_id, error = %e, "Model listing failed");
                self.say_html(msg, &format!("⚠️ Could not list models: {}", escape_html(&e.to_string())))
                    .await
            }
        }
    }

    async fn model(&self, msg: &InboundMessage, name: Option<String>) -> Result<()> {
        match name {
            None => {
                let config = self.chat_config(msg.chat_id).await;
                self.say_html(
                    msg,
                    &format!(
                        "🧠 <b>Current model:</b> <code>{}</code>",
                        escape_html(&config.model_name)
                    ),
                )
                .await
            }
            Some(name) => {
                self.store.set_model(msg.chat_id, &name).await?;
                self.say_html(
                    msg,
                    &format!("✅ <b>Model set:</b> <code>{}</code>", escape_html(&name)),
                )
                .await
            }
        }
    }

    async fn call_everyone(&self, msg: &InboundMessage) -> Result<()> {
        let members = self.store.chat_members(msg.chat_id).await?;
        let mentions: Vec<String> = members
            .iter()
            .filter(|m| !self.assistant.is_assistant(m.user_id))
            .map(User::mention_html)
            .collect();
        if mentions.is_empty() {
            return Ok(());
        }
        self.say_html(msg, &format!("📢 <b>Everyone!</b>\n\n{}", mentions.join(" ")))
            .await
    }

    async fn hide_me(&self, msg: &InboundMessage) -> Result<()> {
        let hidden = self
            .store
            .toggle_visibility(msg.chat_id, msg.from.user_id)
            .await?;
        let text = if hidden {
            format!("🙈 {} will no longer be called by !here.", msg.from.mention_html())
        } else {
            format!("👀 {} is back on the !here list.", msg.from.mention_html())
        };
        self.say_html(msg, &text).await
    }

    async fn relay(&self, text: &str) -> Result<()> {
        let Some(target) = self.settings.broadcast_chat_id else {
            warn!("!say used without broadcast_chat_id configured");
            return Ok(());
        };
        if text.is_empty() {
            return Ok(());
        }
        self.channel
            .send(target, &OutboundMessage::plain(text))
            .await?;
        info!(chat_id = target, "Relayed admin message");
        Ok(())
    }

    // ── Model replies ───────────────────────────────────────────────────

    async fn answer(&self, msg: &InboundMessage) -> Result<()> {
        if let Err(e) = self.channel.send_typing(msg.chat_id).await {
            debug!(chat_id = msg.chat_id, error = %e, "Typing indicator failed");
        }

        let config = self.chat_config(msg.chat_id).await;
        let trigger = ResolvedTurn {
            msg_id: msg.msg_id,
            author_id: msg.from.user_id,
            author_name: Some(msg.from.display_name.clone()),
            timestamp: msg.timestamp,
            text: msg.text.clone(),
            image_ref: msg.photo_ref.clone(),
        };
        let strategy = HistoryStrategy::for_trigger(&self.settings.history, msg.reply_to.is_some());
        let context = ChatContext::new(self.store.as_ref(), &self.assistant, &config)
            .build(&trigger, strategy, self.resolver.as_ref())
            .await;

        let request = ProviderRequest::new(&config.model_name, context.blocks, config.temperature);
        match self.complete(request).await {
            Ok(response) => {
                let reply = OutboundMessage::plain(&response.text).replying_to(msg.msg_id);
                let sent = self.channel.send(msg.chat_id, &reply).await?;
                self.log_reply(msg.chat_id, msg.msg_id, &sent).await;
                info!(
                    chat_id = msg.chat_id,
                    msg_id = ?sent.first().map(|s| s.msg_id),
                    parts = sent.len(),
                    model = %response.model,
                    mode = ?context.mode,
                    "Sent model reply"
                );
                Ok(())
            }
            Err(e) => {
                error!(chat_id = msg.chat_id, msg_id = msg.msg_id, error = %e, "Inference failed");
                let notice = OutboundMessage::plain(format!("⚠️ Something went wrong with the model: {e}"))
                    .replying_to(msg.msg_id);
                self.channel.send(msg.chat_id, &notice).await?;
                Ok(())
            }
        }
    }

    /// One bounded model call. Never retried.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let timeout = self.settings.request_timeout;
        match tokio::time::timeout(timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Log every delivered part of a model reply. Parts are chained so a
    /// reply to any of them walks back through the rest to the trigger.
    async fn log_reply(&self, chat_id: ChatId, trigger: MsgId, sent: &[SentMessage]) {
        let mut user = User::new(self.assistant.id, &self.assistant.name);
        user.username = self.assistant.username.clone();
        if let Err(e) = self.store.upsert_user(&user).await {
            warn!(error = %e, "Failed to record assistant user");
        }

        let mut parent = trigger;
        for part in sent {
            let message = ChatMessage {
                chat_id,
                msg_id: part.msg_id,
                author_id: self.assistant.id,
                timestamp: part.timestamp,
                kind: MessageKind::Text,
                text: Some(part.text.clone()),
                photo_ref: None,
                reply_to: Some(part.reply_to.unwrap_or(parent)),
            };
            if let Err(e) = self.store.insert_message(&message).await {
                warn!(chat_id, msg_id = part.msg_id, error = %e, "Failed to log assistant reply");
            }
            parent = part.msg_id;
        }
    }

    // ── Analysis ────────────────────────────────────────────────────────

    async fn analyze_menu(&self, msg: &InboundMessage) -> Result<()> {
        let authors = self
            .store
            .top_authors(msg.chat_id, ANALYZE_MENU_SIZE)
            .await?;
        let buttons: Vec<Button> = authors
            .into_iter()
            .filter(|a| !self.assistant.is_assistant(a.user_id))
            .map(|a| {
                Button::new(
                    a.display_name,
                    CallbackAction::AnalyzeSelect { user_id: a.user_id }.encode(),
                )
            })
            .collect();
        if buttons.is_empty() {
            return self.say_html(msg, "❌ No text messages yet.").await;
        }

        let keyboard = buttons.chunks(2).map(<[Button]>::to_vec).collect();
        self.channel
            .send(
                msg.chat_id,
                &OutboundMessage::html("🕵️ <b>Who should I analyze?</b>").with_keyboard(keyboard),
            )
            .await?;
        Ok(())
    }

    async fn on_callback(&self, query: CallbackQuery) -> Result<()> {
        if !self.channel.is_allowed(query.chat_id) {
            self.channel.answer_callback(&query.id, None).await?;
            return Ok(());
        }
        let Some(action) = CallbackAction::parse(&query.data) else {
            debug!(data = %query.data, "Unknown callback data");
            self.channel.answer_callback(&query.id, None).await?;
            return Ok(());
        };
        debug!(chat_id = query.chat_id, user_id = query.from.user_id, ?action, "Handling callback");

        match action {
            CallbackAction::AnalyzeSelect { user_id } => {
                self.channel.answer_callback(&query.id, None).await?;
                let row = ANALYZE_COUNTS
                    .iter()
                    .map(|&count| {
                        Button::new(
                            format!("📝 {count}"),
                            CallbackAction::AnalyzeRun { user_id, count }.encode(),
                        )
                    })
                    .collect();
                self.edit_origin(
                    &query,
                    OutboundMessage::html("🔢 <b>How many messages?</b>").with_keyboard(vec![row]),
                )
                .await
            }
            CallbackAction::AnalyzeRun { user_id, count } => {
                self.run_analysis(&query, user_id, count).await
            }
            CallbackAction::ImagePage { session_id, index } => {
                self.show_image_page(&query, &session_id, index).await
            }
            CallbackAction::StatsMenu => {
                self.channel.answer_callback(&query.id, None).await?;
                self.edit_origin(&query, stats_menu()).await
            }
            CallbackAction::StatsPeriods { scope } => {
                self.channel.answer_callback(&query.id, None).await?;
                self.edit_origin(&query, period_menu(scope)).await
            }
            CallbackAction::StatsGroup { period } => self.group_stats(&query, period).await,
            CallbackAction::StatsMembers { period } => self.member_list(&query, period).await,
            CallbackAction::StatsMember { user_id, period } => {
                self.member_stats(&query, user_id, period).await
            }
            CallbackAction::Noop => {
                self.channel.answer_callback(&query.id, None).await?;
                Ok(())
            }
        }
    }

    /// Replace a menu with a notice after a log read failed.
    async fn log_failed(
        &self,
        query: &CallbackQuery,
        what: &str,
        error: StoreError,
    ) -> Result<()> {
        warn!(chat_id = query.chat_id, error = %error, "{what} failed: chat log unavailable");
        self.edit_origin(query, OutboundMessage::plain(LOG_UNAVAILABLE))
            .await
    }

    /// Gate an expensive operation; a denial is answered with a toast.
    async fn admit(
        &self,
        user_id: UserId,
        operation: OperationKind,
        period: chrono::Duration,
    ) -> Result<CooldownDecision> {
        let decision = self
            .cooldowns
            .check_and_consume(user_id, operation, Utc::now(), period)
            .await?;
        if let CooldownDecision::Denied { remaining } = decision {
            debug!(user_id, operation = operation.as_str(), ?remaining, "Cooldown denied");
        }
        Ok(decision)
    }

    async fn run_analysis(&self, query: &CallbackQuery, user_id: UserId, count: usize) -> Result<()> {
        let decision = match self
            .admit(query.from.user_id, OperationKind::Analyze, self.settings.analyze_cooldown)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(user_id = query.from.user_id, error = %e, "Cooldown check failed");
                self.channel
                    .answer_callback(&query.id, Some(LOG_UNAVAILABLE))
                    .await?;
                return Ok(());
            }
        };
        if let CooldownDecision::Denied { remaining } = decision {
            let toast = format!("⏳ Try again in {}", format_wait(remaining));
            self.channel.answer_callback(&query.id, Some(&toast)).await?;
            return Ok(());
        }
        self.channel.answer_callback(&query.id, None).await?;

        self.edit_origin(query, OutboundMessage::html("⏳ <b>Reading minds...</b>"))
            .await?;

        let (name, texts) = match self.analysis_material(query.chat_id, user_id, count).await {
            Ok(material) => material,
            Err(e) => return self.log_failed(query, "Analysis", e).await,
        };
        if texts.is_empty() {
            self.edit_origin(
                query,
                OutboundMessage::plain("❌ Only pictures and stickers, nothing to read."),
            )
            .await?;
            return Ok(());
        }

        let config = self.chat_config(query.chat_id).await;
        let prompt = format!(
            "Analyze the messages from {name}. Write a psychological portrait and list their favourite words.\n\n{}",
            texts.join("\n")
        );
        let request = ProviderRequest::new(
            &config.model_name,
            vec![RoleBlock::system(ANALYSIS_SYSTEM_PROMPT), RoleBlock::user(prompt)],
            ANALYSIS_TEMPERATURE,
        );

        let result = match self.complete(request).await {
            Ok(response) => format!("🧠 Analysis of {name}:\n\n{}", response.text),
            Err(e) => {
                error!(chat_id = query.chat_id, user_id, error = %e, "Analysis failed");
                format!("⚠️ Model error: {e}")
            }
        };
        self.edit_origin(query, OutboundMessage::plain(result)).await
    }

    /// The author's name and recent texts.
    async fn analysis_material(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        count: usize,
    ) -> std::result::Result<(String, Vec<String>), StoreError> {
        let texts = self.store.author_texts(chat_id, user_id, count).await?;
        let name = match self.store.get_user(user_id).await? {
            Some(user) => user.display_name,
            None => "User".to_string(),
        };
        Ok((name, texts))
    }

    // ── Statistics ──────────────────────────────────────────────────────

    async fn group_stats(&self, query: &CallbackQuery, period: StatsPeriod) -> Result<()> {
        self.channel.answer_callback(&query.id, None).await?;
        let since = period.since(Utc::now());
        let activity = match self.store.activity(query.chat_id, since, STATS_TOP).await {
            Ok(activity) => activity,
            Err(e) => return self.log_failed(query, "Statistics", e).await,
        };

        let mut text = format!(
            "📊 <b>Statistics ({})</b>\n\n💬 Total: <b>{}</b>\n",
            period.label(),
            activity.total
        );
        if !activity.top.is_empty() {
            text.push_str(&format!("\n🏆 <b>Top {STATS_TOP}:</b>\n"));
            for (i, author) in activity.top.iter().enumerate() {
                text.push_str(&format!(
                    "{}. {}: {}\n",
                    i + 1,
                    escape_html(&author.display_name),
                    author.message_count
                ));
            }
        }
        let back = CallbackAction::StatsPeriods {
            scope: StatsScope::Group,
        };
        self.edit_origin(query, OutboundMessage::html(text).with_keyboard(vec![back_row(back)]))
            .await
    }

    async fn member_list(&self, query: &CallbackQuery, period: StatsPeriod) -> Result<()> {
        let since = period.since(Utc::now());
        let activity = match self.store.activity(query.chat_id, since, STATS_MEMBERS).await {
            Ok(activity) => activity,
            Err(e) => {
                self.channel.answer_callback(&query.id, None).await?;
                return self.log_failed(query, "Member statistics", e).await;
            }
        };
        if activity.top.is_empty() {
            self.channel
                .answer_callback(&query.id, Some("Nothing here yet."))
                .await?;
            return Ok(());
        }
        self.channel.answer_callback(&query.id, None).await?;

        let buttons: Vec<Button> = activity
            .top
            .into_iter()
            .map(|a| {
                Button::new(
                    a.display_name,
                    CallbackAction::StatsMember {
                        user_id: a.user_id,
                        period,
                    }
                    .encode(),
                )
            })
            .collect();
        let mut keyboard: Vec<Vec<Button>> = buttons.chunks(2).map(<[Button]>::to_vec).collect();
        keyboard.push(back_row(CallbackAction::StatsPeriods {
            scope: StatsScope::Members,
        }));
        self.edit_origin(
            query,
            OutboundMessage::html(format!("👥 <b>Most active, {}:</b>", period.label()))
                .with_keyboard(keyboard),
        )
        .await
    }

    async fn member_stats(
        &self,
        query: &CallbackQuery,
        user_id: UserId,
        period: StatsPeriod,
    ) -> Result<()> {
        self.channel.answer_callback(&query.id, None).await?;
        let since = period.since(Utc::now());
        let (name, kinds) = match self.member_breakdown(query.chat_id, user_id, since).await {
            Ok(breakdown) => breakdown,
            Err(e) => return self.log_failed(query, "Member statistics", e).await,
        };

        let total: u64 = kinds.iter().map(|k| k.count).sum();
        let mut text = format!(
            "👤 <b>{}</b> ({})\n📨 <b>{total}</b>\n",
            escape_html(&name),
            period.label()
        );
        for k in &kinds {
            text.push_str(&format!("🔹 {}: {}\n", k.kind.as_str(), k.count));
        }
        let back = CallbackAction::StatsMembers { period };
        self.edit_origin(query, OutboundMessage::html(text).with_keyboard(vec![back_row(back)]))
            .await
    }

    async fn member_breakdown(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: Option<chrono::DateTime<Utc>>,
    ) -> std::result::Result<(String, Vec<KindCount>), StoreError> {
        let name = match self.store.get_user(user_id).await? {
            Some(user) => user.display_name,
            None => user_id.to_string(),
        };
        let kinds = self.store.kind_counts(chat_id, user_id, since).await?;
        Ok((name, kinds))
    }

    /// Replace the message whose button was pressed.
    async fn edit_origin(&self, query: &CallbackQuery, message: OutboundMessage) -> Result<()> {
        self.channel
            .edit(query.chat_id, query.msg_id, &message)
            .await?;
        Ok(())
    }

    // ── Image search ────────────────────────────────────────────────────

    async fn image_search(&self, msg: &InboundMessage, query: Option<String>) -> Result<()> {
        let Some(query) = query else {
            return self.say_html(msg, "❌ Usage: !img &lt;query&gt;").await;
        };
        let Some(search) = &self.search else {
            return self.say_html(msg, "❌ Image search is not configured.").await;
        };

        let decision = self
            .admit(
                msg.from.user_id,
                OperationKind::ImageSearch,
                self.settings.image_search_cooldown,
            )
            .await?;
        if let CooldownDecision::Denied { remaining } = decision {
            return self
                .say_html(
                    msg,
                    &format!("⏳ Slow down, try again in {}.", format_wait(remaining)),
                )
                .await;
        }

        let uris = match search.search(&query, self.settings.max_search_results).await {
            Ok(uris) => uris,
            Err(e) => {
                warn!(chat_id = msg.chat_id, error = %e, "Image search failed");
                return self
                    .say_html(msg, &format!("⚠️ Search failed: {}", escape_html(&e.to_string())))
                    .await;
            }
        };

        let session_id = match self.sessions.create(uris).await {
            Ok(id) => id,
            Err(SessionError::Empty) => return self.say_html(msg, "❌ Nothing found.").await,
            Err(e) => return Err(e.into()),
        };
        let page = self.sessions.navigate(&session_id, 0).await?;
        let message = gallery_page(&session_id, &query, page.index, page.total, page.resource_uri)
            .replying_to(msg.msg_id);
        self.channel.send(msg.chat_id, &message).await?;
        Ok(())
    }

    async fn show_image_page(&self, query: &CallbackQuery, session_id: &str, index: i64) -> Result<()> {
        let page = match self.sessions.navigate(session_id, index).await {
            Ok(page) => page,
            Err(SessionError::Expired(_)) => {
                self.channel
                    .answer_callback(&query.id, Some("⌛ This search has expired, run !img again."))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.channel.answer_callback(&query.id, None).await?;
        self.edit_origin(
            query,
            gallery_page(session_id, "", page.index, page.total, page.resource_uri),
        )
        .await
    }
}

/// The `!stats` scope choice.
fn stats_menu() -> OutboundMessage {
    let pick = |label: &str, scope| {
        vec![Button::new(label, CallbackAction::StatsPeriods { scope }.encode())]
    };
    OutboundMessage::html("📊 <b>Whose statistics?</b>").with_keyboard(vec![
        pick("📊 Whole group", StatsScope::Group),
        pick("👤 One member", StatsScope::Members),
    ])
}

fn period_menu(scope: StatsScope) -> OutboundMessage {
    let buttons: Vec<Button> = StatsPeriod::ALL
        .into_iter()
        .map(|period| {
            let action = match scope {
                StatsScope::Group => CallbackAction::StatsGroup { period },
                StatsScope::Members => CallbackAction::StatsMembers { period },
            };
            Button::new(format!("📅 {}", period.label()), action.encode())
        })
        .collect();
    let mut keyboard: Vec<Vec<Button>> = buttons.chunks(2).map(<[Button]>::to_vec).collect();
    keyboard.push(back_row(CallbackAction::StatsMenu));
    OutboundMessage::html("📅 <b>Which period?</b>").with_keyboard(keyboard)
}

fn back_row(action: CallbackAction) -> Vec<Button> {
    vec![Button::new("🔙 Back", action.encode())]
}

/// A photo with ◀ ▶ navigation. Arrows are omitted at the ends.
fn gallery_page(
    session_id: &str,
    title: &str,
    index: usize,
    total: usize,
    uri: String,
) -> OutboundMessage {
    let position = format!("{}/{}", index + 1, total);
    let caption = if title.is_empty() {
        format!("🖼 {position}")
    } else {
        format!("🖼 {title} {position}")
    };

    let page = |i: usize| CallbackAction::ImagePage {
        session_id: session_id.to_string(),
        index: i as i64,
    };
    let mut row = Vec::with_capacity(3);
    if index > 0 {
        row.push(Button::new("◀", page(index - 1).encode()));
    }
    row.push(Button::new(position, CallbackAction::Noop.encode()));
    if index + 1 < total {
        row.push(Button::new("▶", page(index + 1).encode()));
    }

    OutboundMessage::plain(caption)
        .with_photo(uri)
        .with_keyboard(vec![row])
}
