//! In-memory message log — useful for testing and ephemeral runs.

use async_trait::async_trait;
use chatterbox_core::chat::{AuthorStats, ChatActivity, ChatSettings, KindCount, User};
use chatterbox_core::error::StoreError;
use chatterbox_core::message::{ChatId, ChatMessage, LogRow, MessageKind, MsgId, UserId};
use chatterbox_core::store::{HistoryPage, MessageLog};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    messages: HashMap<(ChatId, MsgId), ChatMessage>,
    users: HashMap<UserId, User>,
    chats: HashMap<ChatId, ChatSettings>,
    hidden: HashSet<(ChatId, UserId)>,
}

impl State {
    fn row(&self, message: &ChatMessage) -> LogRow {
        LogRow {
            author_name: self
                .users
                .get(&message.author_id)
                .map(|u| u.display_name.clone()),
            parent_author_id: message
                .reply_to
                .and_then(|p| self.messages.get(&(message.chat_id, p)))
                .map(|p| p.author_id),
            message: message.clone(),
        }
    }

    fn has_text(message: &ChatMessage) -> bool {
        message.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn display_name(&self, user_id: UserId) -> String {
        self.users
            .get(&user_id)
            .map(|u| u.display_name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }

    /// Per-author counts, most active first.
    fn rank(&self, counts: HashMap<UserId, u64>, limit: usize) -> Vec<AuthorStats> {
        let mut stats: Vec<AuthorStats> = counts
            .into_iter()
            .map(|(user_id, message_count)| AuthorStats {
                user_id,
                display_name: self.display_name(user_id),
                message_count,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.message_count
                .cmp(&a.message_count)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        stats.truncate(limit);
        stats
    }

    /// Messages of one chat, newest first.
    fn chat_messages(&self, chat_id: ChatId) -> Vec<&ChatMessage> {
        let mut messages: Vec<&ChatMessage> = self
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .collect();
        messages.sort_by(|a, b| (b.timestamp, b.msg_id).cmp(&(a.timestamp, a.msg_id)));
        messages
    }
}

/// A message log held entirely in process memory.
///
/// [`InMemoryLog::set_unavailable`] makes every call fail with
/// `StoreError::Unavailable`, which lets callers exercise degraded paths.
#[derive(Default)]
pub struct InMemoryLog {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory log switched off".into()))
        } else {
            Ok(())
        }
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        let key = (message.chat_id, message.msg_id);
        if state.messages.contains_key(&key) {
            return Ok(false);
        }
        state.messages.insert(key, message.clone());
        Ok(true)
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        state
            .users
            .entry(user.user_id)
            .and_modify(|u| {
                u.display_name = user.display_name.clone();
                u.username = user.username.clone();
            })
            .or_insert_with(|| user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        self.check()?;
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn get(&self, chat_id: ChatId, msg_id: MsgId) -> Result<Option<LogRow>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.messages.get(&(chat_id, msg_id)).map(|m| state.row(m)))
    }

    async fn recent(&self, page: &HistoryPage) -> Result<Vec<LogRow>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .chat_messages(page.chat_id)
            .into_iter()
            .filter(|m| page.author.matches(m.author_id))
            .filter(|m| page.before.is_none_or(|c| c.admits(m)))
            .filter(|m| !page.text_only || State::has_text(m))
            .take(page.limit)
            .map(|m| state.row(m))
            .collect())
    }

    async fn chat_settings(&self, chat_id: ChatId) -> Result<Option<ChatSettings>, StoreError> {
        self.check()?;
        Ok(self.state.read().await.chats.get(&chat_id).cloned())
    }

    async fn set_system_prompt(
        &self,
        chat_id: ChatId,
        prompt: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.chats.entry(chat_id).or_default().system_prompt = prompt.map(str::to_string);
        Ok(())
    }

    async fn set_temperature(&self, chat_id: ChatId, temperature: f32) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.chats.entry(chat_id).or_default().temperature = Some(temperature);
        Ok(())
    }

    async fn set_model(&self, chat_id: ChatId, model: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        state.chats.entry(chat_id).or_default().model_name = Some(model.to_string());
        Ok(())
    }

    async fn toggle_visibility(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.hidden.remove(&(chat_id, user_id)) {
            Ok(false)
        } else {
            state.hidden.insert((chat_id, user_id));
            Ok(true)
        }
    }

    async fn chat_members(&self, chat_id: ChatId) -> Result<Vec<User>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let authors: HashSet<UserId> = state
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.author_id)
            .filter(|id| !state.hidden.contains(&(chat_id, *id)))
            .collect();
        let mut members: Vec<User> = authors
            .into_iter()
            .filter_map(|id| state.users.get(&id).cloned())
            .collect();
        members.sort_by_key(|u| u.user_id);
        Ok(members)
    }

    async fn top_authors(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> Result<Vec<AuthorStats>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut counts: HashMap<UserId, u64> = HashMap::new();
        for m in state.messages.values() {
            if m.chat_id == chat_id && State::has_text(m) {
                *counts.entry(m.author_id).or_default() += 1;
            }
        }
        Ok(state.rank(counts, limit))
    }

    async fn activity(
        &self,
        chat_id: ChatId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<ChatActivity, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut counts: HashMap<UserId, u64> = HashMap::new();
        let mut total = 0;
        for m in state.messages.values() {
            if m.chat_id == chat_id && since.is_none_or(|s| m.timestamp >= s) {
                *counts.entry(m.author_id).or_default() += 1;
                total += 1;
            }
        }
        Ok(ChatActivity {
            total,
            top: state.rank(counts, limit),
        })
    }

    async fn kind_counts(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<KindCount>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        let mut counts: HashMap<MessageKind, u64> = HashMap::new();
        for m in state.messages.values() {
            if m.chat_id == chat_id
                && m.author_id == user_id
                && since.is_none_or(|s| m.timestamp >= s)
            {
                *counts.entry(m.kind).or_default() += 1;
            }
        }
        let mut kinds: Vec<KindCount> = counts
            .into_iter()
            .map(|(kind, count)| KindCount { kind, count })
            .collect();
        kinds.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
        });
        Ok(kinds)
    }

    async fn author_texts(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .chat_messages(chat_id)
            .into_iter()
            .filter(|m| m.author_id == user_id)
            .filter_map(|m| m.text.clone())
            .filter(|t| !t.trim().is_empty())
            .take(limit)
            .collect())
    }
}
