//! Conversation-context reconstruction.
//!
//! Turns the flat chat log into the ordered, noise-filtered, multimodal
//! payload handed to the model.
//!
//! # Pipeline
//!
//! | Step | Module | Output |
//! |------|--------|--------|
//! | 1. Retrieve | [`thread`] or [`focused`] | chronological `ResolvedTurn`s |
//! | 2. Filter | [`filter`] | operator traffic removed |
//! | 3. Assemble | [`assembler`] | `RoleBlock`s, system prompt first |
//!
//! A log failure at step 1 never aborts the interaction: the trigger turn
//! alone is assembled and the result is marked [`ContextMode::Degraded`].

pub mod assembler;
pub mod filter;
pub mod focused;
pub mod thread;

pub use assembler::ContextAssembler;

use chatterbox_config::{HistoryConfig, StrategyKind};
use chatterbox_core::chat::ChatConfig;
use chatterbox_core::error::StoreError;
use chatterbox_core::identity::AssistantIdentity;
use chatterbox_core::message::{ResolvedTurn, RoleBlock};
use chatterbox_core::resolver::ImageResolver;
use chatterbox_core::store::MessageLog;
use tracing::{debug, warn};

/// How history is retrieved for one interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStrategy {
    /// Follow the reply chain of the trigger message.
    Thread { max_depth: usize },
    /// Recent assistant turns plus human turns addressed to the assistant.
    Focused {
        from_assistant: usize,
        to_assistant: usize,
    },
}

impl HistoryStrategy {
    /// Pick the strategy for a trigger message. `auto` follows the thread
    /// when the trigger is a reply.
    pub fn for_trigger(config: &HistoryConfig, is_reply: bool) -> Self {
        let thread = Self::Thread {
            max_depth: config.max_depth,
        };
        let focused = Self::Focused {
            from_assistant: config.from_assistant,
            to_assistant: config.to_assistant,
        };
        match config.strategy {
            StrategyKind::Thread => thread,
            StrategyKind::Focused => focused,
            StrategyKind::Auto if is_reply => thread,
            StrategyKind::Auto => focused,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Thread { .. } => "thread",
            Self::Focused { .. } => "focused",
        }
    }
}

/// Whether the full history made it into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Full,
    /// The log failed; only the trigger turn was used.
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltContext {
    pub blocks: Vec<RoleBlock>,
    pub mode: ContextMode,
}

/// Everything context building reads about one chat.
pub struct ChatContext<'a> {
    pub store: &'a dyn MessageLog,
    pub assistant: &'a AssistantIdentity,
    pub chat: &'a ChatConfig,
}

impl<'a> ChatContext<'a> {
    pub fn new(
        store: &'a dyn MessageLog,
        assistant: &'a AssistantIdentity,
        chat: &'a ChatConfig,
    ) -> Self {
        Self {
            store,
            assistant,
            chat,
        }
    }

    /// Build the model payload for `trigger`, which is always part of it.
    pub async fn build(
        &self,
        trigger: &ResolvedTurn,
        strategy: HistoryStrategy,
        resolver: &dyn ImageResolver,
    ) -> BuiltContext {
        let assembler = ContextAssembler::new(resolver);
        let system_prompt = self.chat.system_prompt.as_deref();

        match self.retrieve(trigger, strategy).await {
            Ok(turns) => {
                debug!(
                    chat_id = self.chat.chat_id,
                    msg_id = trigger.msg_id,
                    strategy = strategy.name(),
                    turns = turns.len(),
                    "Built conversation context"
                );
                BuiltContext {
                    blocks: assembler
                        .assemble(&turns, self.assistant.id, system_prompt)
                        .await,
                    mode: ContextMode::Full,
                }
            }
            Err(e) => {
                warn!(
                    chat_id = self.chat.chat_id,
                    msg_id = trigger.msg_id,
                    strategy = strategy.name(),
                    error = %e,
                    "History unavailable, using the trigger message only"
                );
                BuiltContext {
                    blocks: assembler
                        .assemble(std::slice::from_ref(trigger), self.assistant.id, system_prompt)
                        .await,
                    mode: ContextMode::Degraded,
                }
            }
        }
    }

    async fn retrieve(
        &self,
        trigger: &ResolvedTurn,
        strategy: HistoryStrategy,
    ) -> Result<Vec<ResolvedTurn>, StoreError> {
        let chat_id = self.chat.chat_id;
        let assistant_id = self.assistant.id;

        let mut turns = match strategy {
            HistoryStrategy::Thread { max_depth } => {
                thread::resolve(self.store, chat_id, trigger.msg_id, max_depth).await?
            }
            HistoryStrategy::Focused {
                from_assistant,
                to_assistant,
            } => {
                focused::select(self.store, chat_id, assistant_id, from_assistant, to_assistant)
                    .await?
            }
        };

        turns.retain(|t| t.msg_id == trigger.msg_id || filter::include(t, assistant_id));
        if !turns.iter().any(|t| t.msg_id == trigger.msg_id) {
            turns.push(trigger.clone());
            chatterbox_core::message::sort_chronologically(&mut turns);
        }
        Ok(turns)
    }
}
