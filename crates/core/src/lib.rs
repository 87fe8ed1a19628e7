//! # Chatterbox Core
//!
//! Domain types, traits, and error definitions for the Chatterbox group-chat
//! assistant. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the message log, the chat
//! transport, the model provider, the image resolver and the resource search.
//! Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with in-memory implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod chat;
pub mod identity;
pub mod provider;
pub mod channel;
pub mod store;
pub mod cooldown;
pub mod resolver;
pub mod search;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{
    ChatId, ChatMessage, ContentPart, LogRow, MessageKind, MsgId, ResolvedTurn, Role, RoleBlock,
    UserId,
};
pub use chat::{AuthorStats, ChatActivity, ChatConfig, ChatSettings, KindCount, StatsPeriod, User};
pub use identity::AssistantIdentity;
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use channel::{Button, CallbackQuery, Channel, ChatKind, InboundMessage, OutboundMessage, SentMessage, Update};
pub use store::{AuthorFilter, Cursor, HistoryPage, MessageLog};
pub use cooldown::{CooldownDecision, CooldownTracker, OperationKind};
pub use resolver::{ImageResolver, PassthroughResolver};
pub use search::ResourceSearch;
