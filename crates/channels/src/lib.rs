//! Chat transport implementations for Chatterbox.
//!
//! Available channels:
//! - **Telegram** — Telegram Bot API over long polling; also resolves photo
//!   references for the context assembler

pub mod telegram;

pub use telegram::{TelegramChannel, TelegramConfig};
