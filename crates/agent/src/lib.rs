//! The Chatterbox responder and its context engine.
//!
//! When a message is addressed to the assistant:
//!
//! 1. **Log** the inbound message (idempotent)
//! 2. **Retrieve** history, by reply thread or focused selection
//! 3. **Filter** operator traffic out of it
//! 4. **Assemble** ordered, role-tagged, multimodal blocks
//! 5. **Send to the model** and reply, logging the reply
//!
//! A log failure during step 2 degrades the context to the trigger message
//! alone; the model is still asked.

pub mod commands;
pub mod context;
pub mod responder;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use commands::{CallbackAction, Command};
pub use context::{BuiltContext, ChatContext, ContextAssembler, ContextMode, HistoryStrategy};
pub use responder::{Responder, ResponderSettings};
pub use session::{SessionPage, SessionStore};
