//! Message log and cooldown implementations for Chatterbox.

pub mod cooldown;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cooldown::InMemoryCooldowns;
pub use in_memory::InMemoryLog;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLog;
