//! Error types for the Chatterbox domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; callers match on the enum to
//! decide between degrading, notifying the user, or aborting.

use thiserror::Error;

/// The top-level error type for all Chatterbox operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Message log errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Model inference errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Chat transport errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Image resolution errors ---
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    // --- Paginated session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Resource search errors ---
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the persisted message log.
///
/// Context building treats every variant as "degrade to minimal context".
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Message log unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Failures of the model inference call. Terminal for the interaction.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty completion: {0}")]
    EmptyCompletion(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {chat_id}: {reason}")]
    DeliveryFailed { chat_id: i64, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid update payload: {0}")]
    InvalidPayload(String),

    #[error("Platform API error {code}: {description}")]
    Api { code: i64, description: String },
}

/// A single image reference could not be turned into a fetchable URI.
///
/// Never aborts context assembly: the image part is dropped.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Resource resolution failed for {reference}: {reason}")]
    ResolutionFailed { reference: String, reason: String },

    #[error("Resource not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session expired or unknown: {0}")]
    Expired(String),

    #[error("Cannot create a session without resources")]
    Empty,
}

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search not configured: {0}")]
    NotConfigured(String),

    #[error("Search request failed: {0}")]
    Failed(String),

    #[error("Search rate limited")]
    RateLimited,
}
