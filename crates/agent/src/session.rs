//! Search sessions — paginated browsing of externally fetched resources.
//!
//! Sessions live only in process memory, in a bounded LRU cache. An entry
//! expires `ttl` after it was last touched; expired entries are dropped when
//! accessed and by [`SessionStore::evict_expired`].

use std::num::NonZeroUsize;
use std::time::Duration;

use chatterbox_config::SessionConfig;
use chatterbox_core::error::SessionError;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// One page of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPage {
    pub resource_uri: String,
    /// Clamped index actually shown
    pub index: usize,
    pub total: usize,
}

#[derive(Debug)]
struct SearchSession {
    resource_uris: Vec<String>,
    created_at: Instant,
    touched_at: Instant,
}

pub struct SessionStore {
    cache: Mutex<LruCache<String, SearchSession>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self::new(capacity, Duration::from_secs(config.ttl_secs))
    }

    /// Store `resource_uris` under a fresh opaque token.
    pub async fn create(&self, resource_uris: Vec<String>) -> Result<String, SessionError> {
        if resource_uris.is_empty() {
            return Err(SessionError::Empty);
        }
        let id = Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let total = resource_uris.len();

        let mut cache = self.cache.lock().await;
        if let Some((evicted, _)) = cache.push(
            id.clone(),
            SearchSession {
                resource_uris,
                created_at: now,
                touched_at: now,
            },
        ) {
            debug!(session = %evicted, "Session evicted at capacity");
        }
        debug!(session = %id, total, "Session created");
        Ok(id)
    }

    /// Fetch the resource at `requested_index`, clamped into range.
    pub async fn navigate(
        &self,
        session_id: &str,
        requested_index: i64,
    ) -> Result<SessionPage, SessionError> {
        let now = Instant::now();
        let mut cache = self.cache.lock().await;

        let expired = match cache.peek(session_id) {
            None => return Err(SessionError::Expired(session_id.to_string())),
            Some(session) => now.duration_since(session.touched_at) >= self.ttl,
        };
        if expired {
            cache.pop(session_id);
            debug!(session = %session_id, "Session expired on access");
            return Err(SessionError::Expired(session_id.to_string()));
        }

        let Some(session) = cache.get_mut(session_id) else {
            return Err(SessionError::Expired(session_id.to_string()));
        };
        session.touched_at = now;

        let total = session.resource_uris.len();
        let index = requested_index.clamp(0, total as i64 - 1) as usize;
        Ok(SessionPage {
            resource_uri: session.resource_uris[index].clone(),
            index,
            total,
        })
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.lock().await;
        let stale: Vec<String> = cache
            .iter()
            .filter(|(_, s)| now.duration_since(s.touched_at) >= self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(session) = cache.pop(id) {
                debug!(
                    session = %id,
                    age_secs = now.duration_since(session.created_at).as_secs(),
                    "Session swept"
                );
            }
        }
        stale.len()
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}
