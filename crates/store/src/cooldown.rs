//! Process-local cooldown tracker.
//!
//! Records live only as long as the process. Use the SQLite tracker when
//! cooldowns must survive restarts.

use async_trait::async_trait;
use chatterbox_core::cooldown::{CooldownDecision, CooldownTracker, OperationKind};
use chatterbox_core::error::StoreError;
use chatterbox_core::message::UserId;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Cooldown records keyed by `(user, operation)` behind one lock.
///
/// The check and the write happen under the same guard, so two concurrent
/// callers for one key are serialised and at most one is allowed per period.
#[derive(Default)]
pub struct InMemoryCooldowns {
    records: std::sync::Mutex<HashMap<(UserId, OperationKind), DateTime<Utc>>>,
}

impl InMemoryCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records whose period has long passed.
    pub fn prune(&self, now: DateTime<Utc>, older_than: Duration) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.retain(|_, last| now - *last < older_than);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CooldownTracker for InMemoryCooldowns {
    async fn check_and_consume(
        &self,
        user_id: UserId,
        operation: OperationKind,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<CooldownDecision, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        let decision = CooldownDecision::evaluate(records.get(&(user_id, operation)).copied(), now, period);
        if decision.is_allowed() {
            records.insert((user_id, operation), now);
        }
        Ok(decision)
    }
}
