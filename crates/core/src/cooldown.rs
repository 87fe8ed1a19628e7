//! Cooldown tracking — per-user refractory periods for expensive operations.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::UserId;

/// Which expensive operation is being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Psychological-portrait analysis of a chat member
    Analyze,
    /// External image search
    ImageSearch,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::ImageSearch => "image_search",
        }
    }
}

/// Outcome of a cooldown check. A denial is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    Denied { remaining: Duration },
}

impl CooldownDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Decide from the previous invocation time. `None` means never invoked.
    pub fn evaluate(
        last_invoked_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Self {
        match last_invoked_at {
            Some(last) if now < last + period => Self::Denied {
                remaining: last + period - now,
            },
            _ => Self::Allowed,
        }
    }
}

/// The core CooldownTracker trait.
///
/// `check_and_consume` must be atomic per `(user_id, operation)`: two
/// concurrent calls can never both be `Allowed` inside one period.
#[async_trait]
pub trait CooldownTracker: Send + Sync {
    async fn check_and_consume(
        &self,
        user_id: UserId,
        operation: OperationKind,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<CooldownDecision, StoreError>;
}

/// Human-readable wait, rounded up to whole seconds.
pub fn format_wait(remaining: Duration) -> String {
    let millis = remaining.num_milliseconds().max(0);
    let secs = (millis + 999) / 1000;
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    #[test]
    fn never_invoked_is_allowed() {
        let d = CooldownDecision::evaluate(None, t0(), Duration::seconds(60));
        assert!(d.is_allowed());
    }

    #[test]
    fn inside_period_reports_remaining() {
        let d = CooldownDecision::evaluate(
            Some(t0()),
            t0() + Duration::seconds(30),
            Duration::seconds(60),
        );
        assert_eq!(
            d,
            CooldownDecision::Denied {
                remaining: Duration::seconds(30)
            }
        );
    }

    #[test]
    fn period_boundary_is_allowed() {
        let d = CooldownDecision::evaluate(
            Some(t0()),
            t0() + Duration::seconds(60),
            Duration::seconds(60),
        );
        assert!(d.is_allowed());
    }

    #[test]
    fn wait_formatting() {
        assert_eq!(format_wait(Duration::milliseconds(1500)), "2s");
        assert_eq!(format_wait(Duration::seconds(125)), "2m 5s");
        assert_eq!(format_wait(Duration::seconds(-3)), "0s");
    }
}
