//! Thread resolver — reconstructs a reply chain from the log.
//!
//! The walk is iterative and bounded: at most `max_depth` parent hops, and a
//! visited set stops it the moment a message id recurs. `reply_to` comes
//! from the chat platform and may form cycles.

use chatterbox_core::error::StoreError;
use chatterbox_core::message::{ChatId, MsgId, ResolvedTurn, sort_chronologically};
use chatterbox_core::store::MessageLog;
use std::collections::HashSet;
use tracing::debug;

/// Walk `reply_to` links backward from `start_msg_id`.
///
/// Returns the start message plus at most `max_depth` ancestors, oldest
/// first. A missing parent or a repeated id ends the walk with what was
/// collected; a missing start message yields an empty result. Only a log
/// failure is an error.
pub async fn resolve(
    store: &dyn MessageLog,
    chat_id: ChatId,
    start_msg_id: MsgId,
    max_depth: usize,
) -> Result<Vec<ResolvedTurn>, StoreError> {
    let mut turns = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(start_msg_id);

    while let Some(msg_id) = next.take() {
        if !visited.insert(msg_id) {
            debug!(chat_id, msg_id, "Reply cycle detected, stopping walk");
            break;
        }

        let Some(row) = store.get(chat_id, msg_id).await? else {
            break;
        };

        let parent = row.message.reply_to;
        turns.push(ResolvedTurn::from(row));

        // The start message is hop zero.
        if turns.len() > max_depth {
            break;
        }
        next = parent;
    }

    sort_chronologically(&mut turns);
    debug!(chat_id, start_msg_id, turns = turns.len(), "Resolved reply thread");
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterbox_core::message::ChatMessage;
    use chatterbox_store::InMemoryLog;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    /// A straight chain 1 <- 2 <- ... <- n.
    async fn chain(n: i64) -> InMemoryLog {
        let log = InMemoryLog::new();
        for i in 1..=n {
            let mut msg = ChatMessage::text(-1, i, i % 2, at(i), format!("m{i}"));
            if i > 1 {
                msg = msg.replying_to(i - 1);
            }
            log.insert_message(&msg).await.unwrap();
        }
        log
    }

    fn ids(turns: &[ResolvedTurn]) -> Vec<MsgId> {
        turns.iter().map(|t| t.msg_id).collect()
    }

    #[tokio::test]
    async fn full_chain_is_returned_oldest_first() {
        let log = chain(4).await;
        let turns = resolve(&log, -1, 4, 10).await.unwrap();
        assert_eq!(ids(&turns), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn depth_bounds_ancestors() {
        let log = chain(20).await;
        for depth in [0usize, 1, 3, 7] {
            let turns = resolve(&log, -1, 20, depth).await.unwrap();
            assert_eq!(turns.len(), depth + 1, "depth {depth}");
            assert_eq!(turns.last().unwrap().msg_id, 20);
        }
        let turns = resolve(&log, -1, 20, 2).await.unwrap();
        assert_eq!(ids(&turns), vec![18, 19, 20]);
    }

    #[tokio::test]
    async fn cycle_terminates_without_repeats() {
        let log = InMemoryLog::new();
        log.insert_message(&ChatMessage::text(-1, 1, 5, at(1), "A").replying_to(2))
            .await
            .unwrap();
        log.insert_message(&ChatMessage::text(-1, 2, 6, at(2), "B").replying_to(1))
            .await
            .unwrap();

        let turns = resolve(&log, -1, 2, 100).await.unwrap();
        assert_eq!(ids(&turns), vec![1, 2]);
    }

    #[tokio::test]
    async fn self_reply_terminates() {
        let log = InMemoryLog::new();
        log.insert_message(&ChatMessage::text(-1, 1, 5, at(1), "me").replying_to(1))
            .await
            .unwrap();
        let turns = resolve(&log, -1, 1, 10).await.unwrap();
        assert_eq!(ids(&turns), vec![1]);
    }

    #[tokio::test]
    async fn missing_parent_stops_walk() {
        let log = InMemoryLog::new();
        log.insert_message(&ChatMessage::text(-1, 5, 1, at(5), "orphan").replying_to(4))
            .await
            .unwrap();
        let turns = resolve(&log, -1, 5, 10).await.unwrap();
        assert_eq!(ids(&turns), vec![5]);
    }

    #[tokio::test]
    async fn missing_start_is_empty() {
        let log = InMemoryLog::new();
        assert!(resolve(&log, -1, 42, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_chats_are_not_followed() {
        let log = InMemoryLog::new();
        log.insert_message(&ChatMessage::text(-2, 1, 1, at(1), "elsewhere"))
            .await
            .unwrap();
        log.insert_message(&ChatMessage::text(-1, 2, 1, at(2), "here").replying_to(1))
            .await
            .unwrap();
        let turns = resolve(&log, -1, 2, 10).await.unwrap();
        assert_eq!(ids(&turns), vec![2]);
    }

    #[tokio::test]
    async fn unavailable_log_is_an_error() {
        let log = chain(2).await;
        log.set_unavailable(true);
        let err = resolve(&log, -1, 2, 10).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
