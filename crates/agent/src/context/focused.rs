//! Focused history selector — recent assistant turns plus the human turns
//! addressed to the assistant.
//!
//! A human turn counts as addressed when it replies to an assistant message
//! or starts with the command trigger `!`. Both sides pass the noise filter
//! before their limit is counted, so the selector pages backward through the
//! log until it has enough accepted rows or the log runs out.

use super::filter;
use chatterbox_core::error::StoreError;
use chatterbox_core::message::{ChatId, LogRow, ResolvedTurn, UserId, sort_chronologically};
use chatterbox_core::store::{AuthorFilter, Cursor, HistoryPage, MessageLog};
use tracing::debug;

/// Rows fetched per backward page.
const PAGE_SIZE: usize = 50;

/// Command trigger character.
pub const TRIGGER: char = '!';

/// Select up to `k_from_assistant` assistant turns and `k_from_humans`
/// addressed human turns, merged oldest first.
pub async fn select(
    store: &dyn MessageLog,
    chat_id: ChatId,
    assistant_id: UserId,
    k_from_assistant: usize,
    k_from_humans: usize,
) -> Result<Vec<ResolvedTurn>, StoreError> {
    let mut turns = collect(
        store,
        chat_id,
        AuthorFilter::Only(assistant_id),
        k_from_assistant,
        |row| filter::include(&ResolvedTurn::from(row.clone()), assistant_id),
    )
    .await?;

    let humans = collect(
        store,
        chat_id,
        AuthorFilter::Except(assistant_id),
        k_from_humans,
        |row| {
            let addressed = row.parent_author_id == Some(assistant_id)
                || row
                    .message
                    .text
                    .as_deref()
                    .is_some_and(|t| t.trim_start().starts_with(TRIGGER));
            addressed && filter::include(&ResolvedTurn::from(row.clone()), assistant_id)
        },
    )
    .await?;

    debug!(
        chat_id,
        from_assistant = turns.len(),
        to_assistant = humans.len(),
        "Selected focused history"
    );

    turns.extend(humans);
    sort_chronologically(&mut turns);
    Ok(turns)
}

/// Page backward through one author side until `limit` rows are accepted.
async fn collect(
    store: &dyn MessageLog,
    chat_id: ChatId,
    author: AuthorFilter,
    limit: usize,
    accept: impl Fn(&LogRow) -> bool,
) -> Result<Vec<ResolvedTurn>, StoreError> {
    let mut accepted = Vec::new();
    if limit == 0 {
        return Ok(accepted);
    }

    let mut cursor: Option<Cursor> = None;
    loop {
        let page = HistoryPage::new(chat_id, author, PAGE_SIZE)
            .text_only()
            .before(cursor);
        let rows = store.recent(&page).await?;
        let exhausted = rows.len() < PAGE_SIZE;
        cursor = rows.last().map(|r| Cursor::of(&r.message));

        for row in rows {
            if accept(&row) {
                accepted.push(ResolvedTurn::from(row));
                if accepted.len() == limit {
                    return Ok(accepted);
                }
            }
        }

        if exhausted {
            return Ok(accepted);
        }
    }
}
