//! Context assembler — turns resolved history into model-facing role blocks.
//!
//! # Ordering
//!
//! Output blocks follow input turns one-to-one (minus turns that end up
//! empty). Consecutive turns of the same role are never coalesced. Image
//! references are resolved concurrently, which does not affect order.

use chatterbox_core::message::{ContentPart, ResolvedTurn, Role, RoleBlock, UserId};
use chatterbox_core::resolver::ImageResolver;
use futures::future::join_all;
use tracing::warn;

/// Name used for human authors whose user row is unknown.
pub const UNKNOWN_AUTHOR: &str = "User";

pub struct ContextAssembler<'a> {
    resolver: &'a dyn ImageResolver,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(resolver: &'a dyn ImageResolver) -> Self {
        Self { resolver }
    }

    /// Build the payload for `turns`, which must already be filtered and in
    /// chronological order.
    pub async fn assemble(
        &self,
        turns: &[ResolvedTurn],
        assistant_id: UserId,
        system_prompt: Option<&str>,
    ) -> Vec<RoleBlock> {
        let mut blocks = Vec::with_capacity(turns.len() + 1);
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            blocks.push(RoleBlock::system(prompt));
        }

        let built = join_all(turns.iter().map(|t| self.block_for(t, assistant_id))).await;
        blocks.extend(built.into_iter().flatten());
        blocks
    }

    async fn block_for(&self, turn: &ResolvedTurn, assistant_id: UserId) -> Option<RoleBlock> {
        let role = if turn.author_id == assistant_id {
            Role::Assistant
        } else {
            Role::User
        };

        let mut parts = Vec::with_capacity(2);
        if let Some(text) = turn.text.as_deref().filter(|t| !t.trim().is_empty()) {
            let text = match role {
                Role::Assistant => text.to_string(),
                _ => format!(
                    "{}: {}",
                    turn.author_name.as_deref().unwrap_or(UNKNOWN_AUTHOR),
                    text
                ),
            };
            parts.push(ContentPart::Text { text });
        }

        if let Some(reference) = turn.image_ref.as_deref() {
            match self.resolver.resolve(reference).await {
                Ok(url) => parts.push(ContentPart::Image { url }),
                Err(e) => warn!(msg_id = turn.msg_id, error = %e, "Dropping unresolvable image"),
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(RoleBlock { role, parts })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatterbox_core::error::ResolveError;
    use chatterbox_core::resolver::PassthroughResolver;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    const BOT: UserId = 777;

    fn turn(id: i64, author: UserId, name: Option<&str>, text: Option<&str>, image: Option<&str>) -> ResolvedTurn {
        ResolvedTurn {
            msg_id: id,
            author_id: author,
            author_name: name.map(String::from),
            timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).single().unwrap(),
            text: text.map(String::from),
            image_ref: image.map(String::from),
        }
    }

    #[tokio::test]
    async fn roles_and_name_prefixes() {
        let assembler = ContextAssembler::new(&PassthroughResolver);
        let turns = vec![
            turn(2, BOT, Some("Chatterbox"), Some("hi Bob"), None),
            turn(3, 5, Some("Bob"), Some("what's up"), None),
        ];
        let blocks = assembler.assemble(&turns, BOT, None).await;
        assert_eq!(
            blocks,
            vec![
                RoleBlock::text(Role::Assistant, "hi Bob"),
                RoleBlock::user("Bob: what's up"),
            ]
        );
    }

    #[tokio::test]
    async fn system_prompt_is_prepended() {
        let assembler = ContextAssembler::new(&PassthroughResolver);
        let turns = vec![turn(1, 5, None, Some("hey"), None)];
        let blocks = assembler.assemble(&turns, BOT, Some("Be terse")).await;
        assert_eq!(blocks[0], RoleBlock::system("Be terse"));
        assert_eq!(blocks[1], RoleBlock::user("User: hey"));

        let blocks = assembler.assemble(&turns, BOT, Some("  ")).await;
        assert_eq!(blocks.len(), 1);
    }

    #[tokio::test]
    async fn image_and_text_share_a_block() {
        let assembler = ContextAssembler::new(&PassthroughResolver);
        let turns = vec![turn(1, 5, Some("Ann"), Some("look"), Some("https://cdn/cat.jpg"))];
        let blocks = assembler.assemble(&turns, BOT, None).await;
        assert_eq!(
            blocks[0].parts,
            vec![
                ContentPart::Text {
                    text: "Ann: look".into()
                },
                ContentPart::Image {
                    url: "https://cdn/cat.jpg".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_image_keeps_text_and_drops_empty_turns() {
        let assembler = ContextAssembler::new(&PassthroughResolver);
        let turns = vec![
            turn(1, 5, Some("Ann"), Some("caption"), Some("opaque-file-id")),
            turn(2, 5, Some("Ann"), None, Some("opaque-file-id")),
            turn(3, 5, Some("Ann"), Some("   "), None),
            turn(4, BOT, None, Some("reply"), None),
        ];
        let blocks = assembler.assemble(&turns, BOT, None).await;
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], RoleBlock::user("Ann: caption"));
        assert_eq!(blocks[1].role, Role::Assistant);
    }

    /// Resolves slower for earlier references, to shuffle completion order.
    struct SlowResolver;

    #[async_trait]
    impl ImageResolver for SlowResolver {
        async fn resolve(&self, reference: &str) -> Result<String, ResolveError> {
            let delay: u64 = reference.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(100 - delay * 10)).await;
            Ok(format!("https://img/{reference}"))
        }
    }

    #[tokio::test]
    async fn concurrent_resolution_preserves_order() {
        let assembler = ContextAssembler::new(&SlowResolver);
        let turns: Vec<_> = (0..5)
            .map(|i| turn(i, 5, Some("Ann"), None, Some(&i.to_string())))
            .collect();
        let blocks = assembler.assemble(&turns, BOT, None).await;
        let urls: Vec<_> = blocks
            .iter()
            .map(|b| match &b.parts[0] {
                ContentPart::Image { url } => url.clone(),
                other => panic!("unexpected part {other:?}"),
            })
            .collect();
        assert_eq!(
            urls,
            (0..5).map(|i| format!("https://img/{i}")).collect::<Vec<_>>()
        );
    }
}
