//! Noise filter — keeps operator traffic out of model context.
//!
//! The assistant prefixes its operational confirmations with a status glyph,
//! and humans configure the bot with `!` commands. Neither is conversation,
//! and a model that sees them starts "remembering" its own bookkeeping.

use chatterbox_core::message::{ResolvedTurn, UserId};

/// Glyphs the assistant prepends to configuration acknowledgements.
pub const STATUS_MARKERS: &[&str] = &["✅", "🧠", "🔄", "🌡", "🧹", "❌", "⏳", "🔢"];

/// Commands that configure or operate the bot rather than talk to it.
/// Matched case-insensitively as text prefixes.
pub const COMMAND_PREFIXES: &[&str] = &[
    "!system",
    "!clearsystem",
    "!temp",
    "!models",
    "!model",
    "!forget",
    "!analyze",
    "!hideme",
    // Non-conversational utilities
    "!help",
    "!here",
    "!stats",
    "!img",
    "!say",
];

/// Whether `turn` belongs in model context.
///
/// Turns without text (pure photos and stickers) are always included.
pub fn include(turn: &ResolvedTurn, assistant_id: UserId) -> bool {
    let Some(text) = turn.text.as_deref() else {
        return true;
    };
    let text = text.trim_start();

    if turn.author_id == assistant_id {
        !STATUS_MARKERS.iter().any(|m| text.starts_with(m))
    } else {
        !is_command(text)
    }
}

/// Whether `text` starts with one of [`COMMAND_PREFIXES`].
pub fn is_command(text: &str) -> bool {
    let head: String = text
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_lowercase();
    COMMAND_PREFIXES.iter().any(|p| head.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const BOT: UserId = 777;

    fn turn(author_id: UserId, text: Option<&str>) -> ResolvedTurn {
        ResolvedTurn {
            msg_id: 1,
            author_id,
            author_name: None,
            timestamp: Utc::now(),
            text: text.map(String::from),
            image_ref: None,
        }
    }

    #[test]
    fn assistant_status_markers_are_excluded() {
        for marker in STATUS_MARKERS {
            let t = turn(BOT, Some(&format!("{marker} done")));
            assert!(!include(&t, BOT), "marker {marker} should be filtered");
        }
        assert!(include(&turn(BOT, Some("Sure, here you go")), BOT));
    }

    #[test]
    fn human_configuration_commands_are_excluded() {
        for cmd in ["!system be a pirate", "!SYSTEM", "!Temp 0.3", "!clearsystem", "!model gpt-4o", "!models", "!forget", "!analyze", "!hideme"] {
            assert!(!include(&turn(5, Some(cmd)), BOT), "{cmd} should be filtered");
        }
    }

    #[test]
    fn human_prompts_pass() {
        assert!(include(&turn(5, Some("!what is rust")), BOT));
        assert!(include(&turn(5, Some("hello there")), BOT));
    }

    #[test]
    fn marker_only_filters_assistant_and_command_only_filters_humans() {
        // A human may start a message with a check mark.
        assert!(include(&turn(5, Some("✅ finished my homework")), BOT));
        // The assistant quoting a command is still conversation.
        assert!(include(&turn(BOT, Some("!system is how you set my prompt")), BOT));
    }

    #[test]
    fn textless_turns_are_kept() {
        assert!(include(&turn(5, None), BOT));
        assert!(include(&turn(BOT, None), BOT));
    }

    #[test]
    fn leading_whitespace_is_ignored() {
        assert!(!include(&turn(5, Some("   !temp 1.2")), BOT));
        assert!(!include(&turn(BOT, Some("\n🧠 current prompt")), BOT));
    }
}
