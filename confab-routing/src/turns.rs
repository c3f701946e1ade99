//! Turn and loop control.
//!
//! The rewrite pipeline runs over an agent's generated reply before it is
//! published, in order: self-mention removal, then auto-mention. Together
//! with the turn counter this stops `@a -> @b -> @a` cycles from regenerating
//! indefinitely while preserving explicit hand-offs: a reply that already
//! opens with a mention is never silently readdressed.

use crate::mentions::starts_with_mention;
use confab_core::{AgentId, SenderKind};

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Strip one leading self-mention from a single line, if present.
/// Returns `None` when the line does not open with `@own_id`.
fn strip_line_prefix<'a>(line: &'a str, own_id: &AgentId) -> Option<&'a str> {
    let trimmed = line.trim_start_matches([' ', '\t']);
    let rest = trimmed.strip_prefix('@')?;
    let name_len = rest.chars().take_while(|&c| is_name_char(c)).count();
    if name_len == 0 {
        return None;
    }
    let (name, tail) = rest.split_at(name_len);
    if !name.eq_ignore_ascii_case(own_id.as_str()) {
        return None;
    }
    Some(tail.trim_start_matches([' ', '\t']))
}

/// Remove paragraph-beginning mentions of the replying agent's own id,
/// case-insensitively.
///
/// An agent addressing itself is meaningless and would re-trigger the agent.
/// Stripping repeats per line until a fixpoint, so stacked prefixes like
/// `@gm @gm ...` disappear entirely.
pub fn remove_self_mentions(text: &str, own_id: &AgentId) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let mut current = line;
        while let Some(stripped) = strip_line_prefix(current, own_id) {
            current = stripped;
        }
        lines.push(current.to_string());
    }
    lines.join("\n")
}

/// Prefix `@sender ` when the trimmed text does not already open with a
/// mention.
///
/// An existing opening mention is never overridden: an agent that
/// deliberately re-mentions its inbound sender, or hands off to a third
/// party, keeps its addressing. Applied at most once per outgoing message.
pub fn add_auto_mention(text: &str, sender_id: &str) -> String {
    let trimmed = text.trim();
    if starts_with_mention(trimmed) {
        return trimmed.to_string();
    }
    format!("@{} {}", sender_id, trimmed).trim_end().to_string()
}

/// Outcome of the reply rewrite pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRewrite {
    /// The text to publish
    pub text: String,
    /// Whether any self-mention was stripped
    pub stripped_self: bool,
    /// Whether an auto-mention prefix was added
    pub added_auto: bool,
}

/// Apply the full rewrite pipeline to an agent's generated reply.
///
/// Self-mentions are stripped first, then the original sender is
/// auto-mentioned when `auto_reply` is set and no mention opens the text.
pub fn prepare_agent_reply(
    text: &str,
    own_id: &AgentId,
    original_sender_id: &str,
    auto_reply: bool,
) -> ReplyRewrite {
    let stripped = remove_self_mentions(text, own_id);
    let stripped_self = stripped != text;

    if auto_reply && !starts_with_mention(stripped.trim()) {
        let rewritten = add_auto_mention(&stripped, original_sender_id);
        return ReplyRewrite {
            text: rewritten,
            stripped_self,
            added_auto: true,
        };
    }

    ReplyRewrite {
        text: stripped.trim().to_string(),
        stripped_self,
        added_auto: false,
    }
}

/// Consecutive agent-to-agent exchange accounting for one world.
///
/// Human messages reset the counter; agent replies increment it. When the
/// counter reaches the world's turn limit, the router halts further
/// automatic responses and surfaces a system notice instead of continuing
/// silently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnCounter {
    consecutive_agent_turns: u32,
}

impl TurnCounter {
    /// Fresh counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message by sender kind: humans reset, agents increment,
    /// system notices leave the chain untouched.
    pub fn record(&mut self, kind: SenderKind) {
        match kind {
            SenderKind::Human => self.record_human(),
            SenderKind::Agent => self.record_agent(),
            SenderKind::System => {}
        }
    }

    /// A human message resets the chain.
    pub fn record_human(&mut self) {
        self.consecutive_agent_turns = 0;
    }

    /// An agent reply extends the chain.
    pub fn record_agent(&mut self) {
        self.consecutive_agent_turns = self.consecutive_agent_turns.saturating_add(1);
    }

    /// Current chain length.
    pub fn count(&self) -> u32 {
        self.consecutive_agent_turns
    }

    /// Whether the chain has reached the given limit.
    pub fn limit_reached(&self, limit: u32) -> bool {
        self.consecutive_agent_turns >= limit
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_self_mentions_strips_stacked_prefix() {
        let result = remove_self_mentions("@gm @gm I will help.", &AgentId::new("gm"));
        assert_eq!(result, "I will help.");
    }

    #[test]
    fn test_remove_self_mentions_is_case_insensitive() {
        let result = remove_self_mentions("@GM I will help.", &AgentId::new("gm"));
        assert_eq!(result, "I will help.");
    }

    #[test]
    fn test_remove_self_mentions_keeps_other_names() {
        let result = remove_self_mentions("@pro your move", &AgentId::new("gm"));
        assert_eq!(result, "@pro your move");
    }

    #[test]
    fn test_remove_self_mentions_does_not_match_longer_names() {
        let result = remove_self_mentions("@gm-helper take over", &AgentId::new("gm"));
        assert_eq!(result, "@gm-helper take over");
    }

    #[test]
    fn test_remove_self_mentions_handles_multiline() {
        let result = remove_self_mentions("@gm line one\n@gm line two", &AgentId::new("gm"));
        assert_eq!(result, "line one\nline two");
    }

    #[test]
    fn test_add_auto_mention_prefixes_plain_text() {
        assert_eq!(add_auto_mention("Hello there!", "human"), "@human Hello there!");
    }

    #[test]
    fn test_add_auto_mention_respects_existing_address() {
        assert_eq!(
            add_auto_mention("@gm Hello there!", "human"),
            "@gm Hello there!"
        );
    }

    #[test]
    fn test_add_auto_mention_trims_first() {
        assert_eq!(add_auto_mention("  Hello  ", "human"), "@human Hello");
    }

    #[test]
    fn test_pipeline_preserves_explicit_reply_to_sender() {
        // "@pro responds to @gm with a message that already starts with @gm":
        // self-strip is a no-op and no new prefix is added.
        let rewrite = prepare_agent_reply(
            "@gm the door is locked.",
            &AgentId::new("pro"),
            "gm",
            true,
        );
        assert_eq!(rewrite.text, "@gm the door is locked.");
        assert!(!rewrite.stripped_self);
        assert!(!rewrite.added_auto);
    }

    #[test]
    fn test_pipeline_auto_mentions_unaddressed_reply() {
        let rewrite =
            prepare_agent_reply("The door is locked.", &AgentId::new("pro"), "gm", true);
        assert_eq!(rewrite.text, "@gm The door is locked.");
        assert!(rewrite.added_auto);
    }

    #[test]
    fn test_pipeline_strip_then_auto_mention() {
        // A reply that only addressed itself ends up readdressed to the sender.
        let rewrite = prepare_agent_reply("@pro I agree.", &AgentId::new("pro"), "gm", true);
        assert_eq!(rewrite.text, "@gm I agree.");
        assert!(rewrite.stripped_self);
        assert!(rewrite.added_auto);
    }

    #[test]
    fn test_pipeline_without_auto_reply_leaves_text_unaddressed() {
        let rewrite =
            prepare_agent_reply("The door is locked.", &AgentId::new("pro"), "gm", false);
        assert_eq!(rewrite.text, "The door is locked.");
        assert!(!rewrite.added_auto);
    }

    #[test]
    fn test_pipeline_preserves_handoff_to_third_party() {
        let rewrite = prepare_agent_reply(
            "@arbiter please weigh in.",
            &AgentId::new("pro"),
            "gm",
            true,
        );
        assert_eq!(rewrite.text, "@arbiter please weigh in.");
        assert!(!rewrite.added_auto);
    }

    #[test]
    fn test_turn_counter_resets_on_human() {
        let mut counter = TurnCounter::new();
        counter.record_agent();
        counter.record_agent();
        assert_eq!(counter.count(), 2);
        assert!(counter.limit_reached(2));

        counter.record_human();
        assert_eq!(counter.count(), 0);
        assert!(!counter.limit_reached(2));
    }

    #[test]
    fn test_turn_counter_ignores_system_messages() {
        let mut counter = TurnCounter::new();
        counter.record(SenderKind::Agent);
        counter.record(SenderKind::System);
        assert_eq!(counter.count(), 1);
    }
}

// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::mentions::extract_paragraph_mentions;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Auto-mention is idempotent: applying it twice equals applying it once.
        #[test]
        fn prop_auto_mention_idempotent(text in ".*", sender in "[a-z][a-z0-9_-]{0,8}") {
            let once = add_auto_mention(&text, &sender);
            let twice = add_auto_mention(&once, &sender);
            prop_assert_eq!(once, twice);
        }

        /// After stripping, no paragraph-beginning mention of the own id remains.
        #[test]
        fn prop_self_mentions_fully_removed(
            text in ".*",
            own in "[a-z][a-z0-9_-]{0,8}",
        ) {
            let own_id = AgentId::new(&own);
            let stripped = remove_self_mentions(&text, &own_id);
            prop_assert!(!extract_paragraph_mentions(&stripped)
                .iter()
                .any(|name| name == own_id.as_str()));
        }

        /// The counter never underflows and a human always clears it.
        #[test]
        fn prop_counter_reset(agent_turns in 0u32..50) {
            let mut counter = TurnCounter::new();
            for _ in 0..agent_turns {
                counter.record_agent();
            }
            prop_assert_eq!(counter.count(), agent_turns);
            counter.record_human();
            prop_assert_eq!(counter.count(), 0);
        }
    }
}
