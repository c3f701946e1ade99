//! Mention scanning and response eligibility.
//!
//! An address token (`@name`) is authoritative only at the beginning of a
//! paragraph: the start of the text, or immediately following a newline with
//! optional leading whitespace. A token appearing mid-sentence is descriptive
//! text, not a directive.

use confab_core::{AgentId, Sender};
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `@name` at a paragraph beginning. `(?m)^` anchors at text start
/// and after every newline; horizontal whitespace may precede the token.
static PARAGRAPH_MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*@([A-Za-z0-9_-]+)").expect("valid mention pattern"));

/// Matches `@name` anywhere in the text.
static ANY_MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_-]+)").expect("valid mention pattern"));

/// Extract paragraph-beginning mentions in order, lower-cased.
///
/// Matches are de-duplicated by position, not by name: the same name at two
/// distinct paragraph starts appears twice. Empty or mention-free input
/// yields an empty vec, never an error.
pub fn extract_paragraph_mentions(text: &str) -> Vec<String> {
    PARAGRAPH_MENTION_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_lowercase())
        .collect()
}

/// Extract every mention token anywhere in the text, in order, lower-cased.
pub fn extract_all_mentions(text: &str) -> Vec<String> {
    ANY_MENTION_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_lowercase())
        .collect()
}

/// Whether trimmed text opens with a mention token.
pub fn starts_with_mention(text: &str) -> bool {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix('@') {
        Some(rest) => rest
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        None => false,
    }
}

/// Why an agent will or will not respond to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDecision {
    /// The agent is addressed (or the message is a human broadcast)
    Respond,
    /// Agents never respond to their own messages
    OwnMessage,
    /// Mentions are present but the agent is not among the addressees
    NotAddressed,
    /// Mentions exist only mid-paragraph: a reference, not a directive,
    /// so no agent responds
    AmbiguousMention,
    /// A mention-free message from another agent; only humans broadcast
    AgentWithoutAddress,
}

impl ResponseDecision {
    /// Whether this decision means the agent should generate a reply.
    pub fn should_respond(&self) -> bool {
        matches!(self, ResponseDecision::Respond)
    }
}

/// Decide whether `agent_id` should respond to `text` sent by `sender`.
///
/// Rules, in order:
/// 1. an agent never responds to its own message;
/// 2. a paragraph-beginning mention of the agent is a directive;
/// 3. mentions that exist only mid-paragraph address nobody;
/// 4. a mention-free human message is a broadcast to every agent;
/// 5. mention-free agent messages address nobody.
pub fn response_decision(agent_id: &AgentId, sender: &Sender, text: &str) -> ResponseDecision {
    if sender.is_agent() && sender.id == agent_id.as_str() {
        return ResponseDecision::OwnMessage;
    }

    let paragraph = extract_paragraph_mentions(text);
    if paragraph.iter().any(|name| name == agent_id.as_str()) {
        return ResponseDecision::Respond;
    }

    let any = extract_all_mentions(text);
    if !any.is_empty() {
        if paragraph.is_empty() {
            return ResponseDecision::AmbiguousMention;
        }
        return ResponseDecision::NotAddressed;
    }

    if sender.is_human() {
        ResponseDecision::Respond
    } else {
        ResponseDecision::AgentWithoutAddress
    }
}

/// Convenience wrapper over [`response_decision`].
pub fn should_respond(agent_id: &AgentId, sender: &Sender, text: &str) -> bool {
    response_decision(agent_id, sender, text).should_respond()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_at_text_start_is_authoritative() {
        assert_eq!(
            extract_paragraph_mentions("@pro, what do you think?"),
            vec!["pro"]
        );
    }

    #[test]
    fn test_mid_sentence_mention_is_not_authoritative() {
        assert_eq!(
            extract_paragraph_mentions("hi @pro, what do you think?"),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_mention_after_newline_is_authoritative() {
        assert_eq!(
            extract_paragraph_mentions("Hello!\n@pro, please respond."),
            vec!["pro"]
        );
    }

    #[test]
    fn test_mention_after_newline_and_whitespace() {
        assert_eq!(
            extract_paragraph_mentions("Hello!\n   @pro please respond."),
            vec!["pro"]
        );
    }

    #[test]
    fn test_repeated_paragraph_mentions_all_count() {
        assert_eq!(
            extract_paragraph_mentions("@gm first\n@gm second\n@pro third"),
            vec!["gm", "gm", "pro"]
        );
    }

    #[test]
    fn test_mentions_are_lowercased() {
        assert_eq!(extract_paragraph_mentions("@GM hello"), vec!["gm"]);
    }

    #[test]
    fn test_empty_input_yields_empty() {
        assert_eq!(extract_paragraph_mentions(""), Vec::<String>::new());
        assert_eq!(extract_all_mentions(""), Vec::<String>::new());
    }

    #[test]
    fn test_extract_all_mentions_finds_mid_sentence() {
        assert_eq!(
            extract_all_mentions("hi @pro, ask @gm later"),
            vec!["pro", "gm"]
        );
    }

    #[test]
    fn test_name_charset_includes_hyphen_and_underscore() {
        assert_eq!(
            extract_paragraph_mentions("@game-master_2 go"),
            vec!["game-master_2"]
        );
    }

    #[test]
    fn test_starts_with_mention() {
        assert!(starts_with_mention("@gm hello"));
        assert!(starts_with_mention("  @gm hello"));
        assert!(!starts_with_mention("hello @gm"));
        assert!(!starts_with_mention("@ gm"));
        assert!(!starts_with_mention(""));
    }

    #[test]
    fn test_human_broadcast_reaches_every_agent() {
        let sender = Sender::human("alice");
        let decision = response_decision(&AgentId::new("gm"), &sender, "hello everyone");
        assert_eq!(decision, ResponseDecision::Respond);
    }

    #[test]
    fn test_mid_paragraph_only_mentions_address_nobody() {
        let sender = Sender::human("alice");
        let decision = response_decision(&AgentId::new("pro"), &sender, "I heard @pro is good");
        assert_eq!(decision, ResponseDecision::AmbiguousMention);
    }

    #[test]
    fn test_addressed_agent_responds_others_do_not() {
        let sender = Sender::human("alice");
        assert!(should_respond(&AgentId::new("pro"), &sender, "@pro take it"));
        assert_eq!(
            response_decision(&AgentId::new("gm"), &sender, "@pro take it"),
            ResponseDecision::NotAddressed
        );
    }

    #[test]
    fn test_agent_never_responds_to_own_message() {
        let gm = AgentId::new("gm");
        let sender = Sender::agent(&gm);
        assert_eq!(
            response_decision(&gm, &sender, "@gm note to self"),
            ResponseDecision::OwnMessage
        );
    }

    #[test]
    fn test_mention_free_agent_message_is_not_broadcast() {
        let gm = AgentId::new("gm");
        let sender = Sender::agent(&gm);
        assert_eq!(
            response_decision(&AgentId::new("pro"), &sender, "thinking out loud"),
            ResponseDecision::AgentWithoutAddress
        );
    }
}

// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================
