//! CONFAB Approval - Tool Approval Gate
//!
//! Gates potentially dangerous tool invocations behind an explicit human
//! decision. Decisions granted at session scope are cached for the remainder
//! of one chat and scanned back out of conversation history, so a restart
//! that replays history reconstructs the same decisions.
//!
//! State machine per (chat, tool) pair: unknown -> pending -> approved|denied.
//! Session decisions are terminal for the pair until the chat or world is
//! torn down; once decisions are never cached.

use chrono::Utc;
use confab_core::{
    ApprovalDecision, ApprovalDecisionRecord, ApprovalScope, ChatId, Message,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// ARGUMENT SANITIZATION
// ============================================================================

/// Substrings that mark a JSON key as credential-like.
const SENSITIVE_KEY_MARKERS: [&str; 6] =
    ["key", "password", "token", "secret", "auth", "credential"];

/// Replacement value for redacted fields.
pub const REDACTED: &str = "[REDACTED]";

/// Whether a key should be redacted before surfacing to a human or log.
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    SENSITIVE_KEY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Recursively redact credential-like fields from tool arguments.
///
/// Any object key whose name contains a credential-like substring has its
/// value replaced with `"[REDACTED]"` at every nesting depth. Arrays are
/// traversed; scalars pass through unchanged.
pub fn sanitize_tool_args(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sanitized = map
                .iter()
                .map(|(key, inner)| {
                    if is_sensitive_key(key) {
                        (key.clone(), serde_json::Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), sanitize_tool_args(inner))
                    }
                })
                .collect();
            serde_json::Value::Object(sanitized)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_tool_args).collect())
        }
        other => other.clone(),
    }
}

// ============================================================================
// REQUEST / RESPONSE PAYLOADS
// ============================================================================

/// Options offered on an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalOption {
    /// Deny this call
    Cancel,
    /// Approve this call only
    Once,
    /// Approve for the remainder of the chat
    Always,
}

impl ApprovalOption {
    /// The full option set, in display order.
    pub fn all() -> Vec<ApprovalOption> {
        vec![
            ApprovalOption::Cancel,
            ApprovalOption::Once,
            ApprovalOption::Always,
        ]
    }

    /// The (decision, scope) pair this option encodes.
    pub fn to_decision(self) -> (ApprovalDecision, ApprovalScope) {
        match self {
            ApprovalOption::Cancel => (ApprovalDecision::Deny, ApprovalScope::Once),
            ApprovalOption::Once => (ApprovalDecision::Approve, ApprovalScope::Once),
            ApprovalOption::Always => (ApprovalDecision::Approve, ApprovalScope::Session),
        }
    }
}

/// Approval prompt surfaced to a UI collaborator.
///
/// Tool arguments are sanitized before they leave the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: String,
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    pub message: String,
    pub options: Vec<ApprovalOption>,
}

impl ApprovalRequest {
    /// Build a prompt for a tool call, sanitizing its arguments.
    pub fn new(tool_name: &str, args: &serde_json::Value, message: &str) -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            tool_name: tool_name.to_string(),
            tool_args: sanitize_tool_args(args),
            message: message.to_string(),
            options: ApprovalOption::all(),
        }
    }
}

/// A human's answer to an approval prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub request_id: String,
    pub decision: ApprovalDecision,
    pub scope: ApprovalScope,
}

// ============================================================================
// HITL OPTION REQUESTS
// ============================================================================

/// Wire identifier of the generalized option-request event.
pub const HITL_OPTION_REQUEST_EVENT: &str = "hitl-option-request";

/// Fallback option id when a declared default is absent from the option set.
pub const HITL_FALLBACK_OPTION_ID: &str = "no";

/// A single choice in a generalized human-in-the-loop prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlOption {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Generalized approval/choice prompt surfaced to a UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlOptionRequest {
    pub event_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_option_id: Option<String>,
    pub options: Vec<HitlOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl HitlOptionRequest {
    /// Build an option request with a fresh request id.
    pub fn new(options: Vec<HitlOption>) -> Self {
        Self {
            event_type: HITL_OPTION_REQUEST_EVENT.to_string(),
            request_id: Uuid::now_v7().to_string(),
            title: None,
            message: None,
            default_option_id: None,
            options,
            metadata: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Set the message.
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Declare the default option id.
    pub fn with_default(mut self, option_id: &str) -> Self {
        self.default_option_id = Some(option_id.to_string());
        self
    }

    /// Resolve the effective default option id.
    ///
    /// The declared default wins when it names an option in the set;
    /// otherwise an option literally identified `no` is the fallback.
    pub fn resolve_default(&self) -> Option<&str> {
        if let Some(declared) = &self.default_option_id {
            if self.options.iter().any(|o| &o.id == declared) {
                return Some(declared);
            }
        }
        self.options
            .iter()
            .find(|o| o.id == HITL_FALLBACK_OPTION_ID)
            .map(|o| o.id.as_str())
    }
}

// ============================================================================
// APPROVAL GATE
// ============================================================================

/// Outcome of an approval check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalCheck {
    /// Whether a new prompt must be raised before the tool may run
    pub needs_approval: bool,
    /// Whether the tool may execute now
    pub can_execute: bool,
}

impl ApprovalCheck {
    /// A cached or recorded decision resolved the check.
    fn decided(decision: ApprovalDecision) -> Self {
        Self {
            needs_approval: false,
            can_execute: decision == ApprovalDecision::Approve,
        }
    }

    /// No applicable decision exists; the caller must prompt.
    fn pending() -> Self {
        Self {
            needs_approval: true,
            can_execute: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CachedDecision {
    decision: ApprovalDecision,
    decided_at: confab_core::Timestamp,
}

/// Per-world approval gate.
///
/// The conversation history is the authoritative record: `check` scans it
/// for session-scope decision records. The in-memory cache is a fast path
/// over that scan and is cleared when a chat or the world is torn down.
/// Session decisions are never visible across chats.
#[derive(Debug, Default)]
pub struct ApprovalGate {
    cache: HashMap<(ChatId, String), CachedDecision>,
}

impl ApprovalGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `tool_name` may run in `chat_id` given the chat's
    /// history.
    ///
    /// Returns `{needs_approval: false, can_execute: true}` when a session
    /// approval exists, `{needs_approval: false, can_execute: false}` for a
    /// session denial, and `{needs_approval: true, ..}` otherwise. Once
    /// decisions never satisfy the scan.
    pub fn check(&mut self, chat_id: ChatId, tool_name: &str, history: &[Message]) -> ApprovalCheck {
        let cache_key = (chat_id, tool_name.to_string());
        if let Some(cached) = self.cache.get(&cache_key) {
            debug!(
                chat_id = %chat_id,
                tool_name,
                decision = ?cached.decision,
                decided_at = %cached.decided_at,
                "approval cache hit"
            );
            return ApprovalCheck::decided(cached.decision);
        }

        // Most recent decision wins, so scan newest-first.
        let found = history
            .iter()
            .rev()
            .filter(|m| m.chat_id == chat_id)
            .filter_map(|m| m.approval_decision())
            .find(|record| record.scope == ApprovalScope::Session && record.tool_name == tool_name);

        match found {
            Some(record) => {
                self.cache.insert(
                    cache_key,
                    CachedDecision {
                        decision: record.decision,
                        decided_at: record.decided_at,
                    },
                );
                ApprovalCheck::decided(record.decision)
            }
            None => ApprovalCheck::pending(),
        }
    }

    /// Record a decision, returning the tool-result message that persists it
    /// into chat history.
    ///
    /// Session decisions also populate the cache; once decisions are
    /// persisted for audit but never cached, so the next call re-prompts.
    pub fn record_decision(
        &mut self,
        chat_id: ChatId,
        tool_name: &str,
        decision: ApprovalDecision,
        scope: ApprovalScope,
    ) -> Message {
        let record = ApprovalDecisionRecord {
            tool_name: tool_name.to_string(),
            decision,
            scope,
            decided_at: Utc::now(),
        };

        if scope == ApprovalScope::Session {
            self.cache.insert(
                (chat_id, tool_name.to_string()),
                CachedDecision {
                    decision,
                    decided_at: record.decided_at,
                },
            );
        }

        debug!(chat_id = %chat_id, tool_name, ?decision, ?scope, "approval recorded");
        Message::approval_record(chat_id, record)
    }

    /// Drop cached decisions for one chat (chat teardown).
    pub fn clear_chat(&mut self, chat_id: ChatId) {
        self.cache.retain(|(cached_chat, _), _| *cached_chat != chat_id);
    }

    /// Drop every cached decision (world teardown).
    pub fn clear_all(&mut self) {
        self.cache.clear();
    }

    /// Number of cached decisions, for diagnostics.
    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::new_chat_id;
    use serde_json::json;

    #[test]
    fn test_sanitize_redacts_credential_keys() {
        let args = json!({
            "command": "deploy",
            "api_key": "sk-1234",
            "Password": "hunter2",
            "nested": { "authToken": "abc", "path": "/tmp" }
        });
        let clean = sanitize_tool_args(&args);
        assert_eq!(clean["command"], "deploy");
        assert_eq!(clean["api_key"], REDACTED);
        assert_eq!(clean["Password"], REDACTED);
        assert_eq!(clean["nested"]["authToken"], REDACTED);
        assert_eq!(clean["nested"]["path"], "/tmp");
    }

    #[test]
    fn test_sanitize_traverses_arrays() {
        let args = json!([{ "secret_value": "x" }, 42]);
        let clean = sanitize_tool_args(&args);
        assert_eq!(clean[0]["secret_value"], REDACTED);
        assert_eq!(clean[1], 42);
    }

    #[test]
    fn test_approval_request_carries_sanitized_args() {
        let request = ApprovalRequest::new(
            "shell",
            &json!({ "cmd": "ls", "ssh_key": "private" }),
            "Run shell command?",
        );
        assert_eq!(request.tool_args["ssh_key"], REDACTED);
        assert_eq!(request.options, ApprovalOption::all());
    }

    #[test]
    fn test_approval_option_decisions() {
        assert_eq!(
            ApprovalOption::Always.to_decision(),
            (ApprovalDecision::Approve, ApprovalScope::Session)
        );
        assert_eq!(
            ApprovalOption::Cancel.to_decision(),
            (ApprovalDecision::Deny, ApprovalScope::Once)
        );
    }

    #[test]
    fn test_session_approval_is_idempotent() {
        let mut gate = ApprovalGate::new();
        let chat_id = new_chat_id();
        let mut history = Vec::new();

        assert_eq!(gate.check(chat_id, "shell", &history), ApprovalCheck {
            needs_approval: true,
            can_execute: false
        });

        let record = gate.record_decision(
            chat_id,
            "shell",
            ApprovalDecision::Approve,
            ApprovalScope::Session,
        );
        history.push(record);

        for _ in 0..3 {
            assert_eq!(gate.check(chat_id, "shell", &history), ApprovalCheck {
                needs_approval: false,
                can_execute: true
            });
        }
    }

    #[test]
    fn test_session_approval_does_not_cross_chats() {
        let mut gate = ApprovalGate::new();
        let chat_a = new_chat_id();
        let chat_b = new_chat_id();

        let record = gate.record_decision(
            chat_a,
            "shell",
            ApprovalDecision::Approve,
            ApprovalScope::Session,
        );
        let history_a = vec![record];

        assert!(!gate.check(chat_a, "shell", &history_a).needs_approval);
        // Same tool, different chat: fresh prompt required.
        assert!(gate.check(chat_b, "shell", &[]).needs_approval);
    }

    #[test]
    fn test_history_scan_without_cache() {
        // A gate rebuilt after restart finds decisions by scanning history.
        let mut recording_gate = ApprovalGate::new();
        let chat_id = new_chat_id();
        let record = recording_gate.record_decision(
            chat_id,
            "search",
            ApprovalDecision::Approve,
            ApprovalScope::Session,
        );
        let history = vec![record];

        let mut fresh_gate = ApprovalGate::new();
        let check = fresh_gate.check(chat_id, "search", &history);
        assert!(!check.needs_approval);
        assert!(check.can_execute);
        assert_eq!(fresh_gate.cached_decisions(), 1);
    }

    #[test]
    fn test_session_denial_blocks_without_reprompt() {
        let mut gate = ApprovalGate::new();
        let chat_id = new_chat_id();
        let record = gate.record_decision(
            chat_id,
            "shell",
            ApprovalDecision::Deny,
            ApprovalScope::Session,
        );
        let history = vec![record];

        let check = gate.check(chat_id, "shell", &history);
        assert!(!check.needs_approval);
        assert!(!check.can_execute);
    }

    #[test]
    fn test_once_decision_is_not_cached() {
        let mut gate = ApprovalGate::new();
        let chat_id = new_chat_id();
        let record = gate.record_decision(
            chat_id,
            "shell",
            ApprovalDecision::Approve,
            ApprovalScope::Once,
        );
        let history = vec![record];

        // The once record persists for audit but never satisfies a scan.
        assert_eq!(gate.cached_decisions(), 0);
        assert!(gate.check(chat_id, "shell", &history).needs_approval);
    }

    #[test]
    fn test_decision_is_per_tool() {
        let mut gate = ApprovalGate::new();
        let chat_id = new_chat_id();
        let record = gate.record_decision(
            chat_id,
            "shell",
            ApprovalDecision::Approve,
            ApprovalScope::Session,
        );
        let history = vec![record];

        assert!(!gate.check(chat_id, "shell", &history).needs_approval);
        assert!(gate.check(chat_id, "search", &history).needs_approval);
    }

    #[test]
    fn test_clear_chat_drops_only_that_chat() {
        let mut gate = ApprovalGate::new();
        let chat_a = new_chat_id();
        let chat_b = new_chat_id();
        gate.record_decision(chat_a, "shell", ApprovalDecision::Approve, ApprovalScope::Session);
        gate.record_decision(chat_b, "shell", ApprovalDecision::Approve, ApprovalScope::Session);
        assert_eq!(gate.cached_decisions(), 2);

        gate.clear_chat(chat_a);
        assert_eq!(gate.cached_decisions(), 1);

        gate.clear_all();
        assert_eq!(gate.cached_decisions(), 0);
    }

    #[test]
    fn test_hitl_default_resolution() {
        let options = vec![
            HitlOption {
                id: "yes".to_string(),
                label: "Yes".to_string(),
                description: None,
            },
            HitlOption {
                id: "no".to_string(),
                label: "No".to_string(),
                description: Some("Do nothing".to_string()),
            },
        ];

        let declared = HitlOptionRequest::new(options.clone()).with_default("yes");
        assert_eq!(declared.resolve_default(), Some("yes"));

        // Declared default absent from the set: fall back to `no`.
        let absent = HitlOptionRequest::new(options.clone()).with_default("maybe");
        assert_eq!(absent.resolve_default(), Some("no"));

        let no_fallback = HitlOptionRequest::new(vec![HitlOption {
            id: "ok".to_string(),
            label: "Ok".to_string(),
            description: None,
        }])
        .with_default("maybe");
        assert_eq!(no_fallback.resolve_default(), None);
    }

    #[test]
    fn test_hitl_request_wire_shape() {
        let request = HitlOptionRequest::new(vec![]).with_title("Pick one");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["eventType"], HITL_OPTION_REQUEST_EVENT);
        assert_eq!(json["title"], "Pick one");
        assert!(json.get("message").is_none());
    }
}

// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================
