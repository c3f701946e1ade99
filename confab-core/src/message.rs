//! Message types and the content envelope.
//!
//! Messages are immutable once persisted. They form a forest of reply chains
//! rooted at chat-start messages; the reply edge (`reply_to`) is validated by
//! the thread integrity checker before a message is accepted.

use crate::{
    AgentId, ApprovalDecision, ApprovalScope, ChatId, MessageId, MessageRole, SenderKind,
    Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Reserved sender id for orchestrator-generated messages.
pub const SYSTEM_SENDER_ID: &str = "system";

/// Who produced a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sender {
    /// Normalized participant id; for agents this equals the mention name
    pub id: String,
    /// Kind of participant
    pub kind: SenderKind,
}

impl Sender {
    /// A human participant.
    pub fn human(id: impl AsRef<str>) -> Self {
        Self {
            id: id.as_ref().trim().to_lowercase(),
            kind: SenderKind::Human,
        }
    }

    /// An agent participant.
    pub fn agent(id: &AgentId) -> Self {
        Self {
            id: id.as_str().to_string(),
            kind: SenderKind::Agent,
        }
    }

    /// The orchestrator itself.
    pub fn system() -> Self {
        Self {
            id: SYSTEM_SENDER_ID.to_string(),
            kind: SenderKind::System,
        }
    }

    /// Whether the sender is a human participant.
    pub fn is_human(&self) -> bool {
        self.kind == SenderKind::Human
    }

    /// Whether the sender is an agent.
    pub fn is_agent(&self) -> bool {
        self.kind == SenderKind::Agent
    }
}

/// A tool invocation requested by an agent's completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back in the tool result
    pub call_id: String,
    /// Name of the tool to invoke
    pub tool_name: String,
    /// Raw arguments as supplied by the provider
    pub arguments: serde_json::Value,
}

/// Typed record of a tool-approval decision.
///
/// Persisted inside a tool-result message so the approval gate can scan it
/// back out of conversation history. Keeping this a tagged variant (rather
/// than untyped JSON) means the decision write and the approval scan share
/// one compile-checked shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecisionRecord {
    /// Tool the decision applies to
    pub tool_name: String,
    /// Approve or deny
    pub decision: ApprovalDecision,
    /// Once (uncached) or session (cached for the chat's lifetime)
    pub scope: ApprovalScope,
    /// When the human decided
    pub decided_at: Timestamp,
}

/// Payload of a tool-result message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResultPayload {
    /// Output produced by executing the tool
    Output { value: serde_json::Value },
    /// A recorded approval decision
    Approval { record: ApprovalDecisionRecord },
}

/// Content envelope for messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain conversational text
    Text { text: String },
    /// Tool invocations requested by an assistant turn
    ToolCalls { calls: Vec<ToolCallRequest> },
    /// Result of a tool invocation or a recorded approval decision
    ToolResult {
        tool_name: String,
        payload: ToolResultPayload,
    },
}

impl MessageContent {
    /// Plain text content.
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    /// The text of this content, if it is plain text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message in a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Globally-unique identifier
    pub message_id: MessageId,
    /// Chat this message belongs to
    pub chat_id: ChatId,
    /// Who produced the message
    pub sender: Sender,
    /// Conversation role
    pub role: MessageRole,
    /// Content envelope
    pub content: MessageContent,
    /// Optional reply edge to an earlier message
    pub reply_to: Option<MessageId>,
    /// When the message was created
    pub created_at: Timestamp,
}

impl Message {
    /// Create a plain-text message.
    pub fn text(
        chat_id: ChatId,
        sender: Sender,
        role: MessageRole,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: crate::new_message_id(),
            chat_id,
            sender,
            role,
            content: MessageContent::text(text),
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    /// Create a system notice (orchestrator sender, system role).
    pub fn system_notice(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self::text(chat_id, Sender::system(), MessageRole::System, text)
    }

    /// Create an assistant message carrying tool-call requests.
    pub fn tool_calls(chat_id: ChatId, sender: Sender, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            message_id: crate::new_message_id(),
            chat_id,
            sender,
            role: MessageRole::Assistant,
            content: MessageContent::ToolCalls { calls },
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    /// Create a tool-result message carrying tool output.
    pub fn tool_output(
        chat_id: ChatId,
        tool_name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            message_id: crate::new_message_id(),
            chat_id,
            sender: Sender::system(),
            role: MessageRole::Tool,
            content: MessageContent::ToolResult {
                tool_name: tool_name.into(),
                payload: ToolResultPayload::Output { value },
            },
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    /// Create a tool-result message recording an approval decision.
    pub fn approval_record(chat_id: ChatId, record: ApprovalDecisionRecord) -> Self {
        Self {
            message_id: crate::new_message_id(),
            chat_id,
            sender: Sender::system(),
            role: MessageRole::Tool,
            content: MessageContent::ToolResult {
                tool_name: record.tool_name.clone(),
                payload: ToolResultPayload::Approval { record },
            },
            reply_to: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a reply edge.
    pub fn with_reply_to(mut self, parent: MessageId) -> Self {
        self.reply_to = Some(parent);
        self
    }

    /// The text of this message, if its content is plain text.
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_text()
    }

    /// The approval decision recorded in this message, if any.
    pub fn approval_decision(&self) -> Option<&ApprovalDecisionRecord> {
        match &self.content {
            MessageContent::ToolResult {
                payload: ToolResultPayload::Approval { record },
                ..
            } => Some(record),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_chat_id;

    #[test]
    fn test_text_message_roundtrip() {
        let msg = Message::text(
            new_chat_id(),
            Sender::human("alice"),
            MessageRole::User,
            "hello",
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.text_content(), Some("hello"));
    }

    #[test]
    fn test_content_envelope_is_tagged() {
        let content = MessageContent::text("hi");
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "text");
    }

    #[test]
    fn test_approval_record_scan_helper() {
        let record = ApprovalDecisionRecord {
            tool_name: "shell".to_string(),
            decision: ApprovalDecision::Approve,
            scope: ApprovalScope::Session,
            decided_at: Utc::now(),
        };
        let msg = Message::approval_record(new_chat_id(), record.clone());
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.approval_decision(), Some(&record));

        let plain = Message::text(
            new_chat_id(),
            Sender::human("alice"),
            MessageRole::User,
            "hello",
        );
        assert_eq!(plain.approval_decision(), None);
    }

    #[test]
    fn test_sender_normalization() {
        let sender = Sender::human("  Alice ");
        assert_eq!(sender.id, "alice");
        assert!(sender.is_human());
        assert!(!Sender::system().is_human());
    }

    #[test]
    fn test_with_reply_to() {
        let parent = crate::new_message_id();
        let msg = Message::text(
            new_chat_id(),
            Sender::human("alice"),
            MessageRole::User,
            "re",
        )
        .with_reply_to(parent);
        assert_eq!(msg.reply_to, Some(parent));
    }
}
