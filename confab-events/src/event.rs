//! World Event Types
//!
//! Every observable transition inside a world is published on its channel as
//! one of these events. Transport collaborators (CLI, WebSocket, TUI)
//! subscribe and render; the router itself also reacts to a subset.

use confab_approval::{ApprovalRequest, HitlOptionRequest};
use confab_core::{AgentId, Chat, ChatId, Message, ToolCallRequest, WorldId};
use serde::{Deserialize, Serialize};

/// Events broadcast on a world's channel.
///
/// Delivery order equals publication order for every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorldEvent {
    /// A message was validated and persisted.
    MessageCreated {
        /// The persisted message
        message: Message,
    },

    /// A new chat was created.
    ChatCreated {
        /// The created chat
        chat: Chat,
    },

    /// A chat was renamed or its counters changed.
    ChatUpdated {
        /// The updated chat
        chat: Chat,
    },

    /// An agent began generating a reply.
    AgentTurnStarted {
        /// The responding agent
        agent_id: AgentId,
        /// Chat the turn belongs to
        chat_id: ChatId,
    },

    /// An agent finished its turn (reply published or turn abandoned).
    AgentTurnCompleted {
        /// The responding agent
        agent_id: AgentId,
        /// Chat the turn belongs to
        chat_id: ChatId,
    },

    /// A tool call started executing.
    ToolCallStarted {
        /// Agent that requested the call
        agent_id: AgentId,
        /// The call being executed
        call: ToolCallRequest,
    },

    /// A tool call finished.
    ToolCallCompleted {
        /// Agent that requested the call
        agent_id: AgentId,
        /// Provider-assigned call id
        call_id: String,
        /// Name of the tool
        tool_name: String,
    },

    /// A tool call is suspended pending a human decision.
    ApprovalRequested {
        /// Agent whose turn is suspended
        agent_id: AgentId,
        /// Chat the request belongs to
        chat_id: ChatId,
        /// The prompt to surface (arguments already sanitized)
        request: ApprovalRequest,
    },

    /// A generalized option prompt is awaiting a human choice.
    HitlOptionRequested {
        /// The prompt to surface
        request: HitlOptionRequest,
    },

    /// The orchestrator surfaced a notice (failure report, status).
    SystemNotice {
        /// Chat the notice belongs to
        chat_id: ChatId,
        /// Notice text
        text: String,
    },

    /// The turn limit halted an automatic response.
    TurnLimitReached {
        /// Chat where the chain stopped
        chat_id: ChatId,
        /// Addressee whose response was halted
        agent_id: AgentId,
        /// The world's configured limit
        limit: u32,
    },

    /// The world's runtime was torn down.
    WorldClosed {
        /// Id of the closed world
        world_id: WorldId,
    },
}

impl WorldEvent {
    /// Get the event type as a string for logging/debugging.
    pub fn event_type(&self) -> &'static str {
        match self {
            WorldEvent::MessageCreated { .. } => "MessageCreated",
            WorldEvent::ChatCreated { .. } => "ChatCreated",
            WorldEvent::ChatUpdated { .. } => "ChatUpdated",
            WorldEvent::AgentTurnStarted { .. } => "AgentTurnStarted",
            WorldEvent::AgentTurnCompleted { .. } => "AgentTurnCompleted",
            WorldEvent::ToolCallStarted { .. } => "ToolCallStarted",
            WorldEvent::ToolCallCompleted { .. } => "ToolCallCompleted",
            WorldEvent::ApprovalRequested { .. } => "ApprovalRequested",
            WorldEvent::HitlOptionRequested { .. } => "HitlOptionRequested",
            WorldEvent::SystemNotice { .. } => "SystemNotice",
            WorldEvent::TurnLimitReached { .. } => "TurnLimitReached",
            WorldEvent::WorldClosed { .. } => "WorldClosed",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
