//! CONFAB Core - Entity Types
//!
//! Pure data structures for the conversation orchestrator. All other crates
//! depend on this. This crate contains data types, the error taxonomy, and
//! configuration - no I/O and no orchestration logic.

mod config;
mod entities;
mod enums;
mod error;
mod identity;
mod message;

pub use config::{ToolServerConfig, WorldConfig, CONFIG_PATH_ENV, DEFAULT_TURN_LIMIT};
pub use entities::{Agent, Chat, World, DEFAULT_CHAT_NAME};
pub use enums::{
    ApprovalDecision, ApprovalScope, EntityKind, MessageRole, MessageRoleParseError, SenderKind,
};
pub use error::{
    ApprovalError, ConfabError, ConfabResult, ConfigError, LifecycleError, ProviderError,
    RoutingError, StorageError, ThreadError, MAX_THREAD_DEPTH,
};
pub use identity::{
    new_chat_id, new_message_id, AgentId, ChatId, MessageId, Timestamp, WorldId,
};
pub use message::{
    ApprovalDecisionRecord, Message, MessageContent, Sender, ToolCallRequest, ToolResultPayload,
    SYSTEM_SENDER_ID,
};
