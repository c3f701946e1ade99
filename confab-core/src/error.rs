//! Error types for CONFAB operations

use crate::{AgentId, ChatId, EntityKind, MessageId, WorldId};
use thiserror::Error;

/// Maximum depth of a reply chain before validation rejects the write.
pub const MAX_THREAD_DEPTH: usize = 100;

/// World lifecycle errors.
///
/// Lifecycle errors are fatal to the operation that triggered them (a
/// subscribe call, a publish) and leave registry state clean: a failed load
/// retains no half-initialized entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Failed to load world {world_id}: {reason}")]
    LoadFailed { world_id: WorldId, reason: String },

    #[error("World {world_id} actor stopped")]
    ActorStopped { world_id: WorldId },

    #[error("World {world_id} is not loaded")]
    NotLoaded { world_id: WorldId },
}

/// Reply-thread integrity errors.
///
/// Raised before a message is persisted; an invalid reply edge never reaches
/// chat history.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ThreadError {
    #[error("Message {message_id} cannot reply to itself")]
    SelfReference { message_id: MessageId },

    #[error("Circular reference detected in reply chain at {message_id}")]
    CircularReference { message_id: MessageId },

    #[error("Thread depth exceeds maximum of {max} (reached {depth})")]
    DepthExceeded { depth: usize, max: usize },
}

/// Routing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: AgentId },

    #[error("Chat not found: {chat_id}")]
    ChatNotFound { chat_id: ChatId },

    #[error("No chat is active in world {world_id}")]
    NoActiveChat { world_id: WorldId },
}

/// Tool-approval errors.
///
/// An approval *requirement* is not an error (the gate reports it as a
/// check outcome); these cover malformed decision delivery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("No pending approval request with id {request_id}")]
    UnknownRequest { request_id: String },

    #[error("Invalid approval decision: {reason}")]
    InvalidDecision { reason: String },
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No chat provider configured")]
    NotConfigured,

    #[error("Request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Tool {tool_name} failed: {reason}")]
    ToolFailed { tool_name: String, reason: String },

    #[error("Tool not registered: {tool_name}")]
    ToolNotRegistered { tool_name: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_kind:?} with id {id}")]
    NotFound { entity_kind: EntityKind, id: String },

    #[error("Save failed for {entity_kind:?}: {reason}")]
    SaveFailed { entity_kind: EntityKind, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all CONFAB errors.
#[derive(Debug, Clone, Error)]
pub enum ConfabError {
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Thread error: {0}")]
    Thread(#[from] ThreadError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for CONFAB operations.
pub type ConfabResult<T> = Result<T, ConfabError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_message_id;

    #[test]
    fn test_thread_error_display_self_reference() {
        let id = new_message_id();
        let err = ThreadError::SelfReference { message_id: id };
        let msg = format!("{}", err);
        assert!(msg.contains("cannot reply to itself"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_thread_error_display_circular() {
        let err = ThreadError::CircularReference {
            message_id: new_message_id(),
        };
        assert!(format!("{}", err).contains("Circular reference detected"));
    }

    #[test]
    fn test_thread_error_display_depth() {
        let err = ThreadError::DepthExceeded {
            depth: 101,
            max: MAX_THREAD_DEPTH,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("depth exceeds maximum"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_lifecycle_error_display_load_failed() {
        let err = LifecycleError::LoadFailed {
            world_id: WorldId::new("alpha"),
            reason: "storage offline".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("alpha"));
        assert!(msg.contains("storage offline"));
    }

    #[test]
    fn test_confab_error_from_variants() {
        let lifecycle = ConfabError::from(LifecycleError::NotLoaded {
            world_id: WorldId::new("w"),
        });
        assert!(matches!(lifecycle, ConfabError::Lifecycle(_)));

        let thread = ConfabError::from(ThreadError::DepthExceeded {
            depth: 101,
            max: MAX_THREAD_DEPTH,
        });
        assert!(matches!(thread, ConfabError::Thread(_)));

        let provider = ConfabError::from(ProviderError::NotConfigured);
        assert!(matches!(provider, ConfabError::Provider(_)));

        let storage = ConfabError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, ConfabError::Storage(_)));

        let config = ConfabError::from(ConfigError::MissingRequired {
            field: "model".to_string(),
        });
        assert!(matches!(config, ConfabError::Config(_)));
    }
}
