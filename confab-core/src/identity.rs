//! Identity types for CONFAB entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Chat identifier using UUIDv7 for timestamp-sortable IDs.
pub type ChatId = Uuid;

/// Message identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type MessageId = Uuid;

/// Generate a new UUIDv7 ChatId (timestamp-sortable).
pub fn new_chat_id() -> ChatId {
    Uuid::now_v7()
}

/// Generate a new UUIDv7 MessageId (timestamp-sortable).
pub fn new_message_id() -> MessageId {
    Uuid::now_v7()
}

/// Identifier of a world: the unit of isolation.
///
/// World ids are normalized on construction (trimmed, lower-cased) so that
/// registry lookups never depend on caller formatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(String);

impl WorldId {
    /// Create a normalized world id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    /// The normalized id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorldId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of an agent within a world.
///
/// The agent id doubles as the mention name: a message containing `@gm` at a
/// paragraph start addresses the agent with id `gm`. Ids are normalized the
/// same way mentions are (lower-cased), so comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create a normalized agent id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    /// The normalized id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_is_v7() {
        let id = new_message_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_message_ids_are_sortable() {
        let id1 = new_message_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = new_message_id();
        // UUIDv7 should be lexicographically sortable by time
        assert!(id1.to_string() < id2.to_string());
    }

    #[test]
    fn test_agent_id_normalization() {
        assert_eq!(AgentId::new("  GM "), AgentId::new("gm"));
        assert_eq!(AgentId::new("Pro").as_str(), "pro");
    }

    #[test]
    fn test_world_id_normalization() {
        assert_eq!(WorldId::new("My-World").as_str(), "my-world");
        assert_eq!(WorldId::from("  alpha  "), WorldId::new("alpha"));
    }
}
