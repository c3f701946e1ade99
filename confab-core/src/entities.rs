//! World, agent, and chat entities.

use crate::{AgentId, ChatId, Message, Timestamp, WorldConfig, WorldId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Placeholder name given to a newly created chat. A chat keeping this name
/// with zero messages is considered fresh and may be reused instead of
/// allocating another id.
pub const DEFAULT_CHAT_NAME: &str = "New Chat";

/// An autonomous agent owned by a world.
///
/// The agent's `memory` is its private conversation record: append-only while
/// the agent processes messages addressed to it, until explicitly cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique id within the world; doubles as the mention name
    pub id: AgentId,
    /// Display name
    pub name: String,
    /// Type tag (e.g., "assistant", "moderator")
    pub agent_type: String,
    /// LLM provider reference
    pub provider: String,
    /// Model reference
    pub model: String,
    /// System prompt prepended to every completion
    pub system_prompt: String,
    /// Private ordered memory
    pub memory: Vec<Message>,
    /// Whether outgoing text gets an addressing prefix added automatically
    pub auto_reply: bool,
    /// Number of completions this agent has produced
    pub call_count: u64,
    /// When the agent was created
    pub created_at: Timestamp,
    /// Last time the agent processed a message
    pub last_active: Option<Timestamp>,
}

impl Agent {
    /// Create a new agent with empty memory and auto-reply enabled.
    pub fn new(id: impl Into<AgentId>, name: &str, provider: &str, model: &str) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            agent_type: "assistant".to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            system_prompt: String::new(),
            memory: Vec::new(),
            auto_reply: true,
            call_count: 0,
            created_at: Utc::now(),
            last_active: None,
        }
    }

    /// Set the type tag.
    pub fn with_type(mut self, agent_type: &str) -> Self {
        self.agent_type = agent_type.to_string();
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Disable automatic addressing of replies.
    pub fn without_auto_reply(mut self) -> Self {
        self.auto_reply = false;
        self
    }

    /// Append a message to private memory.
    pub fn append_memory(&mut self, message: Message) {
        self.memory.push(message);
    }

    /// Clear private memory, returning the archived messages.
    pub fn clear_memory(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.memory)
    }

    /// Record a completed provider call.
    pub fn record_call(&mut self) {
        self.call_count += 1;
        self.last_active = Some(Utc::now());
    }
}

/// A chat session inside a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Unique identifier
    pub chat_id: ChatId,
    /// Owning world
    pub world_id: WorldId,
    /// Display name
    pub name: String,
    /// Number of persisted messages
    pub message_count: u64,
    /// When the chat was created
    pub created_at: Timestamp,
    /// Last time a message was persisted or the chat renamed
    pub updated_at: Timestamp,
}

impl Chat {
    /// Create a fresh chat with the default placeholder name.
    pub fn new(world_id: WorldId) -> Self {
        let now = Utc::now();
        Self {
            chat_id: crate::new_chat_id(),
            world_id,
            name: DEFAULT_CHAT_NAME.to_string(),
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a chat with an explicit name.
    pub fn named(world_id: WorldId, name: &str) -> Self {
        let mut chat = Self::new(world_id);
        chat.name = name.to_string();
        chat
    }

    /// A chat is reusable iff it holds no messages and still carries the
    /// default placeholder name. Starting a "new chat" reuses such a chat
    /// rather than allocating another id.
    pub fn is_reusable(&self) -> bool {
        self.message_count == 0 && self.name == DEFAULT_CHAT_NAME
    }

    /// Record a persisted message.
    pub fn record_message(&mut self) {
        self.message_count += 1;
        self.updated_at = Utc::now();
    }

    /// Rename the chat.
    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
        self.updated_at = Utc::now();
    }
}

/// An isolated conversation universe: agents, chats, and configuration.
///
/// Exactly one in-memory instance exists per active id, owned by the world
/// lifecycle registry. All mutation happens inside that world's mailbox turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    /// Unique identifier
    pub id: WorldId,
    /// Display name
    pub name: String,
    /// Max consecutive agent-to-agent exchanges before forced stop
    pub turn_limit: u32,
    /// Chat currently receiving messages, if any
    pub current_chat_id: Option<ChatId>,
    /// Agents owned by this world
    pub agents: HashMap<AgentId, Agent>,
    /// Chats owned by this world
    pub chats: HashMap<ChatId, Chat>,
    /// Provider/model defaults and optional tool-server config
    pub config: WorldConfig,
    /// When the world was created
    pub created_at: Timestamp,
}

impl World {
    /// Create an empty world from a validated config.
    pub fn new(id: impl Into<WorldId>, name: &str, config: WorldConfig) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            turn_limit: config.turn_limit,
            current_chat_id: None,
            agents: HashMap::new(),
            chats: HashMap::new(),
            config,
            created_at: Utc::now(),
        }
    }

    /// Add an agent, replacing any agent with the same id.
    pub fn add_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Remove an agent by id.
    pub fn remove_agent(&mut self, id: &AgentId) -> Option<Agent> {
        self.agents.remove(id)
    }

    /// Look up an agent by id.
    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Look up an agent mutably.
    pub fn agent_mut(&mut self, id: &AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    /// Add a chat.
    pub fn add_chat(&mut self, chat: Chat) {
        self.chats.insert(chat.chat_id, chat);
    }

    /// Look up a chat by id.
    pub fn chat(&self, id: &ChatId) -> Option<&Chat> {
        self.chats.get(id)
    }

    /// Look up a chat mutably.
    pub fn chat_mut(&mut self, id: &ChatId) -> Option<&mut Chat> {
        self.chats.get_mut(id)
    }

    /// Find a reusable chat (zero messages, placeholder name), if any.
    pub fn find_reusable_chat(&self) -> Option<ChatId> {
        self.chats
            .values()
            .find(|c| c.is_reusable())
            .map(|c| c.chat_id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageRole, Sender};

    fn test_config() -> WorldConfig {
        WorldConfig::for_model("mock", "mock-model")
    }

    #[test]
    fn test_chat_reusable_only_when_fresh() {
        let mut chat = Chat::new(WorldId::new("w"));
        assert!(chat.is_reusable());

        chat.record_message();
        assert!(!chat.is_reusable());

        let mut renamed = Chat::new(WorldId::new("w"));
        renamed.rename("Planning");
        assert!(!renamed.is_reusable());
    }

    #[test]
    fn test_world_find_reusable_chat() {
        let mut world = World::new("w", "World", test_config());
        assert_eq!(world.find_reusable_chat(), None);

        let chat = Chat::new(world.id.clone());
        let fresh_id = chat.chat_id;
        world.add_chat(chat);
        assert_eq!(world.find_reusable_chat(), Some(fresh_id));

        world.chat_mut(&fresh_id).unwrap().record_message();
        assert_eq!(world.find_reusable_chat(), None);
    }

    #[test]
    fn test_agent_memory_append_and_clear() {
        let mut agent = Agent::new("gm", "Game Master", "mock", "mock-model");
        let chat_id = crate::new_chat_id();
        agent.append_memory(Message::text(
            chat_id,
            Sender::human("alice"),
            MessageRole::User,
            "hi",
        ));
        assert_eq!(agent.memory.len(), 1);

        let archived = agent.clear_memory();
        assert_eq!(archived.len(), 1);
        assert!(agent.memory.is_empty());
    }

    #[test]
    fn test_agent_record_call() {
        let mut agent = Agent::new("gm", "Game Master", "mock", "mock-model");
        assert_eq!(agent.call_count, 0);
        assert!(agent.last_active.is_none());

        agent.record_call();
        assert_eq!(agent.call_count, 1);
        assert!(agent.last_active.is_some());
    }

    #[test]
    fn test_world_agent_lookup_is_case_insensitive_via_id() {
        let mut world = World::new("w", "World", test_config());
        world.add_agent(Agent::new("GM", "Game Master", "mock", "mock-model"));
        assert!(world.agent(&AgentId::new("gm")).is_some());
    }
}
