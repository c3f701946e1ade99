//! CONFAB Storage - Storage Contract and In-Memory Implementation
//!
//! Defines the persistence seam the runtime consumes. The core never touches
//! on-disk formats; file or database backends implement [`WorldStore`]
//! elsewhere. The in-memory store here backs tests and embedded use.

use ::async_trait::async_trait;
use confab_core::{
    Agent, AgentId, Chat, ChatId, ConfabResult, EntityKind, Message, StorageError, World, WorldId,
};
use confab_events::WorldEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

// ============================================================================
// CHAT DATA AND UPDATE TYPES
// ============================================================================

/// A chat together with its ordered message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatData {
    /// The chat record
    pub chat: Chat,
    /// Messages in persistence order
    pub messages: Vec<Message>,
}

impl ChatData {
    /// Wrap an empty chat.
    pub fn new(chat: Chat) -> Self {
        Self {
            chat,
            messages: Vec::new(),
        }
    }
}

/// Partial update for persisted chat data.
#[derive(Debug, Clone, Default)]
pub struct ChatDataUpdate {
    /// New display name
    pub name: Option<String>,
    /// Messages to append, in order
    pub append: Vec<Message>,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Async storage contract for CONFAB entities.
///
/// Implementations provide persistence for worlds, agents, chat data, and the
/// per-chat event log. All methods are cancel-safe reads or single writes.
#[async_trait]
pub trait WorldStore: Send + Sync {
    // === World Operations ===

    /// Load a world by id.
    async fn load_world(&self, world_id: &WorldId) -> ConfabResult<Option<World>>;

    /// Save a world, replacing any existing record.
    async fn save_world(&self, world: &World) -> ConfabResult<()>;

    /// Delete a world and everything scoped to it.
    async fn delete_world(&self, world_id: &WorldId) -> ConfabResult<()>;

    // === Agent Operations ===

    /// Load an agent by id.
    async fn load_agent(
        &self,
        world_id: &WorldId,
        agent_id: &AgentId,
    ) -> ConfabResult<Option<Agent>>;

    /// Save an agent, replacing any existing record.
    async fn save_agent(&self, world_id: &WorldId, agent: &Agent) -> ConfabResult<()>;

    // === Chat Operations ===

    /// Load a chat with its message history.
    async fn load_chat_data(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
    ) -> ConfabResult<Option<ChatData>>;

    /// Save chat data, replacing any existing record.
    async fn save_chat_data(&self, world_id: &WorldId, data: &ChatData) -> ConfabResult<()>;

    /// Apply a partial update to existing chat data.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when the chat does not exist.
    async fn update_chat_data(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
        update: ChatDataUpdate,
    ) -> ConfabResult<()>;

    // === Event Log ===

    /// Append an event to a chat's log.
    async fn append_event(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
        event: WorldEvent,
    ) -> ConfabResult<()>;

    /// Events recorded for a chat, in append order.
    async fn events_by_world_and_chat(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
    ) -> ConfabResult<Vec<WorldEvent>>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    worlds: HashMap<WorldId, World>,
    agents: HashMap<(WorldId, AgentId), Agent>,
    chats: HashMap<(WorldId, ChatId), ChatData>,
    events: HashMap<(WorldId, ChatId), Vec<WorldEvent>>,
}

/// In-memory [`WorldStore`] implementation.
///
/// Backs tests and embedded single-process deployments. Clones on read so
/// callers never observe later mutations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorldStore for MemoryStore {
    async fn load_world(&self, world_id: &WorldId) -> ConfabResult<Option<World>> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.worlds.get(world_id).cloned())
    }

    async fn save_world(&self, world: &World) -> ConfabResult<()> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        inner.worlds.insert(world.id.clone(), world.clone());
        Ok(())
    }

    async fn delete_world(&self, world_id: &WorldId) -> ConfabResult<()> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        inner.worlds.remove(world_id);
        inner.agents.retain(|(w, _), _| w != world_id);
        inner.chats.retain(|(w, _), _| w != world_id);
        inner.events.retain(|(w, _), _| w != world_id);
        Ok(())
    }

    async fn load_agent(
        &self,
        world_id: &WorldId,
        agent_id: &AgentId,
    ) -> ConfabResult<Option<Agent>> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner
            .agents
            .get(&(world_id.clone(), agent_id.clone()))
            .cloned())
    }

    async fn save_agent(&self, world_id: &WorldId, agent: &Agent) -> ConfabResult<()> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        inner
            .agents
            .insert((world_id.clone(), agent.id.clone()), agent.clone());
        Ok(())
    }

    async fn load_chat_data(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
    ) -> ConfabResult<Option<ChatData>> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.chats.get(&(world_id.clone(), *chat_id)).cloned())
    }

    async fn save_chat_data(&self, world_id: &WorldId, data: &ChatData) -> ConfabResult<()> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        inner
            .chats
            .insert((world_id.clone(), data.chat.chat_id), data.clone());
        Ok(())
    }

    async fn update_chat_data(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
        update: ChatDataUpdate,
    ) -> ConfabResult<()> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let data = inner
            .chats
            .get_mut(&(world_id.clone(), *chat_id))
            .ok_or_else(|| StorageError::NotFound {
                entity_kind: EntityKind::Chat,
                id: chat_id.to_string(),
            })?;

        if let Some(name) = update.name {
            data.chat.rename(&name);
        }
        for message in update.append {
            data.chat.record_message();
            data.messages.push(message);
        }
        Ok(())
    }

    async fn append_event(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
        event: WorldEvent,
    ) -> ConfabResult<()> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        inner
            .events
            .entry((world_id.clone(), *chat_id))
            .or_default()
            .push(event);
        Ok(())
    }

    async fn events_by_world_and_chat(
        &self,
        world_id: &WorldId,
        chat_id: &ChatId,
    ) -> ConfabResult<Vec<WorldEvent>> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner
            .events
            .get(&(world_id.clone(), *chat_id))
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// TESTS
// =============================================================================
