//! Subscriber-facing handles.
//!
//! A successful subscribe yields a [`WorldSubscription`]: the shared
//! [`WorldHandle`] plus an idempotent unsubscribe. Every handle operation is
//! enqueued on the world's mailbox and processed in FIFO order by its actor.

use crate::actor::{MessageDraft, WorldMsg};
use confab_approval::{ApprovalResponse, HitlOptionRequest};
use confab_core::{
    Agent, AgentId, Chat, ChatId, ConfabResult, LifecycleError, Message, MessageId, WorldId,
};
use confab_events::{WorldChannel, WorldEvent};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Diagnostic snapshot of one world's registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryState {
    /// Number of live subscribers
    pub ref_count: usize,
    /// Whether the world's runtime state is loaded
    pub loaded: bool,
}

impl RegistryState {
    /// The state of an id with no registry entry.
    pub fn absent() -> Self {
        Self {
            ref_count: 0,
            loaded: false,
        }
    }
}

/// Shared handle to a loaded world's runtime.
///
/// Cloneable; all clones address the same mailbox actor.
#[derive(Clone)]
pub struct WorldHandle {
    world_id: WorldId,
    tx: mpsc::UnboundedSender<WorldMsg>,
    channel: WorldChannel,
}

impl WorldHandle {
    pub(crate) fn new(
        world_id: WorldId,
        tx: mpsc::UnboundedSender<WorldMsg>,
        channel: WorldChannel,
    ) -> Self {
        Self {
            world_id,
            tx,
            channel,
        }
    }

    /// Id of the world this handle addresses.
    pub fn world_id(&self) -> &WorldId {
        &self.world_id
    }

    /// Subscribe to the world's event stream.
    ///
    /// Dropping the receiver detaches the listener.
    pub fn events(&self) -> broadcast::Receiver<WorldEvent> {
        self.channel.subscribe()
    }

    /// Number of event listeners currently attached to the world's channel.
    pub fn listener_count(&self) -> usize {
        self.channel.receiver_count()
    }

    /// Publish a message draft into the world.
    ///
    /// The draft is validated, persisted, broadcast, and routed during the
    /// actor's processing turn; the returned id identifies the persisted
    /// message.
    pub async fn publish(&self, draft: MessageDraft) -> ConfabResult<MessageId> {
        self.call(|reply| WorldMsg::Publish { draft, reply }).await
    }

    /// Publish plain human text into the current chat.
    pub async fn publish_human(&self, sender_id: &str, text: &str) -> ConfabResult<MessageId> {
        self.publish(MessageDraft::human(sender_id, text)).await
    }

    /// Start (or reuse) a chat and make it current.
    pub async fn start_chat(&self, name: Option<&str>) -> ConfabResult<ChatId> {
        let name = name.map(str::to_string);
        self.call(|reply| WorldMsg::StartChat { name, reply }).await
    }

    /// Add an agent to the world.
    pub async fn add_agent(&self, agent: Agent) -> ConfabResult<()> {
        self.call(|reply| WorldMsg::AddAgent { agent, reply }).await
    }

    /// Remove an agent from the world.
    pub async fn remove_agent(&self, agent_id: &AgentId) -> ConfabResult<()> {
        let agent_id = agent_id.clone();
        self.call(|reply| WorldMsg::RemoveAgent { agent_id, reply })
            .await
    }

    /// List the world's chats, oldest first.
    pub async fn list_chats(&self) -> ConfabResult<Vec<Chat>> {
        self.call(|reply| WorldMsg::ListChats { reply }).await
    }

    /// Snapshot an agent's private memory.
    pub async fn agent_memory(&self, agent_id: &AgentId) -> ConfabResult<Vec<Message>> {
        let agent_id = agent_id.clone();
        self.call(|reply| WorldMsg::AgentMemory { agent_id, reply })
            .await
    }

    /// Clear an agent's private memory, returning the archived messages.
    pub async fn clear_agent_memory(&self, agent_id: &AgentId) -> ConfabResult<Vec<Message>> {
        let agent_id = agent_id.clone();
        self.call(|reply| WorldMsg::ClearAgentMemory { agent_id, reply })
            .await
    }

    /// Deliver a human decision for a pending tool-approval request.
    ///
    /// Resumes or cancels the suspended tool call.
    pub async fn deliver_approval(&self, response: ApprovalResponse) -> ConfabResult<()> {
        self.call(|reply| WorldMsg::DeliverApproval { response, reply })
            .await
    }

    /// Surface a generalized option prompt to event subscribers.
    ///
    /// Returns the request id the eventual choice should echo.
    pub async fn prompt_options(&self, request: HitlOptionRequest) -> ConfabResult<String> {
        self.call(|reply| WorldMsg::PromptOptions { request, reply })
            .await
    }

    pub(crate) fn mailbox(&self) -> &mpsc::UnboundedSender<WorldMsg> {
        &self.tx
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<ConfabResult<T>>) -> WorldMsg,
    ) -> ConfabResult<T> {
        let stopped = || LifecycleError::ActorStopped {
            world_id: self.world_id.clone(),
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).map_err(|_| stopped())?;
        reply_rx.await.map_err(|_| stopped())?
    }
}

/// A live subscription to a world.
///
/// Holds the shared handle; `unsubscribe` (or dropping the subscription)
/// releases this subscriber's reference. Unsubscribing is idempotent: only
/// the first call decrements the world's refcount.
pub struct WorldSubscription {
    handle: WorldHandle,
    released: bool,
}

impl WorldSubscription {
    pub(crate) fn new(handle: WorldHandle) -> Self {
        Self {
            handle,
            released: false,
        }
    }

    /// The shared world handle.
    pub fn handle(&self) -> &WorldHandle {
        &self.handle
    }

    /// Release this subscriber's reference.
    ///
    /// Safe to call repeatedly; only the first call counts. When the last
    /// subscriber releases, the world's runtime is torn down and the id is
    /// evicted from the registry.
    pub fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.handle.mailbox().send(WorldMsg::Unsubscribe);
    }
}

impl Drop for WorldSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::ops::Deref for WorldSubscription {
    type Target = WorldHandle;

    fn deref(&self) -> &WorldHandle {
        &self.handle
    }
}
