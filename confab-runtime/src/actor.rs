//! Per-world mailbox actor.
//!
//! Every externally-visible operation on a world is enqueued as a message
//! and processed one at a time by the world's actor task, so refcounting,
//! load, teardown, routing, and approval handling never race. Long-running
//! work (provider completions, tool execution) runs in spawned tasks whose
//! results re-enter the mailbox, so a slow agent never blocks the world and
//! a suspended approval never blocks other agents.

use crate::handle::{RegistryState, WorldHandle};
use crate::registry::RegistryInner;
use confab_approval::{ApprovalRequest, ApprovalResponse, HitlOptionRequest};
use confab_core::{
    Agent, AgentId, ApprovalDecision, ApprovalError, Chat, ChatId, ConfabResult, LifecycleError,
    Message, MessageId, MessageRole, RoutingError, Sender, SenderKind, ToolCallRequest, World,
    WorldId,
};
use confab_events::{thread, WorldChannel, WorldEvent};
use confab_llm::{ChatTurn, CompletionRequest, CompletionResponse, ToolDescriptor};
use confab_routing::{extract_paragraph_mentions, prepare_agent_reply, should_respond, TurnCounter};
use confab_storage::{ChatData, ChatDataUpdate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// A message submitted for publication.
///
/// The actor resolves the target chat (current chat when unset), assigns the
/// message id, validates the reply edge, persists, broadcasts, and routes.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    /// Target chat; the world's current chat when `None`
    pub chat_id: Option<ChatId>,
    /// Who is sending
    pub sender: Sender,
    /// Conversation role
    pub role: MessageRole,
    /// Plain text content
    pub text: String,
    /// Optional reply edge
    pub reply_to: Option<MessageId>,
}

impl MessageDraft {
    /// A human user message for the current chat.
    pub fn human(sender_id: &str, text: &str) -> Self {
        Self {
            chat_id: None,
            sender: Sender::human(sender_id),
            role: MessageRole::User,
            text: text.to_string(),
            reply_to: None,
        }
    }

    /// Target a specific chat.
    pub fn in_chat(mut self, chat_id: ChatId) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    /// Attach a reply edge.
    pub fn replying_to(mut self, parent: MessageId) -> Self {
        self.reply_to = Some(parent);
        self
    }
}

/// Context threaded through one agent's asynchronous turn.
#[derive(Debug, Clone)]
pub(crate) struct TurnContext {
    pub agent_id: AgentId,
    pub chat_id: ChatId,
    pub original_sender_id: String,
    pub reply_to: Option<MessageId>,
}

/// A tool call parked until a human decides.
struct PendingToolCall {
    ctx: TurnContext,
    call: ToolCallRequest,
}

/// Mailbox messages for one world actor.
pub(crate) enum WorldMsg {
    Subscribe {
        reply: oneshot::Sender<ConfabResult<WorldHandle>>,
    },
    Unsubscribe,
    GetState {
        reply: oneshot::Sender<RegistryState>,
    },
    Publish {
        draft: MessageDraft,
        reply: oneshot::Sender<ConfabResult<MessageId>>,
    },
    StartChat {
        name: Option<String>,
        reply: oneshot::Sender<ConfabResult<ChatId>>,
    },
    AddAgent {
        agent: Agent,
        reply: oneshot::Sender<ConfabResult<()>>,
    },
    RemoveAgent {
        agent_id: AgentId,
        reply: oneshot::Sender<ConfabResult<()>>,
    },
    ListChats {
        reply: oneshot::Sender<ConfabResult<Vec<Chat>>>,
    },
    AgentMemory {
        agent_id: AgentId,
        reply: oneshot::Sender<ConfabResult<Vec<Message>>>,
    },
    ClearAgentMemory {
        agent_id: AgentId,
        reply: oneshot::Sender<ConfabResult<Vec<Message>>>,
    },
    DeliverApproval {
        response: ApprovalResponse,
        reply: oneshot::Sender<ConfabResult<()>>,
    },
    PromptOptions {
        request: HitlOptionRequest,
        reply: oneshot::Sender<ConfabResult<String>>,
    },
    AgentResult {
        ctx: TurnContext,
        result: ConfabResult<CompletionResponse>,
    },
    ToolOutcome {
        ctx: TurnContext,
        call: ToolCallRequest,
        result: ConfabResult<serde_json::Value>,
    },
}

/// Runtime state of a loaded world.
struct LoadedWorld {
    world: World,
    channel: WorldChannel,
    gate: confab_approval::ApprovalGate,
    turns: TurnCounter,
    histories: HashMap<ChatId, Vec<Message>>,
    pending: HashMap<String, PendingToolCall>,
}

impl LoadedWorld {
    fn new(world: World) -> Self {
        Self {
            world,
            channel: WorldChannel::default(),
            gate: confab_approval::ApprovalGate::new(),
            turns: TurnCounter::new(),
            histories: HashMap::new(),
            pending: HashMap::new(),
        }
    }
}

pub(crate) struct WorldActor {
    world_id: WorldId,
    deps: Arc<RegistryInner>,
    self_tx: mpsc::UnboundedSender<WorldMsg>,
    ref_count: usize,
    loaded: Option<LoadedWorld>,
    registered: bool,
}

impl WorldActor {
    /// Spawn the actor task for a world id and return its mailbox sender.
    pub(crate) fn spawn(
        world_id: WorldId,
        deps: Arc<RegistryInner>,
    ) -> mpsc::UnboundedSender<WorldMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = WorldActor {
            world_id,
            deps,
            self_tx: tx.clone(),
            ref_count: 0,
            loaded: None,
            registered: true,
        };
        tokio::spawn(actor.run(rx));
        tx
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorldMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg).await;
        }
        debug!(world_id = %self.world_id, "world actor exited");
    }

    async fn handle(&mut self, msg: WorldMsg) {
        match msg {
            WorldMsg::Subscribe { reply } => self.handle_subscribe(reply).await,
            WorldMsg::Unsubscribe => self.handle_unsubscribe(),
            WorldMsg::GetState { reply } => {
                let _ = reply.send(RegistryState {
                    ref_count: self.ref_count,
                    loaded: self.loaded.is_some(),
                });
            }
            WorldMsg::Publish { draft, reply } => {
                let result = self.publish_draft(draft).await.map(|m| m.message_id);
                let _ = reply.send(result);
            }
            WorldMsg::StartChat { name, reply } => {
                let result = self.start_chat(name).await;
                let _ = reply.send(result);
            }
            WorldMsg::AddAgent { agent, reply } => {
                let _ = reply.send(self.add_agent(agent).await);
            }
            WorldMsg::RemoveAgent { agent_id, reply } => {
                let _ = reply.send(self.remove_agent(agent_id).await);
            }
            WorldMsg::ListChats { reply } => {
                let result = self.loaded().map(|loaded| {
                    let mut chats: Vec<Chat> = loaded.world.chats.values().cloned().collect();
                    chats.sort_by_key(|c| c.created_at);
                    chats
                });
                let _ = reply.send(result);
            }
            WorldMsg::AgentMemory { agent_id, reply } => {
                let result = self.loaded().and_then(|loaded| {
                    loaded
                        .world
                        .agent(&agent_id)
                        .map(|a| a.memory.clone())
                        .ok_or_else(|| RoutingError::AgentNotFound { agent_id }.into())
                });
                let _ = reply.send(result);
            }
            WorldMsg::ClearAgentMemory { agent_id, reply } => {
                let _ = reply.send(self.clear_agent_memory(agent_id).await);
            }
            WorldMsg::DeliverApproval { response, reply } => {
                let _ = reply.send(self.deliver_approval(response).await);
            }
            WorldMsg::PromptOptions { request, reply } => {
                let result = self.loaded().map(|loaded| {
                    let request_id = request.request_id.clone();
                    loaded
                        .channel
                        .publish(WorldEvent::HitlOptionRequested { request });
                    request_id
                });
                let _ = reply.send(result);
            }
            WorldMsg::AgentResult { ctx, result } => self.handle_agent_result(ctx, result).await,
            WorldMsg::ToolOutcome { ctx, call, result } => {
                self.handle_tool_outcome(ctx, call, result).await
            }
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    async fn handle_subscribe(&mut self, reply: oneshot::Sender<ConfabResult<WorldHandle>>) {
        if !self.registered {
            // This actor was evicted; a newer actor may own the id now.
            let current = self.deps.actor_entry(&self.world_id);
            match current {
                Some(tx) if !tx.same_channel(&self.self_tx) => {
                    let _ = tx.send(WorldMsg::Subscribe { reply });
                    return;
                }
                Some(_) => self.registered = true,
                None => {
                    self.deps.register_actor(&self.world_id, self.self_tx.clone());
                    self.registered = true;
                }
            }
        }

        if self.loaded.is_none() {
            let loader = self.deps.loader.clone();
            match loader.load(&self.world_id).await {
                Ok(world) => {
                    info!(world_id = %self.world_id, "world loaded");
                    self.loaded = Some(LoadedWorld::new(world));
                }
                Err(e) => {
                    // No partial entry survives a loader failure.
                    error!(world_id = %self.world_id, error = %e, "world load failed");
                    if self.ref_count == 0 {
                        self.deps.deregister_actor(&self.world_id, &self.self_tx);
                        self.registered = false;
                    }
                    let _ = reply.send(Err(e));
                    return;
                }
            }
        }

        self.ref_count += 1;
        debug!(world_id = %self.world_id, ref_count = self.ref_count, "subscribed");
        let handle = match self.loaded.as_ref() {
            Some(loaded) => WorldHandle::new(
                self.world_id.clone(),
                self.self_tx.clone(),
                loaded.channel.clone(),
            ),
            None => {
                let _ = reply.send(Err(LifecycleError::NotLoaded {
                    world_id: self.world_id.clone(),
                }
                .into()));
                return;
            }
        };
        let _ = reply.send(Ok(handle));
    }

    fn handle_unsubscribe(&mut self) {
        if self.ref_count == 0 {
            warn!(world_id = %self.world_id, "unsubscribe with zero refcount ignored");
            return;
        }
        self.ref_count -= 1;
        debug!(world_id = %self.world_id, ref_count = self.ref_count, "unsubscribed");
        if self.ref_count == 0 {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            loaded.channel.publish(WorldEvent::WorldClosed {
                world_id: self.world_id.clone(),
            });
            info!(world_id = %self.world_id, "world torn down");
        }
        self.deps.deregister_actor(&self.world_id, &self.self_tx);
        self.registered = false;
    }

    fn loaded(&self) -> ConfabResult<&LoadedWorld> {
        self.loaded.as_ref().ok_or_else(|| {
            LifecycleError::NotLoaded {
                world_id: self.world_id.clone(),
            }
            .into()
        })
    }

    fn loaded_mut(&mut self) -> ConfabResult<&mut LoadedWorld> {
        self.loaded.as_mut().ok_or_else(|| {
            LifecycleError::NotLoaded {
                world_id: self.world_id.clone(),
            }
            .into()
        })
    }

    // ========================================================================
    // PUBLISHING AND ROUTING
    // ========================================================================

    /// Publish a draft: resolve the chat, validate, persist, broadcast,
    /// route. Returns the persisted message.
    async fn publish_draft(&mut self, draft: MessageDraft) -> ConfabResult<Message> {
        let chat_id = match draft.chat_id {
            Some(id) => id,
            None => {
                let current = self.loaded()?.world.current_chat_id;
                match current {
                    Some(id) => id,
                    None => self.start_chat(None).await?,
                }
            }
        };

        let mut message = Message::text(chat_id, draft.sender, draft.role, draft.text);
        message.reply_to = draft.reply_to;

        self.append_message(message.clone()).await?;
        self.route_message(&message).await;
        Ok(message)
    }

    /// Validate, persist, and broadcast one message. Does not route.
    async fn append_message(&mut self, message: Message) -> ConfabResult<()> {
        let chat_id = message.chat_id;
        self.ensure_history(chat_id).await?;

        {
            let loaded = self.loaded()?;
            let history = loaded
                .histories
                .get(&chat_id)
                .ok_or(RoutingError::ChatNotFound { chat_id })?;
            thread::validate_reply(&message, history)?;
        }

        let store = self.deps.store.clone();
        store
            .update_chat_data(
                &self.world_id,
                &chat_id,
                ChatDataUpdate {
                    name: None,
                    append: vec![message.clone()],
                },
            )
            .await?;
        store
            .append_event(
                &self.world_id,
                &chat_id,
                WorldEvent::MessageCreated {
                    message: message.clone(),
                },
            )
            .await?;

        let loaded = self.loaded_mut()?;
        if let Some(chat) = loaded.world.chat_mut(&chat_id) {
            chat.record_message();
        }
        if let Some(history) = loaded.histories.get_mut(&chat_id) {
            history.push(message.clone());
        }
        loaded.turns.record(message.sender.kind);
        loaded.channel.publish(WorldEvent::MessageCreated { message });
        Ok(())
    }

    /// Load (or create) a chat's history mirror from storage.
    async fn ensure_history(&mut self, chat_id: ChatId) -> ConfabResult<()> {
        {
            let loaded = self.loaded()?;
            if !loaded.world.chats.contains_key(&chat_id) {
                return Err(RoutingError::ChatNotFound { chat_id }.into());
            }
            if loaded.histories.contains_key(&chat_id) {
                return Ok(());
            }
        }

        let store = self.deps.store.clone();
        let messages = match store.load_chat_data(&self.world_id, &chat_id).await? {
            Some(data) => data.messages,
            None => {
                let chat = self
                    .loaded()?
                    .world
                    .chat(&chat_id)
                    .cloned()
                    .ok_or(RoutingError::ChatNotFound { chat_id })?;
                store
                    .save_chat_data(&self.world_id, &ChatData::new(chat))
                    .await?;
                Vec::new()
            }
        };
        self.loaded_mut()?.histories.insert(chat_id, messages);
        Ok(())
    }

    /// Decide which agents must react to a published message and dispatch
    /// their turns. Turn-limit checks run per addressee at dispatch time.
    async fn route_message(&mut self, message: &Message) {
        if message.sender.kind == SenderKind::System {
            return;
        }
        let Some(text) = message.text_content().map(str::to_string) else {
            return;
        };

        let addressees: Vec<AgentId> = {
            let Ok(loaded) = self.loaded() else { return };
            let paragraph = extract_paragraph_mentions(&text);
            let mut out = Vec::new();
            if paragraph.is_empty() {
                // Broadcast candidates in id order for deterministic dispatch.
                let mut ids: Vec<AgentId> = loaded.world.agents.keys().cloned().collect();
                ids.sort();
                for id in ids {
                    if should_respond(&id, &message.sender, &text) {
                        out.push(id);
                    }
                }
            } else {
                let mut seen = HashSet::new();
                for name in paragraph {
                    if !seen.insert(name.clone()) {
                        continue;
                    }
                    let id = AgentId::new(&name);
                    if loaded.world.agents.contains_key(&id)
                        && should_respond(&id, &message.sender, &text)
                    {
                        out.push(id);
                    }
                }
            }
            out
        };

        let mut limit_notice_sent = false;
        for agent_id in addressees {
            if message.sender.is_agent() {
                let Ok(loaded) = self.loaded() else { return };
                let limit = loaded.world.turn_limit;
                if loaded.turns.limit_reached(limit) {
                    warn!(
                        world_id = %self.world_id,
                        agent_id = %agent_id,
                        limit,
                        "turn limit reached; halting automatic response"
                    );
                    let event = WorldEvent::TurnLimitReached {
                        chat_id: message.chat_id,
                        agent_id: agent_id.clone(),
                        limit,
                    };
                    loaded.channel.publish(event.clone());
                    if let Err(e) = self
                        .deps
                        .store
                        .append_event(&self.world_id, &message.chat_id, event)
                        .await
                    {
                        error!(error = %e, "failed to record turn-limit event");
                    }
                    if !limit_notice_sent {
                        self.system_notice(
                            message.chat_id,
                            format!(
                                "Turn limit of {} consecutive agent replies reached. \
                                 Waiting for a human message.",
                                limit
                            ),
                        )
                        .await;
                        limit_notice_sent = true;
                    }
                    continue;
                }
            }
            self.dispatch_turn(agent_id, message).await;
        }
    }

    /// Begin one agent's turn: append the inbound message to its memory and
    /// spawn the completion.
    async fn dispatch_turn(&mut self, agent_id: AgentId, inbound: &Message) {
        let ctx = TurnContext {
            agent_id: agent_id.clone(),
            chat_id: inbound.chat_id,
            original_sender_id: inbound.sender.id.clone(),
            reply_to: Some(inbound.message_id),
        };

        {
            let Ok(loaded) = self.loaded_mut() else { return };
            let Some(agent) = loaded.world.agent_mut(&agent_id) else {
                warn!(agent_id = %agent_id, "addressed agent missing from world");
                return;
            };
            agent.append_memory(inbound.clone());
        }
        self.spawn_completion(ctx).await;
    }

    /// Spawn a provider completion for the agent's current memory. The
    /// result re-enters the mailbox as `AgentResult`.
    async fn spawn_completion(&mut self, ctx: TurnContext) {
        let built = {
            let Ok(loaded) = self.loaded() else { return };
            let Some(agent) = loaded.world.agent(&ctx.agent_id) else {
                warn!(agent_id = %ctx.agent_id, "agent vanished before completion");
                return;
            };
            let config = &loaded.world.config;
            let provider_id = if agent.provider.is_empty() {
                config.default_provider.clone()
            } else {
                agent.provider.clone()
            };
            let model = if agent.model.is_empty() {
                config.default_model.clone()
            } else {
                agent.model.clone()
            };
            let system_prompt = if agent.system_prompt.is_empty() {
                None
            } else {
                Some(agent.system_prompt.clone())
            };
            let request = CompletionRequest {
                model,
                system_prompt,
                messages: memory_to_turns(agent),
                tools: self.available_tools(&loaded.world),
            };
            (provider_id, request)
        };
        let (provider_id, request) = built;

        let provider = match self.deps.providers.provider(&provider_id) {
            Ok(provider) => provider,
            Err(e) => {
                self.system_notice(
                    ctx.chat_id,
                    format!("Agent {} cannot reply: {}", ctx.agent_id, e),
                )
                .await;
                return;
            }
        };

        if let Ok(loaded) = self.loaded() {
            loaded.channel.publish(WorldEvent::AgentTurnStarted {
                agent_id: ctx.agent_id.clone(),
                chat_id: ctx.chat_id,
            });
        }

        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = provider.complete(&request).await;
            let _ = tx.send(WorldMsg::AgentResult { ctx, result });
        });
    }

    /// Tools offered to completions, filtered by the world's tool-server
    /// allowlist when one is configured.
    fn available_tools(&self, world: &World) -> Vec<ToolDescriptor> {
        let Some(executor) = self.deps.providers.tool_executor() else {
            return Vec::new();
        };
        let mut tools = executor.available_tools();
        if let Some(tool_server) = &world.config.tool_server {
            if !tool_server.allowed_tools.is_empty() {
                tools.retain(|t| tool_server.allowed_tools.contains(&t.name));
            }
        }
        tools
    }

    // ========================================================================
    // AGENT TURN RESULTS
    // ========================================================================

    async fn handle_agent_result(
        &mut self,
        ctx: TurnContext,
        result: ConfabResult<CompletionResponse>,
    ) {
        if self.loaded.is_none() {
            debug!(agent_id = %ctx.agent_id, "agent result ignored; world unloaded");
            return;
        }

        match result {
            Err(e) => {
                // Provider failures become visible chat notices, never stalls.
                self.system_notice(
                    ctx.chat_id,
                    format!("Agent {} failed: {}", ctx.agent_id, e),
                )
                .await;
                self.finish_turn(&ctx);
            }
            Ok(response) if response.wants_tools() => {
                let calls = response.tool_calls.clone();
                let message =
                    Message::tool_calls(ctx.chat_id, Sender::agent(&ctx.agent_id), calls.clone());
                if let Err(e) = self.append_message(message.clone()).await {
                    self.system_notice(
                        ctx.chat_id,
                        format!("Failed to record tool request from {}: {}", ctx.agent_id, e),
                    )
                    .await;
                    self.finish_turn(&ctx);
                    return;
                }
                if let Ok(loaded) = self.loaded_mut() {
                    if let Some(agent) = loaded.world.agent_mut(&ctx.agent_id) {
                        agent.append_memory(message);
                    }
                }
                for call in calls {
                    self.process_tool_call(&ctx, call).await;
                }
            }
            Ok(response) => {
                let text = response.text.unwrap_or_default();
                if text.trim().is_empty() {
                    debug!(agent_id = %ctx.agent_id, "empty completion");
                    self.finish_turn(&ctx);
                    return;
                }

                let auto_reply = self
                    .loaded()
                    .ok()
                    .and_then(|l| l.world.agent(&ctx.agent_id))
                    .map(|a| a.auto_reply)
                    .unwrap_or(false);
                let rewrite =
                    prepare_agent_reply(&text, &ctx.agent_id, &ctx.original_sender_id, auto_reply);
                if rewrite.text.is_empty() {
                    debug!(agent_id = %ctx.agent_id, "reply empty after self-mention strip");
                    self.finish_turn(&ctx);
                    return;
                }

                if let Ok(loaded) = self.loaded_mut() {
                    if let Some(agent) = loaded.world.agent_mut(&ctx.agent_id) {
                        agent.record_call();
                    }
                }

                let draft = MessageDraft {
                    chat_id: Some(ctx.chat_id),
                    sender: Sender::agent(&ctx.agent_id),
                    role: MessageRole::Assistant,
                    text: rewrite.text,
                    reply_to: ctx.reply_to,
                };
                match self.publish_draft(draft).await {
                    Ok(published) => {
                        if let Ok(loaded) = self.loaded_mut() {
                            if let Some(agent) = loaded.world.agent_mut(&ctx.agent_id) {
                                agent.append_memory(published);
                            }
                        }
                    }
                    Err(e) => {
                        self.system_notice(
                            ctx.chat_id,
                            format!("Failed to publish reply from {}: {}", ctx.agent_id, e),
                        )
                        .await;
                    }
                }
                self.finish_turn(&ctx);
            }
        }
    }

    fn finish_turn(&self, ctx: &TurnContext) {
        if let Ok(loaded) = self.loaded() {
            loaded.channel.publish(WorldEvent::AgentTurnCompleted {
                agent_id: ctx.agent_id.clone(),
                chat_id: ctx.chat_id,
            });
        }
    }

    // ========================================================================
    // TOOL CALLS AND APPROVAL
    // ========================================================================

    async fn process_tool_call(&mut self, ctx: &TurnContext, call: ToolCallRequest) {
        let check = {
            let Ok(loaded) = self.loaded_mut() else { return };
            let history: &[Message] = loaded
                .histories
                .get(&ctx.chat_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            loaded.gate.check(ctx.chat_id, &call.tool_name, history)
        };

        if check.can_execute {
            self.execute_tool(ctx.clone(), call).await;
        } else if check.needs_approval {
            let request = ApprovalRequest::new(
                &call.tool_name,
                &call.arguments,
                &format!("Agent {} requests tool '{}'.", ctx.agent_id, call.tool_name),
            );
            info!(
                world_id = %self.world_id,
                agent_id = %ctx.agent_id,
                tool_name = %call.tool_name,
                request_id = %request.request_id,
                "tool call suspended pending approval"
            );
            let event = WorldEvent::ApprovalRequested {
                agent_id: ctx.agent_id.clone(),
                chat_id: ctx.chat_id,
                request: request.clone(),
            };
            if let Err(e) = self
                .deps
                .store
                .append_event(&self.world_id, &ctx.chat_id, event.clone())
                .await
            {
                error!(error = %e, "failed to record approval request");
            }
            if let Ok(loaded) = self.loaded_mut() {
                loaded.pending.insert(
                    request.request_id.clone(),
                    PendingToolCall {
                        ctx: ctx.clone(),
                        call,
                    },
                );
                loaded.channel.publish(event);
            }
        } else {
            // Session denial: no re-prompt, visible refusal.
            self.system_notice(
                ctx.chat_id,
                format!("Tool '{}' is denied for this chat.", call.tool_name),
            )
            .await;
            self.finish_turn(ctx);
        }
    }

    async fn execute_tool(&mut self, ctx: TurnContext, call: ToolCallRequest) {
        let Some(executor) = self.deps.providers.tool_executor() else {
            self.system_notice(
                ctx.chat_id,
                format!("No tool executor configured for '{}'.", call.tool_name),
            )
            .await;
            self.finish_turn(&ctx);
            return;
        };

        if let Ok(loaded) = self.loaded() {
            loaded.channel.publish(WorldEvent::ToolCallStarted {
                agent_id: ctx.agent_id.clone(),
                call: call.clone(),
            });
        }

        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = executor.execute(&call.tool_name, &call.arguments).await;
            let _ = tx.send(WorldMsg::ToolOutcome { ctx, call, result });
        });
    }

    async fn handle_tool_outcome(
        &mut self,
        ctx: TurnContext,
        call: ToolCallRequest,
        result: ConfabResult<serde_json::Value>,
    ) {
        if self.loaded.is_none() {
            return;
        }
        if let Ok(loaded) = self.loaded() {
            loaded.channel.publish(WorldEvent::ToolCallCompleted {
                agent_id: ctx.agent_id.clone(),
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            });
        }

        match result {
            Ok(value) => {
                let message = Message::tool_output(ctx.chat_id, &call.tool_name, value);
                if let Err(e) = self.append_message(message.clone()).await {
                    self.system_notice(
                        ctx.chat_id,
                        format!("Failed to record output of '{}': {}", call.tool_name, e),
                    )
                    .await;
                    self.finish_turn(&ctx);
                    return;
                }
                if let Ok(loaded) = self.loaded_mut() {
                    if let Some(agent) = loaded.world.agent_mut(&ctx.agent_id) {
                        agent.append_memory(message);
                    }
                }
                // Resume the suspended turn with the tool result in memory.
                self.spawn_completion(ctx).await;
            }
            Err(e) => {
                self.system_notice(
                    ctx.chat_id,
                    format!("Tool '{}' failed: {}", call.tool_name, e),
                )
                .await;
                self.finish_turn(&ctx);
            }
        }
    }

    async fn deliver_approval(&mut self, response: ApprovalResponse) -> ConfabResult<()> {
        let pending = {
            let loaded = self.loaded_mut()?;
            loaded
                .pending
                .remove(&response.request_id)
                .ok_or(ApprovalError::UnknownRequest {
                    request_id: response.request_id.clone(),
                })?
        };

        let record = {
            let loaded = self.loaded_mut()?;
            loaded.gate.record_decision(
                pending.ctx.chat_id,
                &pending.call.tool_name,
                response.decision,
                response.scope,
            )
        };
        self.append_message(record).await?;

        if response.decision == ApprovalDecision::Approve {
            self.execute_tool(pending.ctx, pending.call).await;
        } else {
            self.system_notice(
                pending.ctx.chat_id,
                format!("Tool '{}' was not approved.", pending.call.tool_name),
            )
            .await;
            self.finish_turn(&pending.ctx);
        }
        Ok(())
    }

    // ========================================================================
    // CHAT AND AGENT MANAGEMENT
    // ========================================================================

    async fn start_chat(&mut self, name: Option<String>) -> ConfabResult<ChatId> {
        // Reuse a fresh chat instead of allocating another id.
        let reusable = self.loaded()?.world.find_reusable_chat();
        if let Some(chat_id) = reusable {
            self.ensure_history(chat_id).await?;
            if let Some(new_name) = &name {
                self.deps
                    .store
                    .update_chat_data(
                        &self.world_id,
                        &chat_id,
                        ChatDataUpdate {
                            name: Some(new_name.clone()),
                            append: Vec::new(),
                        },
                    )
                    .await?;
            }
            let loaded = self.loaded_mut()?;
            loaded.world.current_chat_id = Some(chat_id);
            if let Some(chat) = loaded.world.chat_mut(&chat_id) {
                if let Some(new_name) = &name {
                    chat.rename(new_name);
                }
                let snapshot = chat.clone();
                loaded
                    .channel
                    .publish(WorldEvent::ChatUpdated { chat: snapshot });
            }
            debug!(world_id = %self.world_id, chat_id = %chat_id, "reused fresh chat");
            return Ok(chat_id);
        }

        let chat = match &name {
            Some(n) => Chat::named(self.world_id.clone(), n),
            None => Chat::new(self.world_id.clone()),
        };
        let chat_id = chat.chat_id;
        self.deps
            .store
            .save_chat_data(&self.world_id, &ChatData::new(chat.clone()))
            .await?;

        {
            let loaded = self.loaded_mut()?;
            loaded.world.add_chat(chat.clone());
            loaded.world.current_chat_id = Some(chat_id);
            loaded.histories.insert(chat_id, Vec::new());
            loaded.channel.publish(WorldEvent::ChatCreated { chat });
        }
        self.persist_world().await?;
        info!(world_id = %self.world_id, chat_id = %chat_id, "chat created");
        Ok(chat_id)
    }

    async fn add_agent(&mut self, agent: Agent) -> ConfabResult<()> {
        self.deps.store.save_agent(&self.world_id, &agent).await?;
        self.loaded_mut()?.world.add_agent(agent);
        self.persist_world().await
    }

    async fn remove_agent(&mut self, agent_id: AgentId) -> ConfabResult<()> {
        let removed = self.loaded_mut()?.world.remove_agent(&agent_id);
        if removed.is_none() {
            return Err(RoutingError::AgentNotFound { agent_id }.into());
        }
        self.persist_world().await
    }

    async fn clear_agent_memory(&mut self, agent_id: AgentId) -> ConfabResult<Vec<Message>> {
        let archived = {
            let loaded = self.loaded_mut()?;
            let agent = loaded
                .world
                .agent_mut(&agent_id)
                .ok_or_else(|| RoutingError::AgentNotFound {
                    agent_id: agent_id.clone(),
                })?;
            agent.clear_memory()
        };
        let snapshot = self
            .loaded()?
            .world
            .agent(&agent_id)
            .cloned()
            .ok_or(RoutingError::AgentNotFound { agent_id })?;
        self.deps.store.save_agent(&self.world_id, &snapshot).await?;
        Ok(archived)
    }

    async fn persist_world(&mut self) -> ConfabResult<()> {
        let snapshot = self.loaded()?.world.clone();
        self.deps.store.save_world(&snapshot).await
    }

    // ========================================================================
    // NOTICES
    // ========================================================================

    /// Record a visible system message in the chat and broadcast a notice
    /// event. Failure paths land here, never in silence.
    async fn system_notice(&mut self, chat_id: ChatId, text: String) {
        warn!(world_id = %self.world_id, chat_id = %chat_id, %text, "system notice");
        let message = Message::system_notice(chat_id, &text);
        if let Err(e) = self.append_message(message).await {
            error!(error = %e, "failed to record system notice");
        }
        if let Ok(loaded) = self.loaded() {
            loaded
                .channel
                .publish(WorldEvent::SystemNotice { chat_id, text });
        }
    }
}

/// Render an agent's private memory as provider-facing turns.
///
/// Messages the agent authored become assistant turns; system notices and
/// tool results keep their roles; everything else reads as user input.
fn memory_to_turns(agent: &Agent) -> Vec<ChatTurn> {
    agent
        .memory
        .iter()
        .map(|m| {
            let role = if m.sender.is_agent() && m.sender.id == agent.id.as_str() {
                MessageRole::Assistant
            } else {
                match m.role {
                    MessageRole::System => MessageRole::System,
                    MessageRole::Tool => MessageRole::Tool,
                    _ => MessageRole::User,
                }
            };
            let content = match m.text_content() {
                Some(text) => text.to_string(),
                None => serde_json::to_string(&m.content).unwrap_or_default(),
            };
            ChatTurn::new(role, content)
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
