//! CONFAB LLM - Provider Abstraction Layer
//!
//! Provider-agnostic traits for chat completion and tool execution. The
//! runtime awaits these as opaque asynchronous operations; actual network
//! providers are user-supplied. Providers must be explicitly registered -
//! no auto-discovery.

use ::async_trait::async_trait;
use confab_core::{ConfabResult, MessageRole, ProviderError, ToolCallRequest};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// COMPLETION TYPES
// ============================================================================

/// One turn of provider-facing conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Conversation role
    pub role: MessageRole,
    /// Rendered text content
    pub content: String,
}

impl ChatTurn {
    /// Build a turn.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A tool made available to a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name agents refer to
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema of the arguments
    pub schema: serde_json::Value,
}

/// Request for a chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// System prompt, if any
    pub system_prompt: Option<String>,
    /// Conversation context, oldest first
    pub messages: Vec<ChatTurn>,
    /// Tools the completion may call
    pub tools: Vec<ToolDescriptor>,
}

/// Result of a chat completion: text, tool calls, or both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text, if any
    pub text: Option<String>,
    /// Tool invocations requested by the model
    pub tool_calls: Vec<ToolCallRequest>,
}

impl CompletionResponse {
    /// A plain text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A tool-call response.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }

    /// Whether the model asked for tool execution.
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ============================================================================
// PROVIDER TRAITS
// ============================================================================

/// Trait for chat-completion providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generate a completion for the given request.
    ///
    /// # Errors
    ///
    /// Returns `ConfabError::Provider` when the provider call fails; the
    /// runtime converts such failures into visible system notices.
    async fn complete(&self, request: &CompletionRequest) -> ConfabResult<CompletionResponse>;

    /// Identifier this provider is registered under (e.g., "anthropic").
    fn provider_id(&self) -> &str;
}

/// Trait for tool executors.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool and return its output.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::ToolNotRegistered` for unknown tools and
    /// `ProviderError::ToolFailed` for execution failures.
    async fn execute(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> ConfabResult<serde_json::Value>;

    /// Tools this executor can run.
    fn available_tools(&self) -> Vec<ToolDescriptor>;
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry for chat providers and the optional tool executor.
///
/// # Example
/// ```ignore
/// let mut registry = ProviderRegistry::new();
/// registry.register(Arc::new(my_provider));
/// let provider = registry.provider("anthropic")?;
/// ```
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    tool_executor: Option<Arc<dyn ToolExecutor>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own id, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        self.providers
            .insert(provider.provider_id().to_string(), provider);
    }

    /// Register the tool executor, replacing any previous one.
    pub fn register_tool_executor(&mut self, executor: Arc<dyn ToolExecutor>) {
        self.tool_executor = Some(executor);
    }

    /// Look up a provider by id.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotConfigured` when no provider is registered
    /// under the id.
    pub fn provider(&self, provider_id: &str) -> ConfabResult<Arc<dyn ChatProvider>> {
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured.into())
    }

    /// The registered tool executor, if any.
    pub fn tool_executor(&self) -> Option<Arc<dyn ToolExecutor>> {
        self.tool_executor.clone()
    }
}

// ============================================================================
// SCRIPTED PROVIDER (TESTS / EMBEDDING)
// ============================================================================

/// Provider that replays a fixed queue of responses.
///
/// Each `complete` call pops the next scripted response; an exhausted script
/// is a request failure, which keeps tests honest about call counts.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<CompletionResponse>>,
}

impl ScriptedProvider {
    /// Build a provider that replays `responses` in order.
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    /// Append another scripted response.
    pub fn push(&self, response: CompletionResponse) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    /// Number of responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(&self, _request: &CompletionRequest) -> ConfabResult<CompletionResponse> {
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        next.ok_or_else(|| {
            ProviderError::RequestFailed {
                provider: "scripted".to_string(),
                reason: "script exhausted".to_string(),
            }
            .into()
        })
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// STATIC TOOL EXECUTOR (TESTS / EMBEDDING)
// ============================================================================

/// Tool executor backed by a fixed name -> output table.
#[derive(Default)]
pub struct StaticToolExecutor {
    outputs: HashMap<String, serde_json::Value>,
}

impl StaticToolExecutor {
    /// Create an empty executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed output for a tool name.
    pub fn with_tool(mut self, name: &str, output: serde_json::Value) -> Self {
        self.outputs.insert(name.to_string(), output);
        self
    }
}

#[async_trait]
impl ToolExecutor for StaticToolExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        _args: &serde_json::Value,
    ) -> ConfabResult<serde_json::Value> {
        self.outputs.get(tool_name).cloned().ok_or_else(|| {
            ProviderError::ToolNotRegistered {
                tool_name: tool_name.to_string(),
            }
            .into()
        })
    }

    fn available_tools(&self) -> Vec<ToolDescriptor> {
        self.outputs
            .keys()
            .map(|name| ToolDescriptor {
                name: name.clone(),
                description: String::new(),
                schema: serde_json::json!({ "type": "object" }),
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::ConfabError;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "mock-model".to_string(),
            system_prompt: None,
            messages: vec![ChatTurn::new(MessageRole::User, "hello")],
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::new(vec![
            CompletionResponse::text("first"),
            CompletionResponse::text("second"),
        ]);

        let first = provider.complete(&request()).await.unwrap();
        assert_eq!(first.text.as_deref(), Some("first"));
        let second = provider.complete(&request()).await.unwrap();
        assert_eq!(second.text.as_deref(), Some("second"));
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn test_scripted_provider_exhaustion_is_an_error() {
        let provider = ScriptedProvider::new(vec![]);
        let result = provider.complete(&request()).await;
        assert!(matches!(
            result,
            Err(ConfabError::Provider(ProviderError::RequestFailed { .. }))
        ));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new(vec![])));

        assert!(registry.provider("scripted").is_ok());
        let missing = registry.provider("anthropic");
        assert!(matches!(
            missing,
            Err(ConfabError::Provider(ProviderError::NotConfigured))
        ));
    }

    #[tokio::test]
    async fn test_static_tool_executor() {
        let executor =
            StaticToolExecutor::new().with_tool("search", serde_json::json!({ "hits": 3 }));

        let output = executor
            .execute("search", &serde_json::json!({ "q": "door" }))
            .await
            .unwrap();
        assert_eq!(output["hits"], 3);

        let missing = executor.execute("shell", &serde_json::json!({})).await;
        assert!(matches!(
            missing,
            Err(ConfabError::Provider(ProviderError::ToolNotRegistered { .. }))
        ));
        assert_eq!(executor.available_tools().len(), 1);
    }

    #[test]
    fn test_completion_response_helpers() {
        let response = CompletionResponse::tool_calls(vec![ToolCallRequest {
            call_id: "call-1".to_string(),
            tool_name: "search".to_string(),
            arguments: serde_json::json!({}),
        }]);
        assert!(response.wants_tools());
        assert!(!CompletionResponse::text("hi").wants_tools());
    }
}
