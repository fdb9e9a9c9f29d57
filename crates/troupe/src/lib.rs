//! Agent orchestration on top of LLM chat-completion APIs.
//!
//! `troupe` wraps a language-model reasoning loop in a rebuildable
//! [`ExecutionGraph`](agent::graph::ExecutionGraph), keeps per-thread
//! conversation state through a [`Checkpointer`](agent::checkpoint::Checkpointer),
//! and composes several agents under a [`Supervisor`](agent::supervisor::Supervisor).
//! Every agent, single or supervisor, is served through the same
//! [`AgentService`](agent::service::AgentService) contract with a single-shot
//! `chat` and a lazily streamed `chat_stream`.
//!
//! # Getting started
//!
//! ```ignore
//! use troupe::prelude::*;
//!
//! struct Assistant;
//!
//! impl AgentPersona for Assistant {
//!     fn prompt(&self, state: &AgentState) -> Vec<Message> {
//!         let mut messages = vec![Message::system("You are a helpful assistant.")];
//!         messages.extend(state.messages.iter().cloned());
//!         messages
//!     }
//!
//!     fn tools_initial(&self) -> Vec<Arc<dyn Tool>> {
//!         vec![Arc::new(ThinkTool)]
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AgentError> {
//!     let metadata = AgentMetadata::new("assistant", ModelBinding::new("anthropic/claude-sonnet-4"));
//!     let agent = AgentRuntime::builder(metadata, Assistant)
//!         .with_checkpoint(CheckpointPolicy::enabled(MemoryCheckpointer::new()))
//!         .build()?;
//!
//!     let state = agent.chat(vec![Message::user("Hi!")], "thread-1").await?;
//!     println!("{}", state.last_text());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Describe an agent:** [`AgentMetadata`](agent::metadata::AgentMetadata),
//!   [`ModelBinding`](agent::metadata::ModelBinding) and
//!   [`SamplingParameters`](agent::metadata::SamplingParameters).
//! - **Give it a personality:** implement
//!   [`AgentPersona`](agent::persona::AgentPersona), or use
//!   [`SystemPromptPersona`](agent::persona::SystemPromptPersona).
//! - **Run it:** [`AgentRuntime`](agent::runtime::AgentRuntime) for one agent,
//!   [`Supervisor`](agent::supervisor::Supervisor) for a team.
//! - **Give it tools:** the [`Tool`](tools::core::Tool) trait,
//!   [`FnTool`](tools::core::FnTool), and
//!   [`McpDiscovery`](tools::remote::McpDiscovery) for remote tool servers.
//! - **Talk to a model:** [`ChatModel`](api::model::ChatModel) and the
//!   OpenRouter-backed [`OpenRouterResolver`](api::openrouter::OpenRouterResolver).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Metadata, service contract, graph builder, runtimes, checkpointing, streaming |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolRegistry`](tools::core::ToolRegistry), remote discovery |
//! | [`api`] | Model trait, OpenRouter client, SSE streaming, retry |

pub mod agent;
pub mod api;
pub mod error;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::AgentError;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Used for tool parameter schemas and structured
/// response formats.
///
/// # Example
///
/// ```
/// use troupe::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     company: String,
///     #[serde(default)]
///     year: Option<u32>,
/// }
///
/// let schema = json_schema_for::<LookupArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"company".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
///
/// Accepts the LangChain-style aliases `human` and `ai` on input so that
/// histories produced by other stacks deserialize unchanged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
///
/// The minimal wire shape is `{"role": ..., "content": ...}`; every other
/// field is optional. `id` is assigned by the graph when the message enters
/// a thread's state and is what the message reducer uses to replace rather
/// than append. `name` attributes assistant output to the agent that
/// produced it inside a supervisor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            name: None,
            id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, Some(content.into()))
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, Some(content.into()))
    }

    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::with_role(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(MessageRole::Tool, Some(content.into()))
        }
    }

    /// Attribute the message to a named agent (builder pattern).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Text content, or `""` when the message carries none.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Tool calls requested by this message (empty for non-assistant messages).
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }

    /// Whether this is an assistant message that requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.role == MessageRole::Assistant && !self.calls().is_empty()
    }

    /// Copy of the message without graph-internal fields, as sent to a
    /// provider API.
    pub fn for_api(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the model (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

/// Token usage statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn role_content_pairs_deserialize() {
        let json = r#"[{"role": "user", "content": "hi"}, {"role": "ai", "content": "hello"}, {"role": "human", "content": "bye"}]"#;
        let messages: Vec<Message> = serde_json::from_str(json).unwrap();
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[2].role, MessageRole::User);
        assert!(messages.iter().all(|m| m.id.is_none()));
    }

    #[test]
    fn for_api_drops_state_id() {
        let mut msg = Message::assistant_text("hi").named("researcher");
        msg.id = Some("agent:3".into());
        let api = msg.for_api();
        assert!(api.id.is_none());
        assert_eq!(api.name.as_deref(), Some("researcher"));
        let json = serde_json::to_value(&api).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn has_tool_calls_only_for_assistant() {
        let call = ToolCall::new("c1", "think", "{}");
        assert!(Message::assistant_tool_calls(None, vec![call]).has_tool_calls());
        assert!(!Message::assistant_text("done").has_tool_calls());
        assert!(!Message::user("x").has_tool_calls());
    }
}
