//! Convenience re-exports for common `troupe` types.
//!
//! Meant to be glob-imported when building agents:
//!
//! ```ignore
//! use troupe::prelude::*;
//! ```
//!
//! Covers describing an agent, giving it tools, running it, and consuming
//! its output. Graph internals, the OpenRouter wire types and the SSE
//! decoder stay in their modules.

pub use std::sync::Arc;

// ── Core types ──────────────────────────────────────────────────────
pub use crate::error::{AgentError, AgentResult};
pub use crate::{Message, MessageRole, ToolCall, ToolDef, json_schema_for};

// ── Agents ──────────────────────────────────────────────────────────
pub use crate::agent::{
    AgentConfig, AgentMember, AgentMetadata, AgentPersona, AgentRuntime, AgentService,
    AgentState, CheckpointPolicy, Checkpointer, FileCheckpointer, FnPreModelHook, HookOutcome,
    MemoryCheckpointer, ModelBinding, PreModelHook, RuntimeOptions, SamplingParameters,
    StateSchema, StreamChunk, StreamMode, Supervisor, SystemPromptPersona,
};

// ── Models ──────────────────────────────────────────────────────────
pub use crate::api::{ChatModel, ModelRequest, ModelResponse, ResponseFormat};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    FnTool, McpDiscovery, ThinkTool, Tool, ToolFuture, ToolRegistry, ToolTransportConfig,
    parse_tool_args,
};
