//! Tool abstractions for LLM function-calling agents.
//!
//! Every agent capability is a [`Tool`] implementor. An agent's tools live
//! in a [`ToolRegistry`], an ordered list that the runtime snapshots into
//! each compiled graph.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`ToolRegistry`], [`FnTool`], the [`ThinkTool`]
//!   pseudo-tool, argument parsing and validation helpers.
//! - [`remote`]: [`ToolTransportConfig`](remote::ToolTransportConfig),
//!   the [`ToolDiscovery`](remote::ToolDiscovery) trait and the MCP
//!   [`McpDiscovery`](remote::McpDiscovery) implementation. Its HTTP, SSE
//!   and stdio channels live in the private `transport` module.

pub mod core;
pub mod remote;
mod transport;

// Re-export commonly used items at the module level.
pub use core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, ThinkTool, Tool, ToolFuture, ToolRegistry, parse_tool_args,
    truncate_result, validate_tool_arguments,
};
pub use remote::{McpDiscovery, ServerConnection, ToolDiscovery, ToolTransportConfig, TransportKind};
