//! Error taxonomy for the agent layer.
//!
//! Configuration problems are fatal and surface at construction or rebuild
//! time. Invocation failures leave the runtime's configuration and cached
//! graph untouched, so the next call can simply be retried by the caller.
//! Tool-discovery failures never modify the live tool registry.

use thiserror::Error;

/// Error type for agent construction, rebuilds, and invocations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing or invalid model binding, duplicate child agent names,
    /// invalid state schema, or an empty stream-mode set.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The model call failed after the configured retry budget, or the
    /// model's output could not be used (e.g. an invalid structured response).
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// A remote tool source was unreachable or returned malformed descriptors.
    #[error("Tool discovery error: {server}: {message}")]
    ToolDiscovery { server: String, message: String },

    /// An invocation was attempted against a graph that has not been rebuilt
    /// since its inputs changed. Indicates a caller serialization bug.
    #[error("Stale graph: agent '{agent}' must be rebuilt before it can be invoked")]
    StaleGraph { agent: String },

    /// The request itself was unusable (empty message list, empty thread id).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The checkpoint store failed to load or persist thread state.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

impl AgentError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invocation error.
    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Create a tool discovery error for the given server.
    pub fn tool_discovery(server: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ToolDiscovery {
            server: server.into(),
            message: msg.into(),
        }
    }

    /// Create a stale-graph error for the given agent.
    pub fn stale_graph(agent: impl Into<String>) -> Self {
        Self::StaleGraph {
            agent: agent.into(),
        }
    }

    /// Create an invalid-request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a checkpoint error.
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Whether this error is a configuration (never-retry) failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
