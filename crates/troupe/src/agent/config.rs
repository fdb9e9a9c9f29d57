//! Runtime options and file-based agent configuration.
//!
//! [`RuntimeOptions`] holds everything besides the metadata and the
//! persona that shapes a compiled graph. Builder methods cover the common
//! settings; struct fields can be set directly for the rest.
//!
//! ```ignore
//! let options = RuntimeOptions::default()
//!     .with_max_steps(10)
//!     .with_stream_modes([StreamMode::Updates, StreamMode::Messages])
//!     .with_checkpoint(CheckpointPolicy::enabled(MemoryCheckpointer::new()));
//! ```
//!
//! [`AgentConfig`] is the serialized form loaded by the `troupe-web` binary:
//!
//! ```json
//! {
//!   "name": "researcher",
//!   "model": {"model_name": "claude-sonnet-4", "provider": "anthropic"},
//!   "sampling": {"temperature": 0.2, "max_retries": 2},
//!   "system_prompt": "You research companies.",
//!   "stream_mode": ["updates", "messages"],
//!   "checkpoint": {"kind": "file", "dir": ".troupe/threads"},
//!   "tool_servers": {
//!     "search": {"transport": "streamable_http", "url": "http://localhost:8000/mcp"}
//!   }
//! }
//! ```

use crate::agent::checkpoint::{CheckpointPolicy, MemoryCheckpointer};
use crate::agent::hooks::PreModelHook;
use crate::agent::metadata::{AgentMetadata, ModelBinding, SamplingParameters};
use crate::agent::session::FileCheckpointer;
use crate::agent::state::StateSchema;
use crate::agent::stream::{StreamMode, StreamModes};
use crate::api::model::ResponseFormat;
use crate::api::retry::RetryConfig;
use crate::error::{AgentError, AgentResult};
use crate::tools::remote::ToolTransportConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default number of node executions per invocation.
pub const DEFAULT_MAX_STEPS: u32 = 25;

// ── RuntimeOptions ─────────────────────────────────────────────────

/// Graph-shaping options of a runtime.
#[derive(Clone)]
pub struct RuntimeOptions {
    /// Units emitted by `chat_stream`. Must not be empty.
    pub stream_modes: StreamModes,
    /// Node executions allowed per invocation. Default: 25.
    pub max_steps: u32,
    /// Produce a validated structured response after the loop ends.
    pub response_format: Option<ResponseFormat>,
    pub pre_model_hook: Option<Arc<dyn PreModelHook>>,
    pub state_schema: StateSchema,
    pub checkpoint: CheckpointPolicy,
    /// Backoff shape for model retries. The retry *count* comes from
    /// [`SamplingParameters::max_retries`].
    pub retry: RetryConfig,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            stream_modes: StreamModes::default(),
            max_steps: DEFAULT_MAX_STEPS,
            response_format: None,
            pre_model_hook: None,
            state_schema: StateSchema::default(),
            checkpoint: CheckpointPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("stream_modes", &self.stream_modes)
            .field("max_steps", &self.max_steps)
            .field("response_format", &self.response_format.as_ref().map(|r| &r.name))
            .field("pre_model_hook", &self.pre_model_hook.is_some())
            .field("state_schema", &self.state_schema)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

impl RuntimeOptions {
    pub fn with_stream_modes(mut self, modes: impl IntoIterator<Item = StreamMode>) -> Self {
        self.stream_modes = StreamModes::new(modes);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_pre_model_hook(mut self, hook: impl PreModelHook + 'static) -> Self {
        self.pre_model_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_state_schema(mut self, schema: StateSchema) -> Self {
        self.state_schema = schema;
        self
    }

    pub fn with_checkpoint(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject option combinations no graph can be compiled from.
    pub fn validate(&self) -> AgentResult<()> {
        if self.stream_modes.is_empty() {
            return Err(AgentError::configuration("stream mode set is empty"));
        }
        if self.max_steps == 0 {
            return Err(AgentError::configuration("max_steps must be at least 1"));
        }
        self.state_schema.validate()
    }
}

// ── AgentConfig ────────────────────────────────────────────────────

/// Serialized checkpoint store selection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointConfig {
    #[default]
    Memory,
    File {
        dir: PathBuf,
    },
    Disabled,
    Inherit,
}

impl CheckpointConfig {
    pub fn to_policy(&self) -> AgentResult<CheckpointPolicy> {
        Ok(match self {
            Self::Memory => CheckpointPolicy::enabled(MemoryCheckpointer::new()),
            Self::File { dir } => {
                let store = FileCheckpointer::new(dir).map_err(|e| {
                    AgentError::configuration(format!(
                        "cannot use checkpoint dir {}: {e}",
                        dir.display()
                    ))
                })?;
                CheckpointPolicy::enabled(store)
            }
            Self::Disabled => CheckpointPolicy::Disabled,
            Self::Inherit => CheckpointPolicy::Inherit,
        })
    }
}

/// An agent described in a JSON file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    pub model: ModelBinding,
    #[serde(default)]
    pub sampling: SamplingParameters,
    #[serde(default)]
    pub system_prompt: String,
    /// Shown to a supervisor choosing whom to delegate to.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stream_mode: StreamModes,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Remote tool servers loaded at startup.
    #[serde(default)]
    pub tool_servers: ToolTransportConfig,
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

impl AgentConfig {
    /// Minimal config for `name` talking to `model`.
    pub fn new(name: impl Into<String>, model: ModelBinding) -> Self {
        Self {
            name: name.into(),
            model,
            sampling: SamplingParameters::default(),
            system_prompt: String::new(),
            description: String::new(),
            stream_mode: StreamModes::default(),
            max_steps: DEFAULT_MAX_STEPS,
            checkpoint: CheckpointConfig::default(),
            tool_servers: ToolTransportConfig::new(),
        }
    }

    /// Read a config from a JSON file.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AgentError::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            AgentError::configuration(format!("invalid agent config {}: {e}", path.display()))
        })
    }

    pub fn metadata(&self) -> AgentMetadata {
        AgentMetadata::new(self.name.clone(), self.model.clone()).with_sampling(self.sampling.clone())
    }

    pub fn runtime_options(&self) -> AgentResult<RuntimeOptions> {
        let options = RuntimeOptions {
            stream_modes: self.stream_mode.clone(),
            max_steps: self.max_steps,
            checkpoint: self.checkpoint.to_policy()?,
            ..RuntimeOptions::default()
        };
        options.validate()?;
        Ok(options)
    }
}
