//! Agent layer: metadata, the service contract, graphs and runtimes.
//!
//! - [`metadata`]: [`AgentMetadata`], [`ModelBinding`] and
//!   [`SamplingParameters`] with their merge rules.
//! - [`service`]: the [`AgentService`] contract every agent is served through.
//! - [`persona`]: [`AgentPersona`], the prompt strategy plus baseline tools.
//! - [`graph`]: [`ExecutionGraph`] and the [`GraphBuilder`] that compiles it.
//!   Start here to understand what an invocation does.
//! - [`runtime`]: [`AgentRuntime`], the single-agent runtime.
//! - [`supervisor`]: [`Supervisor`] and the [`AgentMember`] trait.
//! - [`state`]: [`AgentState`], the `add_messages` reducer and [`StateSchema`].
//! - [`checkpoint`]: [`CheckpointPolicy`], the [`Checkpointer`] trait and the
//!   in-memory store. [`session`] holds the file-backed store.
//! - [`stream`]: stream modes and [`StreamChunk`].
//! - [`hooks`]: pre-model hooks.
//! - [`config`]: [`RuntimeOptions`] and the file-based [`AgentConfig`].

pub mod checkpoint;
pub mod config;
pub mod graph;
pub mod hooks;
pub mod metadata;
pub mod persona;
pub mod runtime;
pub mod service;
pub mod session;
pub mod state;
pub mod stream;
pub mod supervisor;

// Re-export commonly used items at the module level.
pub use checkpoint::{Checkpoint, CheckpointPolicy, Checkpointer, MemoryCheckpointer, ThreadKey};
pub use config::{AgentConfig, CheckpointConfig, DEFAULT_MAX_STEPS, RuntimeOptions};
pub use graph::{ExecutionGraph, GraphBuilder, STEP_LIMIT_MESSAGE};
pub use hooks::{FnPreModelHook, HookOutcome, PreModelHook};
pub use metadata::{AgentMetadata, Credential, ModelBinding, ReasoningEffort, SamplingParameters};
pub use persona::{AgentPersona, SystemPromptPersona};
pub use runtime::{AgentRuntime, GraphCache, RuntimeBuilder};
pub use service::{AgentFuture, AgentService, ChunkStream};
pub use session::FileCheckpointer;
pub use state::{AgentState, StateSchema, add_messages};
pub use stream::{StreamChunk, StreamMode, StreamModes};
pub use supervisor::{AgentMember, Supervisor, SupervisorBuilder};
