//! Per-thread checkpointing of graph state.
//!
//! A [`Checkpointer`] stores the latest [`AgentState`] of every
//! conversation thread, keyed by [`ThreadKey`] (thread id plus the
//! namespace of the graph that owns the state). The graph loads the
//! checkpoint at the start of a run and saves after every completed step,
//! so a conversation resumes where the previous turn left off.
//!
//! Whether a graph checkpoints at all is decided by its
//! [`CheckpointPolicy`]. `Inherit` is resolved when a supervisor embeds the
//! graph: the child then uses the supervisor's store under its own
//! namespace.
//!
//! | Store | Persistence |
//! |-------|-------------|
//! | [`MemoryCheckpointer`] | In-process, lost on restart |
//! | [`FileCheckpointer`](super::session::FileCheckpointer) | One JSON file per thread |

use crate::agent::state::AgentState;
use crate::error::AgentResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Boxed future returned by [`Checkpointer`] methods.
pub type CheckpointFuture<'a, T> = Pin<Box<dyn Future<Output = AgentResult<T>> + Send + 'a>>;

/// Identity of one thread's state inside a store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey {
    pub thread_id: String,
    /// Name of the graph owning the state. Keeps a supervisor's state apart
    /// from the state of the children it embeds.
    pub namespace: String,
}

impl ThreadKey {
    pub fn new(thread_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.thread_id)
    }
}

/// A saved thread state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub key: ThreadKey,
    pub state: AgentState,
    /// Number of steps saved for this thread so far.
    pub step: u64,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(key: ThreadKey, state: AgentState, step: u64) -> Self {
        Self {
            key,
            state,
            step,
            saved_at: Utc::now(),
        }
    }
}

/// Storage backend for thread checkpoints.
pub trait Checkpointer: Send + Sync {
    /// Latest checkpoint of `key`, if any.
    fn load<'a>(&'a self, key: &'a ThreadKey) -> CheckpointFuture<'a, Option<Checkpoint>>;

    /// Replace the latest checkpoint of `checkpoint.key`.
    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> CheckpointFuture<'a, ()>;

    /// Thread ids with stored state in `namespace`, sorted.
    fn list_threads<'a>(&'a self, namespace: &'a str) -> CheckpointFuture<'a, Vec<String>>;
}

/// Whether and where a graph checkpoints.
#[derive(Clone, Default)]
pub enum CheckpointPolicy {
    /// Persist state in this store.
    Enabled(Arc<dyn Checkpointer>),
    /// Never persist, even when embedded under a checkpointing supervisor.
    Disabled,
    /// Use the embedding supervisor's store. A top-level graph with this
    /// policy does not checkpoint.
    #[default]
    Inherit,
}

impl CheckpointPolicy {
    /// Shorthand for `Enabled(Arc::new(store))`.
    pub fn enabled(store: impl Checkpointer + 'static) -> Self {
        Self::Enabled(Arc::new(store))
    }

    /// The store to use at top level.
    pub fn store(&self) -> Option<&Arc<dyn Checkpointer>> {
        match self {
            Self::Enabled(store) => Some(store),
            Self::Disabled | Self::Inherit => None,
        }
    }

    /// The policy a child graph ends up with when embedded under `parent`.
    pub fn resolve_under(&self, parent: &CheckpointPolicy) -> CheckpointPolicy {
        match (self, parent) {
            (Self::Inherit, Self::Enabled(store)) => Self::Enabled(Arc::clone(store)),
            (Self::Inherit, _) => Self::Inherit,
            (own, _) => own.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Enabled(_) => "enabled",
            Self::Disabled => "disabled",
            Self::Inherit => "inherit",
        }
    }
}

impl fmt::Debug for CheckpointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

// ── MemoryCheckpointer ─────────────────────────────────────────────

/// In-process checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<ThreadKey, Checkpoint>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Checkpointer for MemoryCheckpointer {
    fn load<'a>(&'a self, key: &'a ThreadKey) -> CheckpointFuture<'a, Option<Checkpoint>> {
        Box::pin(async move { Ok(self.threads.read().await.get(key).cloned()) })
    }

    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> CheckpointFuture<'a, ()> {
        Box::pin(async move {
            self.threads
                .write()
                .await
                .insert(checkpoint.key.clone(), checkpoint.clone());
            Ok(())
        })
    }

    fn list_threads<'a>(&'a self, namespace: &'a str) -> CheckpointFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut ids: Vec<String> = self
                .threads
                .read()
                .await
                .keys()
                .filter(|k| k.namespace == namespace)
                .map(|k| k.thread_id.clone())
                .collect();
            ids.sort();
            Ok(ids)
        })
    }
}
