//! Stream modes and the units a streamed invocation yields.

use crate::Message;
use crate::agent::state::AgentState;
use serde::{Deserialize, Deserializer, Serialize};

/// What a streamed invocation emits.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// The whole state after every step.
    Values,
    /// Each node's newly produced messages, once per step.
    Updates,
    /// Model token deltas plus every completed tool message.
    Messages,
}

/// One or more [`StreamMode`]s. Deserializes from either `"messages"` or
/// `["values", "messages"]`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct StreamModes(Vec<StreamMode>);

impl StreamModes {
    pub fn new(modes: impl IntoIterator<Item = StreamMode>) -> Self {
        let mut deduped = Vec::new();
        for mode in modes {
            if !deduped.contains(&mode) {
                deduped.push(mode);
            }
        }
        Self(deduped)
    }

    pub fn contains(&self, mode: StreamMode) -> bool {
        self.0.contains(&mode)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[StreamMode] {
        &self.0
    }
}

impl Default for StreamModes {
    fn default() -> Self {
        Self(vec![StreamMode::Messages])
    }
}

impl From<StreamMode> for StreamModes {
    fn from(mode: StreamMode) -> Self {
        Self(vec![mode])
    }
}

impl<'de> Deserialize<'de> for StreamModes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(StreamMode),
            Many(Vec<StreamMode>),
        }
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(mode) => Self::from(mode),
            OneOrMany::Many(modes) => Self::new(modes),
        })
    }
}

/// One unit of a streamed invocation.
///
/// `agent` names the graph that produced the unit, so a supervisor's stream
/// attributes delegated work to the right child.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StreamChunk {
    /// A model text delta (`messages` mode).
    MessageDelta {
        agent: String,
        node: String,
        content: String,
    },
    /// A completed message (`messages` mode): tool-call requests, tool
    /// results, and assistant text that was not streamed as deltas.
    Message {
        agent: String,
        node: String,
        message: Message,
    },
    /// Messages produced by one node execution (`updates` mode).
    Update {
        agent: String,
        node: String,
        messages: Vec<Message>,
    },
    /// Full state after a step (`values` mode).
    Values { agent: String, state: AgentState },
}

impl StreamChunk {
    /// Name of the graph that produced this unit.
    pub fn agent(&self) -> &str {
        match self {
            Self::MessageDelta { agent, .. }
            | Self::Message { agent, .. }
            | Self::Update { agent, .. }
            | Self::Values { agent, .. } => agent,
        }
    }
}
