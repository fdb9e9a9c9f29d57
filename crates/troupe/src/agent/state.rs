//! Graph state, the message reducer, and extra state channels.

use crate::error::{AgentError, AgentResult};
use crate::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Channel names owned by the graph itself.
pub const RESERVED_CHANNELS: [&str; 3] = ["messages", "remaining_steps", "structured_response"];

/// The state a graph run threads through its nodes.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AgentState {
    pub messages: Vec<Message>,
    /// Node executions left before the run is cut short.
    #[serde(default)]
    pub remaining_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_response: Option<serde_json::Value>,
    /// Extra channels declared through a [`StateSchema`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl AgentState {
    /// Last message, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the last assistant message, or `""`.
    pub fn last_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map_or("", Message::text)
    }
}

/// Merge `incoming` into `existing`.
///
/// A message whose `id` matches one already present replaces it in place;
/// anything else is appended. Messages without an id get
/// `<namespace>:<position>` where position is their index in the merged list.
pub fn add_messages(namespace: &str, existing: &mut Vec<Message>, incoming: Vec<Message>) {
    for mut message in incoming {
        if let Some(id) = message.id.clone()
            && let Some(slot) = existing.iter_mut().find(|m| m.id.as_ref() == Some(&id))
        {
            *slot = message;
            continue;
        }
        if message.id.is_none() {
            message.id = Some(next_id(namespace, existing));
        }
        existing.push(message);
    }
}

/// First free `<namespace>:<n>` id, starting at the current length.
fn next_id(namespace: &str, existing: &[Message]) -> String {
    let mut position = existing.len();
    loop {
        let candidate = format!("{namespace}:{position}");
        if !existing.iter().any(|m| m.id.as_deref() == Some(candidate.as_str())) {
            return candidate;
        }
        position += 1;
    }
}

/// Additional named channels carried in [`AgentState::values`], each with a
/// default value used when a thread has no stored value yet.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StateSchema {
    channels: Vec<(String, serde_json::Value)>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel (builder pattern). Validation happens in
    /// [`validate`](Self::validate) when the graph is compiled.
    pub fn with_channel(mut self, name: impl Into<String>, default: serde_json::Value) -> Self {
        self.channels.push((name.into(), default));
        self
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.channels.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Reject reserved, empty, and duplicate channel names.
    pub fn validate(&self) -> AgentResult<()> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.channels.len());
        for (name, _) in &self.channels {
            if name.trim().is_empty() {
                return Err(AgentError::configuration("state channel with an empty name"));
            }
            if RESERVED_CHANNELS.contains(&name.as_str()) {
                return Err(AgentError::configuration(format!(
                    "state channel '{name}' is reserved"
                )));
            }
            if seen.contains(&name.as_str()) {
                return Err(AgentError::configuration(format!(
                    "state channel '{name}' declared twice"
                )));
            }
            seen.push(name);
        }
        Ok(())
    }

    /// Fill in defaults for channels missing from `values`.
    pub fn apply_defaults(&self, values: &mut BTreeMap<String, serde_json::Value>) {
        for (name, default) in &self.channels {
            values
                .entry(name.clone())
                .or_insert_with(|| default.clone());
        }
    }
}
