//! Agent personas: the prompt strategy and baseline tool set.
//!
//! Runtimes are generic over an [`AgentPersona`], chosen at construction.
//! The persona decides what the model sees on each call and which tools
//! the agent starts with (and returns to on
//! [`reset_tools`](super::runtime::AgentRuntime::reset_tools)).

use crate::Message;
use crate::agent::state::AgentState;
use crate::tools::core::Tool;
use std::sync::Arc;

/// Prompt strategy plus baseline tools of one agent.
pub trait AgentPersona: Send + Sync + 'static {
    /// Messages sent to the model for `state`. Must be a pure function of
    /// the state.
    fn prompt(&self, state: &AgentState) -> Vec<Message>;

    /// Tools the agent is built with.
    fn tools_initial(&self) -> Vec<Arc<dyn Tool>>;

    /// One-line description shown to a supervisor deciding whom to
    /// delegate to.
    fn description(&self) -> String {
        String::new()
    }
}

/// Persona that prepends a fixed system prompt to the conversation.
pub struct SystemPromptPersona {
    system: String,
    description: String,
    tools: Vec<Arc<dyn Tool>>,
}

impl SystemPromptPersona {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            description: String::new(),
            tools: Vec::new(),
        }
    }

    /// Set the delegation description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a baseline tool (builder pattern).
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }
}

impl AgentPersona for SystemPromptPersona {
    fn prompt(&self, state: &AgentState) -> Vec<Message> {
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        if !self.system.is_empty() {
            messages.push(Message::system(self.system.clone()));
        }
        messages.extend(state.messages.iter().cloned());
        messages
    }

    fn tools_initial(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}
