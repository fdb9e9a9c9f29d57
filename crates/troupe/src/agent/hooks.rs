//! Pre-model hooks.
//!
//! A [`PreModelHook`] runs before every model call. It can rewrite the
//! stored message history (for example to trim or summarize it) or only
//! change what the model sees on this call while leaving the stored
//! history intact.

use crate::Message;
use crate::agent::state::AgentState;

/// What a [`PreModelHook`] asks the graph to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookOutcome {
    /// Replace the stored message history.
    pub messages: Option<Vec<Message>>,
    /// Send these messages to the prompt instead of the stored history,
    /// for this call only.
    pub llm_input_messages: Option<Vec<Message>>,
}

impl HookOutcome {
    /// Leave everything as is.
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn replace_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Some(messages),
            llm_input_messages: None,
        }
    }

    pub fn model_input(messages: Vec<Message>) -> Self {
        Self {
            messages: None,
            llm_input_messages: Some(messages),
        }
    }
}

/// Hook invoked before each model call.
///
/// # Example
///
/// ```ignore
/// // Only show the model the last 10 messages.
/// let hook = FnPreModelHook::new(|state: &AgentState| {
///     let start = state.messages.len().saturating_sub(10);
///     HookOutcome::model_input(state.messages[start..].to_vec())
/// });
/// ```
pub trait PreModelHook: Send + Sync {
    fn before_model(&self, state: &AgentState) -> HookOutcome;
}

/// Closure-backed [`PreModelHook`].
pub struct FnPreModelHook<F>(F);

impl<F> FnPreModelHook<F>
where
    F: Fn(&AgentState) -> HookOutcome + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> PreModelHook for FnPreModelHook<F>
where
    F: Fn(&AgentState) -> HookOutcome + Send + Sync,
{
    fn before_model(&self, state: &AgentState) -> HookOutcome {
        (self.0)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_hook_sees_state() {
        let hook = FnPreModelHook::new(|state: &AgentState| {
            HookOutcome::model_input(state.messages.iter().rev().take(1).cloned().collect())
        });
        let state = AgentState {
            messages: vec![Message::user("old"), Message::user("new")],
            ..Default::default()
        };
        let outcome = hook.before_model(&state);
        assert!(outcome.messages.is_none());
        assert_eq!(outcome.llm_input_messages.unwrap()[0].text(), "new");
    }
}
