//! The language-model boundary.
//!
//! The execution graph never talks to a provider directly. It sends a
//! [`ModelRequest`] to a [`ChatModel`] handle, which a [`ModelResolver`]
//! produced from the agent's [`ModelBinding`] and sampling parameters.
//! Errors stay plain strings at this boundary so that
//! [`classify_error`](super::retry::classify_error) can sort them.

use crate::agent::metadata::{ModelBinding, SamplingParameters};
use crate::api::streaming::StreamEvent;
use crate::error::AgentResult;
use crate::{Message, ToolCall, ToolDef, UsageInfo};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`ChatModel::complete`].
pub type ModelFuture<'a> = Pin<Box<dyn Future<Output = Result<ModelResponse, String>> + Send + 'a>>;

/// Owned stream of incremental model output.
pub type DeltaStream = BoxStream<'static, Result<StreamEvent, String>>;

/// Schema the model's final answer must conform to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResponseFormat {
    /// Short identifier forwarded to providers that name their schemas.
    pub name: String,
    /// JSON Schema the response is validated against.
    pub schema: serde_json::Value,
}

impl ResponseFormat {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Build from a type deriving `schemars::JsonSchema`.
    pub fn for_type<T: schemars::JsonSchema>(name: impl Into<String>) -> Self {
        Self::new(name, crate::json_schema_for::<T>())
    }
}

/// Everything a model needs for one completion.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
    pub sampling: SamplingParameters,
    pub response_format: Option<ResponseFormat>,
}

/// A completed model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub reasoning: Option<String>,
}

impl ModelResponse {
    /// Text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Response that requests tool calls.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    /// Convert into the assistant message appended to agent state.
    pub fn into_message(self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant_text(self.content.unwrap_or_default())
        } else {
            Message::assistant_tool_calls(self.content.filter(|c| !c.is_empty()), self.tool_calls)
        }
    }

    /// Replay this response as the events a streaming provider would emit.
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(reasoning) = self.reasoning.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::ReasoningDelta(reasoning));
        }
        if let Some(content) = self.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::TextDelta(content));
        }
        for (index, call) in self.tool_calls.into_iter().enumerate() {
            events.push(StreamEvent::ToolCallDelta {
                index,
                id: Some(call.id),
                name: Some(call.function.name),
                arguments_delta: call.function.arguments,
            });
        }
        if let Some(usage) = self.usage {
            events.push(StreamEvent::Usage(usage));
        }
        events.push(StreamEvent::Done);
        events
    }
}

/// A resolved, callable language model.
pub trait ChatModel: Send + Sync + 'static {
    /// Provider-qualified model identifier, used in logs.
    fn identifier(&self) -> &str;

    /// Run one completion.
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a>;

    /// Run one completion, yielding output incrementally.
    ///
    /// The default implementation waits for [`complete`](Self::complete) and
    /// replays the response as a single burst of events.
    fn complete_stream(self: Arc<Self>, request: ModelRequest) -> DeltaStream {
        futures::stream::once(async move { self.complete(&request).await })
            .flat_map(|result| {
                let events: Vec<Result<StreamEvent, String>> = match result {
                    Ok(response) => response.into_events().into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(events)
            })
            .boxed()
    }
}

/// Turns a [`ModelBinding`] into a [`ChatModel`] handle.
pub trait ModelResolver: Send + Sync {
    fn resolve(
        &self,
        binding: &ModelBinding,
        sampling: &SamplingParameters,
    ) -> AgentResult<Arc<dyn ChatModel>>;
}

/// Resolver that always hands out the same model. Handy for tests and for
/// callers that construct their own client.
pub struct FixedModel(pub Arc<dyn ChatModel>);

impl ModelResolver for FixedModel {
    fn resolve(
        &self,
        _binding: &ModelBinding,
        _sampling: &SamplingParameters,
    ) -> AgentResult<Arc<dyn ChatModel>> {
        Ok(Arc::clone(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::streaming::ResponseAssembler;

    struct Canned(ModelResponse);

    impl ChatModel for Canned {
        fn identifier(&self) -> &str {
            "test/canned"
        }

        fn complete<'a>(&'a self, _request: &'a ModelRequest) -> ModelFuture<'a> {
            let response = self.0.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    #[test]
    fn into_message_prefers_tool_calls() {
        let call = ToolCall::new("c1", "lookup", "{}");
        let msg = ModelResponse::tool_calls(vec![call.clone()]).into_message();
        assert_eq!(msg.calls(), &[call]);
        assert!(msg.content.is_none());

        let msg = ModelResponse::text("hi").into_message();
        assert_eq!(msg.text(), "hi");
        assert!(msg.tool_calls.is_none());
    }

    #[tokio::test]
    async fn default_stream_replays_complete() {
        let response = ModelResponse {
            content: Some("hello".into()),
            tool_calls: vec![ToolCall::new("c1", "lookup", r#"{"q":"x"}"#)],
            ..Default::default()
        };
        let model: Arc<dyn ChatModel> = Arc::new(Canned(response.clone()));
        let events: Vec<_> = model
            .complete_stream(ModelRequest::default())
            .collect::<Vec<_>>()
            .await;

        let mut assembler = ResponseAssembler::default();
        for event in events {
            assembler.push(event.unwrap());
        }
        assert_eq!(assembler.finish(), response);
    }

    #[test]
    fn fixed_resolver_ignores_binding() {
        let model: Arc<dyn ChatModel> = Arc::new(Canned(ModelResponse::text("x")));
        let resolved = FixedModel(model)
            .resolve(&ModelBinding::new("anything"), &SamplingParameters::default())
            .unwrap();
        assert_eq!(resolved.identifier(), "test/canned");
    }
}
