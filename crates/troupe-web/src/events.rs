//! Translation of agent stream units into client-facing response events.
//!
//! Clients of `POST /responses` see a flat sequence of [`ResponseEvent`]s:
//!
//! ```text
//! start ─> (action | result)* ─> end
//! ```
//!
//! `action` marks a tool call (with the tool's description), `result`
//! carries assistant text, and `end` closes the stream. When the
//! invocation fails the stream still ends with `end`, whose `output` is the
//! error text.

use std::collections::{HashMap, VecDeque};

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use troupe::agent::{ChunkStream, StreamChunk};
use troupe::{AgentError, Message, MessageRole, ToolDef};

/// Kind of a [`ResponseEvent`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseEventType {
    Start,
    Action,
    Result,
    End,
}

/// One SSE `data:` payload. `action` and `action_desc` are only present on
/// `action` events.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResponseEvent {
    #[serde(rename = "type")]
    pub kind: ResponseEventType,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_desc: Option<String>,
}

impl ResponseEvent {
    fn plain(kind: ResponseEventType, output: impl Into<String>) -> Self {
        Self {
            kind,
            output: output.into(),
            action: None,
            action_desc: None,
        }
    }

    pub fn start(output: impl Into<String>) -> Self {
        Self::plain(ResponseEventType::Start, output)
    }

    pub fn action(action: impl Into<String>, action_desc: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: ResponseEventType::Action,
            output: output.into(),
            action: Some(action.into()),
            action_desc: Some(action_desc.into()),
        }
    }

    pub fn result(output: impl Into<String>) -> Self {
        Self::plain(ResponseEventType::Result, output)
    }

    pub fn end(output: impl Into<String>) -> Self {
        Self::plain(ResponseEventType::End, output)
    }
}

/// Stateful converter from [`StreamChunk`]s to [`ResponseEvent`]s.
///
/// Understands `messages` mode natively. `updates` units are only
/// translated while no `messages` unit has been seen, so an agent streaming
/// both modes does not produce every answer twice. `values` units are
/// ignored.
#[derive(Debug, Clone)]
pub struct EventAdapter {
    descriptions: HashMap<String, String>,
    start_output: String,
    end_output: String,
    saw_messages: bool,
}

impl EventAdapter {
    /// Adapter that labels tool calls with the descriptions in `tools`.
    pub fn new(tools: &[ToolDef]) -> Self {
        Self {
            descriptions: tools
                .iter()
                .map(|t| (t.function.name.clone(), t.function.description.clone()))
                .collect(),
            start_output: "Agent started".into(),
            end_output: "Agent finished".into(),
            saw_messages: false,
        }
    }

    /// Override the `output` of the `start` and `end` events.
    pub fn with_labels(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_output = start.into();
        self.end_output = end.into();
        self
    }

    pub fn start(&self) -> ResponseEvent {
        ResponseEvent::start(self.start_output.clone())
    }

    pub fn end(&self) -> ResponseEvent {
        ResponseEvent::end(self.end_output.clone())
    }

    pub fn error(&self, error: &AgentError) -> ResponseEvent {
        ResponseEvent::end(error.to_string())
    }

    /// Events for one stream unit, possibly none.
    pub fn on_chunk(&mut self, chunk: &StreamChunk) -> Vec<ResponseEvent> {
        match chunk {
            StreamChunk::MessageDelta { content, .. } => {
                self.saw_messages = true;
                if content.is_empty() {
                    Vec::new()
                } else {
                    vec![ResponseEvent::result(content.clone())]
                }
            }
            StreamChunk::Message { message, .. } => {
                self.saw_messages = true;
                self.message_events(message)
            }
            StreamChunk::Update { messages, .. } if !self.saw_messages => {
                messages.iter().flat_map(|m| self.message_events(m)).collect()
            }
            StreamChunk::Update { .. } | StreamChunk::Values { .. } => Vec::new(),
        }
    }

    fn message_events(&self, message: &Message) -> Vec<ResponseEvent> {
        if message.role != MessageRole::Assistant {
            return Vec::new();
        }
        if message.has_tool_calls() {
            return message
                .calls()
                .iter()
                .map(|call| {
                    let name = &call.function.name;
                    let description = self
                        .descriptions
                        .get(name)
                        .filter(|d| !d.is_empty())
                        .cloned()
                        .unwrap_or_else(|| name.clone());
                    ResponseEvent::action(name.clone(), description, call.function.arguments.clone())
                })
                .collect();
        }
        if message.text().is_empty() {
            Vec::new()
        } else {
            vec![ResponseEvent::result(message.text())]
        }
    }

    /// Wrap `chunks` into a complete event stream: `start`, the translated
    /// units, then `end`. An error item ends the stream early with an `end`
    /// event carrying the error text.
    pub fn adapt(self, chunks: ChunkStream) -> BoxStream<'static, ResponseEvent> {
        enum Phase {
            Start,
            Running,
            Done,
        }

        let init = (chunks, self, Phase::Start, VecDeque::<ResponseEvent>::new());
        futures::stream::unfold(init, |(mut chunks, mut adapter, mut phase, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (chunks, adapter, phase, pending)));
                }
                match phase {
                    Phase::Start => {
                        pending.push_back(adapter.start());
                        phase = Phase::Running;
                    }
                    Phase::Running => match chunks.next().await {
                        Some(Ok(chunk)) => pending.extend(adapter.on_chunk(&chunk)),
                        Some(Err(e)) => {
                            pending.push_back(adapter.error(&e));
                            phase = Phase::Done;
                        }
                        None => {
                            pending.push_back(adapter.end());
                            phase = Phase::Done;
                        }
                    },
                    Phase::Done => return None,
                }
            }
        })
        .boxed()
    }
}
