//! Server-Sent Events (SSE) parsing for chat-completion streams.
//!
//! [`SseDecoder`] turns raw body bytes into [`StreamEvent`]s as they arrive
//! off the wire, and [`ResponseAssembler`] folds a sequence of events back
//! into a complete [`ModelResponse`](super::model::ModelResponse) once the
//! stream ends. The graph forwards text deltas to callers while the
//! assembler accumulates the full turn.

use crate::api::model::ModelResponse;
use crate::{ToolCall, UsageInfo};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// A single event from an SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// An incremental reasoning/thinking delta.
    ReasoningDelta(String),
    /// A tool call chunk (accumulated until complete).
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// Token usage information (sent in the final chunk).
    Usage(UsageInfo),
    /// The stream is complete.
    Done,
}

/// Raw SSE data chunk from an OpenAI-compatible API.
#[derive(Deserialize, Debug)]
struct RawStreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
    error: Option<StreamError>,
}

#[derive(Deserialize, Debug)]
struct StreamError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    reasoning: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
struct StreamToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

// ── Decoder ────────────────────────────────────────────────────────

/// Incremental SSE line decoder.
///
/// Feed it body chunks with [`push`](Self::push); complete `data:` lines are
/// parsed immediately, partial lines wait for the next chunk.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `data: [DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume a chunk of body bytes, returning the events it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();
        while !self.done
            && let Some(newline_pos) = self.buffer.find('\n')
        {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            self.handle_line(line.trim(), &mut events)?;
        }
        Ok(events)
    }

    /// Flush whatever is left in the buffer at end of body. Always ends
    /// with [`StreamEvent::Done`].
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>, String> {
        let mut events = Vec::new();
        if !self.done {
            let remaining = std::mem::take(&mut self.buffer);
            self.handle_line(remaining.trim(), &mut events)?;
        }
        if !self.done {
            self.done = true;
            events.push(StreamEvent::Done);
        }
        Ok(events)
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> Result<(), String> {
        if line.is_empty() || line.starts_with(':') {
            return Ok(());
        }
        if line == "data: [DONE]" {
            self.done = true;
            events.push(StreamEvent::Done);
            return Ok(());
        }
        if let Some(data) = line.strip_prefix("data:") {
            parse_sse_data(data.trim_start(), events)?;
        }
        Ok(())
    }
}

/// Parse a single SSE `data:` payload into stream events.
///
/// Unparseable payloads are logged and skipped; an in-band `error` object
/// aborts the stream.
pub fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) -> Result<(), String> {
    let chunk = match serde_json::from_str::<RawStreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e}; data: {data}");
            return Ok(());
        }
    };

    if let Some(err) = chunk.error {
        return Err(format!("stream error: {}", err.message));
    }
    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(usage));
    }

    for choice in chunk.choices.unwrap_or_default() {
        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content
                && !content.is_empty()
            {
                events.push(StreamEvent::TextDelta(content));
            }
            if let Some(reasoning) = delta.reasoning
                && !reasoning.is_empty()
            {
                events.push(StreamEvent::ReasoningDelta(reasoning));
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let func = tc.function.unwrap_or(StreamFunctionDelta {
                    name: None,
                    arguments: None,
                });
                events.push(StreamEvent::ToolCallDelta {
                    index: tc.index.unwrap_or(0),
                    id: tc.id,
                    name: func.name,
                    arguments_delta: func.arguments.unwrap_or_default(),
                });
            }
        }
        if choice.finish_reason.is_some() {
            trace!("Stream finish_reason: {:?}", choice.finish_reason);
        }
    }
    Ok(())
}

// ── Assembly ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream events into a complete [`ModelResponse`].
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    text: String,
    reasoning: String,
    calls: BTreeMap<usize, PartialCall>,
    usage: Option<UsageInfo>,
}

impl ResponseAssembler {
    pub fn push(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TextDelta(delta) => self.text.push_str(&delta),
            StreamEvent::ReasoningDelta(delta) => self.reasoning.push_str(&delta),
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments_delta,
            } => {
                let call = self.calls.entry(index).or_default();
                if let Some(id) = id {
                    call.id = id;
                }
                if let Some(name) = name {
                    call.name.push_str(&name);
                }
                call.arguments.push_str(&arguments_delta);
            }
            StreamEvent::Usage(usage) => self.usage = Some(usage),
            StreamEvent::Done => {}
        }
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> ModelResponse {
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                ToolCall::new(id, call.name, call.arguments)
            })
            .collect();
        ModelResponse {
            content: (!self.text.is_empty()).then_some(self.text),
            tool_calls,
            usage: self.usage,
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
        }
    }
}

/// Assemble a complete text string from a sequence of stream events.
pub fn collect_text(events: &[StreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let StreamEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        let first = decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel")
            .unwrap();
        assert!(first.is_empty());
        let second = decoder
            .push(b"lo\"}}]}\n\n: keep-alive\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n")
            .unwrap();
        assert_eq!(collect_text(&second), "Hello world");

        let rest = decoder.push(b"data: [DONE]\n").unwrap();
        assert_eq!(rest, vec![StreamEvent::Done]);
        assert!(decoder.is_done());
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn decoder_finish_appends_done() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"choices\":[]}").unwrap();
        assert_eq!(decoder.finish().unwrap(), vec![StreamEvent::Done]);
    }

    #[test]
    fn in_band_error_aborts() {
        let mut events = Vec::new();
        let err = parse_sse_data(r#"{"error":{"message":"overloaded"}}"#, &mut events).unwrap_err();
        assert!(err.contains("overloaded"));
    }

    #[test]
    fn assembler_joins_tool_call_fragments() {
        let mut assembler = ResponseAssembler::default();
        assembler.push(StreamEvent::ToolCallDelta {
            index: 0,
            id: Some("call_a".into()),
            name: Some("lookup".into()),
            arguments_delta: "{\"q\":".into(),
        });
        assembler.push(StreamEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments_delta: "\"rust\"}".into(),
        });
        assembler.push(StreamEvent::Usage(UsageInfo {
            prompt_tokens: Some(10),
            completion_tokens: Some(5),
            total_tokens: Some(15),
        }));
        let response = assembler.finish();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].function.arguments, r#"{"q":"rust"}"#);
        assert_eq!(response.usage.unwrap().total_tokens, Some(15));
    }
}
