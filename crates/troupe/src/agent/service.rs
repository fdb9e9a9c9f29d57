//! The uniform contract every agent is served through.

use crate::agent::metadata::AgentMetadata;
use crate::agent::state::AgentState;
use crate::agent::stream::StreamChunk;
use crate::error::{AgentError, AgentResult};
use crate::{Message, ToolDef};
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`AgentService::chat`].
pub type AgentFuture<'a, T> = Pin<Box<dyn Future<Output = AgentResult<T>> + Send + 'a>>;

/// Lazy, single-pass stream returned by [`AgentService::chat_stream`].
pub type ChunkStream = BoxStream<'static, AgentResult<StreamChunk>>;

/// An invocable agent, single or supervisor.
pub trait AgentService: Send + Sync {
    fn metadata(&self) -> &AgentMetadata;

    /// Run to completion on `thread_id` and return the terminal state.
    fn chat<'a>(&'a self, messages: Vec<Message>, thread_id: &'a str) -> AgentFuture<'a, AgentState>;

    /// Run on `thread_id`, yielding units as they are produced. Nothing
    /// happens until the stream is polled; dropping it cancels the run.
    fn chat_stream(&self, messages: Vec<Message>, thread_id: &str) -> ChunkStream;

    /// Tools the model can currently call.
    fn tool_definitions(&self) -> Vec<ToolDef>;
}

/// Reject requests with no messages or a blank thread id.
pub fn validate_request(messages: &[Message], thread_id: &str) -> AgentResult<()> {
    if messages.is_empty() {
        return Err(AgentError::invalid_request("message list is empty"));
    }
    if thread_id.trim().is_empty() {
        return Err(AgentError::invalid_request("thread id is empty"));
    }
    Ok(())
}

/// A stream that yields `error` once.
pub fn error_stream(error: AgentError) -> ChunkStream {
    Box::pin(futures::stream::once(async move { Err(error) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn validation_rejects_empty_inputs() {
        assert!(matches!(
            validate_request(&[], "t"),
            Err(AgentError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_request(&[Message::user("hi")], "  "),
            Err(AgentError::InvalidRequest(_))
        ));
        assert!(validate_request(&[Message::user("hi")], "t").is_ok());
    }

    #[tokio::test]
    async fn error_stream_yields_once() {
        let items: Vec<_> = error_stream(AgentError::stale_graph("a")).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AgentError::StaleGraph { .. })));
    }
}
