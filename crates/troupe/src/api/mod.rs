//! Model interaction layer: the model trait, the OpenRouter client,
//! streaming, and retry.
//!
//! - [`model`]: [`ChatModel`](model::ChatModel), [`ModelResolver`](model::ModelResolver),
//!   request/response types and structured [`ResponseFormat`](model::ResponseFormat)s.
//! - [`openrouter`]: OpenRouter HTTP client and the default resolver.
//! - [`streaming`]: SSE decoder for incremental text, reasoning, and
//!   tool-call deltas, plus a [`ResponseAssembler`](streaming::ResponseAssembler).
//! - [`retry`]: transient error detection (429, 5xx, network timeouts) with
//!   exponential backoff. Never retries 400/401 errors.

pub mod model;
pub mod openrouter;
pub mod retry;
pub mod streaming;

pub use model::{ChatModel, FixedModel, ModelRequest, ModelResolver, ModelResponse, ResponseFormat};
pub use openrouter::{OpenRouterClient, OpenRouterResolver};
pub use retry::RetryConfig;
pub use streaming::StreamEvent;
