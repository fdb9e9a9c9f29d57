//! OpenRouter-backed [`ChatModel`] implementation.
//!
//! [`OpenRouterClient`] is a thin async client for the OpenRouter chat
//! completions endpoint (single-shot and SSE streaming).
//! [`OpenRouterResolver`] turns a [`ModelBinding`] into an
//! [`OpenRouterModel`], reading the credential from the binding or from the
//! `OPENROUTER_KEY` environment variable.

use crate::agent::metadata::{ModelBinding, ReasoningEffort, SamplingParameters};
use crate::api::model::{ChatModel, DeltaStream, ModelFuture, ModelRequest, ModelResolver, ModelResponse};
use crate::api::streaming::{SseDecoder, StreamEvent};
use crate::error::{AgentError, AgentResult};
use crate::{Message, ToolCall, ToolDef, UsageInfo};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// OpenRouter chat completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Environment variable consulted when a binding carries no credential.
pub const OPENROUTER_KEY_ENV: &str = "OPENROUTER_KEY";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<WireResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Configuration for extended thinking / reasoning tokens.
#[derive(Serialize, Clone, Debug)]
pub struct ReasoningConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
}

/// `response_format` as sent on the wire.
#[derive(Serialize, Debug)]
pub struct WireResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: &'static str,
    pub json_schema: JsonSchemaFormat,
}

#[derive(Serialize, Debug)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
    pub strict: bool,
}

impl ChatRequest {
    /// Build a wire request for `model` from a graph-level [`ModelRequest`].
    pub fn from_model_request(model: &str, request: &ModelRequest) -> Self {
        let sampling = &request.sampling;
        Self {
            model: model.to_string(),
            messages: request.messages.iter().map(Message::for_api).collect(),
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            frequency_penalty: sampling.frequency_penalty,
            presence_penalty: sampling.presence_penalty,
            seed: sampling.seed,
            logprobs: sampling.logprobs,
            top_logprobs: sampling.top_logprobs,
            logit_bias: sampling.logit_bias.clone(),
            n: sampling.n,
            response_format: request.response_format.as_ref().map(|f| WireResponseFormat {
                fmt_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: f.name.clone(),
                    schema: f.schema.clone(),
                    strict: true,
                },
            }),
            tools: (!request.tools.is_empty()).then(|| request.tools.clone()),
            reasoning: sampling.reasoning_effort.clone().map(|effort| ReasoningConfig {
                effort: Some(effort),
            }),
            stream: false,
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
    reasoning: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("troupe/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENROUTER_URL.to_string(),
            referer: "https://github.com/troupe-rs/troupe".into(),
            title: "troupe".into(),
        })
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn post(&self, body: &ChatRequest) -> reqwest::RequestBuilder {
        self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ModelResponse, String> {
        debug!(
            "LLM request: model={}, messages={}, tools={}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .post(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;
        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        let message = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .map(|c| c.message);
        Ok(match message {
            Some(m) => ModelResponse {
                content: m.content,
                tool_calls: m.tool_calls.unwrap_or_default(),
                usage: parsed.usage,
                reasoning: m.reasoning,
            },
            None => ModelResponse {
                usage: parsed.usage,
                ..Default::default()
            },
        })
    }

    /// Send a streaming chat completion request. Events are decoded as body
    /// chunks arrive; dropping the stream closes the connection.
    pub async fn chat_stream(&self, mut body: ChatRequest) -> Result<DeltaStream, String> {
        body.stream = true;
        debug!("Sending streaming chat request: model={}", body.model);

        let resp = self
            .post(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        struct Reader {
            resp: reqwest::Response,
            decoder: SseDecoder,
            pending: VecDeque<StreamEvent>,
            finished: bool,
        }

        let reader = Reader {
            resp,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        };

        let stream = futures::stream::unfold(reader, |mut r| async move {
            loop {
                if let Some(event) = r.pending.pop_front() {
                    return Some((Ok(event), r));
                }
                if r.finished {
                    return None;
                }
                let decoded = match r.resp.chunk().await {
                    Ok(Some(bytes)) => r.decoder.push(&bytes),
                    Ok(None) => {
                        r.finished = true;
                        r.decoder.finish()
                    }
                    Err(e) => Err(format!("failed to read streaming chunk: {e}")),
                };
                match decoded {
                    Ok(events) => {
                        r.pending.extend(events);
                        if r.decoder.is_done() {
                            r.finished = true;
                        }
                    }
                    Err(e) => {
                        r.finished = true;
                        r.pending.clear();
                        return Some((Err(e), r));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

// ── ChatModel / ModelResolver ──────────────────────────────────────

/// A model served through OpenRouter.
pub struct OpenRouterModel {
    client: Arc<OpenRouterClient>,
    model: String,
}

impl OpenRouterModel {
    pub fn new(client: Arc<OpenRouterClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl ChatModel for OpenRouterModel {
    fn identifier(&self) -> &str {
        &self.model
    }

    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        Box::pin(async move {
            let body = ChatRequest::from_model_request(&self.model, request);
            self.client.chat(&body).await
        })
    }

    fn complete_stream(self: Arc<Self>, request: ModelRequest) -> DeltaStream {
        let body = ChatRequest::from_model_request(&self.model, &request);
        let opened = async move { self.client.chat_stream(body).await };
        Box::pin(futures::stream::once(opened).flat_map(|result| match result {
            Ok(stream) => stream,
            Err(e) => Box::pin(futures::stream::iter([Err(e)])) as DeltaStream,
        }))
    }
}

/// Resolves bindings to [`OpenRouterModel`]s.
///
/// The OpenRouter model id is `provider/name` when the binding names a
/// provider and the model name is not already qualified.
#[derive(Debug, Clone, Default)]
pub struct OpenRouterResolver {
    endpoint: Option<String>,
}

impl OpenRouterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The model id sent to OpenRouter for `binding`.
    pub fn model_id(binding: &ModelBinding) -> String {
        match binding.provider.as_deref() {
            Some(provider) if !binding.model_name.contains('/') => {
                format!("{provider}/{}", binding.model_name)
            }
            _ => binding.model_name.clone(),
        }
    }
}

impl ModelResolver for OpenRouterResolver {
    fn resolve(
        &self,
        binding: &ModelBinding,
        _sampling: &SamplingParameters,
    ) -> AgentResult<Arc<dyn ChatModel>> {
        if binding.model_name.trim().is_empty() {
            return Err(AgentError::configuration("model binding has an empty model name"));
        }
        let key = match binding.credential.as_ref() {
            Some(credential) => credential.expose().to_string(),
            None => std::env::var(OPENROUTER_KEY_ENV).map_err(|_| {
                AgentError::configuration(format!(
                    "no credential for model '{}' and {OPENROUTER_KEY_ENV} is not set",
                    binding.identifier()
                ))
            })?,
        };

        let mut client = OpenRouterClient::new(key).map_err(AgentError::configuration)?;
        if let Some(ref endpoint) = self.endpoint {
            client = client.with_endpoint(endpoint.clone());
        }
        let model_id = Self::model_id(binding);
        debug!("Resolved model binding {} -> {model_id}", binding.identifier());
        Ok(Arc::new(OpenRouterModel::new(Arc::new(client), model_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::metadata::Credential;
    use crate::api::model::ResponseFormat;

    #[test]
    fn chat_request_skips_unset_sampling() {
        let request = ModelRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(ChatRequest::from_model_request("openai/gpt-4o", &request)).unwrap();
        assert_eq!(json["model"], "openai/gpt-4o");
        for absent in ["temperature", "seed", "tools", "stream", "response_format", "reasoning"] {
            assert!(json.get(absent).is_none(), "{absent} should be omitted");
        }
    }

    #[test]
    fn chat_request_maps_sampling_and_format() {
        let mut request = ModelRequest {
            messages: vec![Message::user("hi")],
            response_format: Some(ResponseFormat::new("report", serde_json::json!({"type": "object"}))),
            ..Default::default()
        };
        request.sampling.temperature = Some(0.2);
        request.sampling.seed = Some(7);
        request.sampling.reasoning_effort = Some(ReasoningEffort::Low);

        let json = serde_json::to_value(ChatRequest::from_model_request("m", &request)).unwrap();
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(json["seed"], 7);
        assert_eq!(json["reasoning"]["effort"], "low");
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "report");
    }

    #[test]
    fn model_id_qualifies_with_provider() {
        let mut binding = ModelBinding::new("claude-sonnet-4").with_provider("anthropic");
        assert_eq!(OpenRouterResolver::model_id(&binding), "anthropic/claude-sonnet-4");
        binding.model_name = "openai/gpt-4o".into();
        assert_eq!(OpenRouterResolver::model_id(&binding), "openai/gpt-4o");
    }

    #[test]
    fn resolve_with_explicit_credential() {
        let binding = ModelBinding::new("gpt-4o")
            .with_provider("openai")
            .with_credential(Credential::new("sk-test"));
        let model = OpenRouterResolver::new()
            .resolve(&binding, &SamplingParameters::default())
            .unwrap();
        assert_eq!(model.identifier(), "openai/gpt-4o");
    }

    #[test]
    fn resolve_rejects_empty_model_name() {
        let binding = ModelBinding::new("  ").with_credential(Credential::new("sk-test"));
        let err = match OpenRouterResolver::new().resolve(&binding, &SamplingParameters::default()) {
            Err(e) => e,
            Ok(_) => panic!("empty model name should not resolve"),
        };
        assert!(err.is_configuration());
    }
}
