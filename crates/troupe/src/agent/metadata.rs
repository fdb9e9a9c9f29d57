//! Agent identity, model binding, and sampling parameters.
//!
//! [`AgentMetadata`] is the value every runtime carries: the agent's name,
//! which model it talks to ([`ModelBinding`]), and how that model samples
//! ([`SamplingParameters`]). Updating sampling parameters is a *merge*:
//! fields left unset in the update keep their prior values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reasoning effort level for reasoning-capable models.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Xhigh,
    High,
    Medium,
    Low,
    Minimal,
    None,
}

/// A secret API key. Never printed by `Debug` and never serialized.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(**********)")
    }
}

/// Which model an agent talks to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelBinding {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Falls back to the provider's environment variable when absent.
    #[serde(default, skip_serializing)]
    pub credential: Option<Credential>,
}

impl ModelBinding {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            provider: None,
            credential: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into()).filter(|p: &String| !p.is_empty());
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// `provider:name` when a provider is set, otherwise just the name.
    pub fn identifier(&self) -> String {
        match self.provider.as_deref() {
            Some(provider) => format!("{provider}:{}", self.model_name),
            None => self.model_name.clone(),
        }
    }
}

/// Sampling knobs forwarded to the model. Every field is optional; unset
/// fields are omitted from provider requests.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SamplingParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Retry budget for transient model-call failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
    /// Token id → bias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, i32>>,
    /// `Some(false)` disables token-level streaming even in `messages` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl SamplingParameters {
    /// Overlay `update` onto `self`: set fields in `update` win, unset
    /// fields leave the current value untouched.
    pub fn merge(&mut self, update: SamplingParameters) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if update.$field.is_some() { self.$field = update.$field; })*
            };
        }
        overlay!(
            temperature,
            max_retries,
            presence_penalty,
            frequency_penalty,
            seed,
            logprobs,
            top_logprobs,
            logit_bias,
            streaming,
            n,
            top_p,
            max_tokens,
            reasoning_effort,
        );
    }

    /// Builder-style merge.
    pub fn merged(mut self, update: SamplingParameters) -> Self {
        self.merge(update);
        self
    }
}

/// Identity and model configuration of one agent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentMetadata {
    pub name: String,
    pub model: ModelBinding,
    #[serde(default)]
    pub sampling: SamplingParameters,
}

impl AgentMetadata {
    pub fn new(name: impl Into<String>, model: ModelBinding) -> Self {
        Self {
            name: name.into(),
            model,
            sampling: SamplingParameters::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParameters) -> Self {
        self.sampling = sampling;
        self
    }

    /// Replace the model binding wholesale.
    pub fn update_model_info(&mut self, model: ModelBinding) {
        self.model = model;
    }

    /// Merge `update` into the current sampling parameters.
    pub fn update_sampling_parameters(&mut self, update: SamplingParameters) {
        self.sampling.merge(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_merge_keeps_unset_fields() {
        let mut metadata = AgentMetadata::new("a", ModelBinding::new("m")).with_sampling(
            SamplingParameters {
                temperature: Some(0.7),
                seed: Some(42),
                ..Default::default()
            },
        );
        metadata.update_sampling_parameters(SamplingParameters {
            temperature: Some(0.9),
            ..Default::default()
        });
        assert_eq!(
            metadata.sampling,
            SamplingParameters {
                temperature: Some(0.9),
                seed: Some(42),
                ..Default::default()
            }
        );
    }

    #[test]
    fn empty_update_is_identity() {
        let base = SamplingParameters {
            max_tokens: Some(512),
            reasoning_effort: Some(ReasoningEffort::High),
            ..Default::default()
        };
        assert_eq!(base.clone().merged(SamplingParameters::default()), base);
    }

    #[test]
    fn identifier_includes_provider() {
        assert_eq!(ModelBinding::new("gpt-4o").identifier(), "gpt-4o");
        assert_eq!(
            ModelBinding::new("gpt-4o").with_provider("openai").identifier(),
            "openai:gpt-4o"
        );
        assert_eq!(ModelBinding::new("gpt-4o").with_provider("").identifier(), "gpt-4o");
    }

    #[test]
    fn credential_is_redacted() {
        let binding = ModelBinding::new("m").with_credential(Credential::new("sk-secret"));
        let debug = format!("{binding:?}");
        assert!(!debug.contains("sk-secret"));
        let json = serde_json::to_string(&binding).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn metadata_deserializes_with_defaults() {
        let json = r#"{"name": "researcher", "model": {"model_name": "gpt-4o", "provider": "openai", "credential": "sk-x"}}"#;
        let metadata: AgentMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.sampling, SamplingParameters::default());
        assert_eq!(metadata.model.credential.unwrap().expose(), "sk-x");
    }
}
