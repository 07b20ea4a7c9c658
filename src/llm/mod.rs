//! LLM provider plumbing: structured generation and embeddings.
//!
//! Two small capability traits ([`Generator`], [`Embedder`]) decouple the
//! pipeline from any single vendor. Provider selection is a constructor-time
//! switch in [`build_generator`]/[`build_embedder`]; there is no runtime
//! reflection or dynamic loading.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, LlmConfig, LlmProvider};
use crate::models::JsonValue;

mod anthropic;
mod backoff;
mod cohere;
mod google;
mod mistral;
mod openai;

pub use anthropic::AnthropicProvider;
pub use backoff::with_backoff;
pub use cohere::CohereProvider;
pub use google::GoogleProvider;
pub use mistral::MistralProvider;
pub use openai::OpenAiProvider;

/// Failures of the LLM transport layer.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error (status {status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("malformed {provider} response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: &'static str,
        capability: &'static str,
    },
}

impl LlmError {
    /// Transient failures worth retrying with backoff: transport problems,
    /// rate limits and provider-side 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Structured-output generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate JSON constrained by `response_schema` (a JSON schema).
    ///
    /// Implementations run at temperature 0 so that a fixed prompt is stable
    /// across identical attempts.
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        response_schema: &JsonValue,
    ) -> Result<JsonValue, LlmError>;
}

/// Text embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text` into a fixed-length vector. The length is a property of
    /// the provider+model pair and must not vary between calls.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Build the generation provider selected by `cfg`.
pub fn build_generator(cfg: &LlmConfig) -> Result<Arc<dyn Generator>, ConfigError> {
    let base_url = cfg.base_url.as_deref();
    Ok(match cfg.provider {
        LlmProvider::Anthropic => Arc::new(AnthropicProvider::new(
            &cfg.api_key,
            &cfg.model,
            cfg.max_tokens,
            base_url,
        )),
        LlmProvider::OpenAi => Arc::new(OpenAiProvider::new(
            &cfg.api_key,
            &cfg.model,
            cfg.max_tokens,
            base_url,
        )),
        LlmProvider::Cohere => Arc::new(CohereProvider::new(
            &cfg.api_key,
            &cfg.model,
            cfg.max_tokens,
            base_url,
        )),
        LlmProvider::Mistral => Arc::new(MistralProvider::new(
            &cfg.api_key,
            &cfg.model,
            cfg.max_tokens,
            base_url,
        )),
        LlmProvider::Google => Arc::new(GoogleProvider::new(
            &cfg.api_key,
            &cfg.model,
            cfg.max_tokens,
            base_url,
        )),
    })
}

/// Build the embedding provider for the L2 cache.
///
/// Anthropic exposes no embeddings endpoint; selecting it for L2 is a
/// configuration error rather than a runtime surprise.
pub fn build_embedder(
    provider: LlmProvider,
    model: &str,
    api_key: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn Embedder>, ConfigError> {
    Ok(match provider {
        LlmProvider::Anthropic => {
            return Err(ConfigError::Unsupported(
                "anthropic has no embeddings endpoint; use openai, cohere, mistral or google \
                 for cache.l2"
                    .to_string(),
            ))
        }
        LlmProvider::OpenAi => Arc::new(OpenAiProvider::new(api_key, model, 0, base_url)),
        LlmProvider::Cohere => Arc::new(CohereProvider::new(api_key, model, 0, base_url)),
        LlmProvider::Mistral => Arc::new(MistralProvider::new(api_key, model, 0, base_url)),
        LlmProvider::Google => Arc::new(GoogleProvider::new(api_key, model, 0, base_url)),
    })
}

/// Strip markdown code fences some models wrap around JSON output.
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Skip an optional language tag on the opening fence line.
        let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &rest[body_start..];
        let body_end = body.rfind("```").unwrap_or(body.len());
        return body[..body_end].trim();
    }
    text
}

/// Parse the JSON text a chat-style provider returned as message content.
pub(crate) fn parse_json_content(
    provider: &'static str,
    content: &str,
) -> Result<JsonValue, LlmError> {
    serde_json::from_str(strip_markdown_fences(content)).map_err(|e| LlmError::Malformed {
        provider,
        message: format!("content is not valid JSON: {e}"),
    })
}

#[cfg(test)]
pub(crate) fn null_generator() -> Arc<dyn Generator> {
    struct NullGenerator;

    #[async_trait]
    impl Generator for NullGenerator {
        async fn generate_structured(
            &self,
            _system: &str,
            _user: &str,
            _schema: &JsonValue,
        ) -> Result<JsonValue, LlmError> {
            Err(LlmError::Malformed {
                provider: "null",
                message: "null generator never answers".to_string(),
            })
        }
    }

    Arc::new(NullGenerator)
}
