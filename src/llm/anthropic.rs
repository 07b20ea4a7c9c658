//! Anthropic Messages API provider.
//!
//! Structured output is obtained by forcing a single tool call whose
//! `input_schema` is the caller's response schema; the tool input IS the
//! structured result. Anthropic has no embeddings endpoint, so this provider
//! only implements [`Generator`].

use async_trait::async_trait;
use serde_json::json;

use crate::models::JsonValue;

use super::{with_backoff, Embedder, Generator, LlmError};

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const TOOL_NAME: &str = "record_structured_output";
const MAX_RETRIES: u32 = 3;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str, max_tokens: u32, base_url: Option<&str>) -> Self {
        AnthropicProvider {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        }
    }

    async fn generate_once(
        &self,
        system: &str,
        user: &str,
        response_schema: &JsonValue,
    ) -> Result<JsonValue, LlmError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens.max(1),
            "temperature": 0,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
            "tools": [{
                "name": TOOL_NAME,
                "description": "Record the structured answer to the user's request.",
                "input_schema": response_schema,
            }],
            "tool_choice": { "type": "tool", "name": TOOL_NAME },
        });

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let payload: JsonValue = resp.json().await?;
        payload
            .get("content")
            .and_then(JsonValue::as_array)
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(JsonValue::as_str) == Some("tool_use"))
            })
            .and_then(|block| block.get("input"))
            .cloned()
            .ok_or_else(|| LlmError::Malformed {
                provider: PROVIDER,
                message: "response contains no tool_use block".to_string(),
            })
    }
}

#[async_trait]
impl Generator for AnthropicProvider {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        response_schema: &JsonValue,
    ) -> Result<JsonValue, LlmError> {
        with_backoff("anthropic generate", MAX_RETRIES, || {
            self.generate_once(system, user, response_schema)
        })
        .await
    }
}

#[async_trait]
impl Embedder for AnthropicProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Unsupported {
            provider: PROVIDER,
            capability: "embeddings",
        })
    }
}
