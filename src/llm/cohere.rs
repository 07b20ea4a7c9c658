//! Cohere v2 chat + embed provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::JsonValue;

use super::{parse_json_content, with_backoff, Embedder, Generator, LlmError};

const PROVIDER: &str = "cohere";
const DEFAULT_BASE_URL: &str = "https://api.cohere.com";
const MAX_RETRIES: u32 = 3;

pub struct CohereProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: EmbedVectors,
}

#[derive(Debug, Deserialize)]
struct EmbedVectors {
    float: Vec<Vec<f32>>,
}

impl CohereProvider {
    pub fn new(api_key: &str, model: &str, max_tokens: u32, base_url: Option<&str>) -> Self {
        CohereProvider {
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
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": {
                "type": "json_object",
                "schema": response_schema,
            },
        });

        let resp = self
            .client
            .post(format!("{}/v2/chat", self.base_url))
            .bearer_auth(&self.api_key)
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

        let payload: ChatResponse = resp.json().await?;
        let content = payload
            .message
            .content
            .iter()
            .find_map(|block| block.text.as_deref())
            .ok_or_else(|| LlmError::Malformed {
                provider: PROVIDER,
                message: "response contains no text content".to_string(),
            })?;
        parse_json_content(PROVIDER, content)
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = json!({
            "model": self.model,
            "texts": [text],
            "input_type": "search_query",
            "embedding_types": ["float"],
        });

        let resp = self
            .client
            .post(format!("{}/v2/embed", self.base_url))
            .bearer_auth(&self.api_key)
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

        let payload: EmbedResponse = resp.json().await?;
        payload
            .embeddings
            .float
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed {
                provider: PROVIDER,
                message: "embed response contains no float vectors".to_string(),
            })
    }
}

#[async_trait]
impl Generator for CohereProvider {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        response_schema: &JsonValue,
    ) -> Result<JsonValue, LlmError> {
        with_backoff("cohere generate", MAX_RETRIES, || {
            self.generate_once(system, user, response_schema)
        })
        .await
    }
}

#[async_trait]
impl Embedder for CohereProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        with_backoff("cohere embed", MAX_RETRIES, || self.embed_once(text)).await
    }
}
