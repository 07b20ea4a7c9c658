//! OpenAI chat-completions + embeddings provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::JsonValue;

use super::{parse_json_content, with_backoff, Embedder, Generator, LlmError};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_RETRIES: u32 = 3;

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, max_tokens: u32, base_url: Option<&str>) -> Self {
        OpenAiProvider {
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
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "schema": response_schema,
                },
            },
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
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
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| LlmError::Malformed {
                provider: PROVIDER,
                message: "response contains no message content".to_string(),
            })?;
        parse_json_content(PROVIDER, content)
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = json!({
            "model": self.model,
            "input": [text],
        });

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
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

        let payload: EmbeddingResponse = resp.json().await?;
        payload
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| LlmError::Malformed {
                provider: PROVIDER,
                message: "embeddings response contains no data".to_string(),
            })
    }
}

#[async_trait]
impl Generator for OpenAiProvider {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        response_schema: &JsonValue,
    ) -> Result<JsonValue, LlmError> {
        with_backoff("openai generate", MAX_RETRIES, || {
            self.generate_once(system, user, response_schema)
        })
        .await
    }
}

#[async_trait]
impl Embedder for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        with_backoff("openai embed", MAX_RETRIES, || self.embed_once(text)).await
    }
}
