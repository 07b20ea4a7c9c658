//! Google Generative Language (Gemini) provider.
//!
//! Gemini's `responseSchema` speaks an OpenAPI-flavoured schema dialect, so
//! like Mistral we inline the JSON schema into the system instruction and
//! rely on JSON output mode plus caller-side validation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::JsonValue;

use super::{parse_json_content, with_backoff, Embedder, Generator, LlmError};

const PROVIDER: &str = "google";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_RETRIES: u32 = 3;

pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

impl GoogleProvider {
    pub fn new(api_key: &str, model: &str, max_tokens: u32, base_url: Option<&str>) -> Self {
        GoogleProvider {
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
        let system_with_schema = format!(
            "{system}\n\nAnswer with a single JSON object that conforms to this JSON schema:\n{response_schema}"
        );
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system_with_schema }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0,
                "maxOutputTokens": self.max_tokens.max(1),
            },
        });

        let resp = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
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

        let payload: GenerateResponse = resp.json().await?;
        let content = payload
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.text.as_deref()))
            .ok_or_else(|| LlmError::Malformed {
                provider: PROVIDER,
                message: "response contains no text part".to_string(),
            })?;
        parse_json_content(PROVIDER, content)
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = json!({
            "content": { "parts": [{ "text": text }] },
        });

        let resp = self
            .client
            .post(format!(
                "{}/models/{}:embedContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
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
        if payload.embedding.values.is_empty() {
            return Err(LlmError::Malformed {
                provider: PROVIDER,
                message: "embedding response contains no values".to_string(),
            });
        }
        Ok(payload.embedding.values)
    }
}

#[async_trait]
impl Generator for GoogleProvider {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        response_schema: &JsonValue,
    ) -> Result<JsonValue, LlmError> {
        with_backoff("google generate", MAX_RETRIES, || {
            self.generate_once(system, user, response_schema)
        })
        .await
    }
}

#[async_trait]
impl Embedder for GoogleProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        with_backoff("google embed", MAX_RETRIES, || self.embed_once(text)).await
    }
}
