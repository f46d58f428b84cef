//! Thin client for OpenAI-compatible chat-completion endpoints.
//!
//! The pipeline talks to this through its own capability trait; nothing
//! outside this crate names a vendor. Structured output uses a strict JSON
//! schema derived from the target type — any response that does not
//! deserialize is an error the caller treats as `llm_unavailable`.

mod schema;
mod wire;

pub use schema::StructuredOutput;

use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct ChatClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        })
    }

    /// Point at a compatible non-default endpoint (proxy, local model).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Type-safe structured extraction: the response must match `T`'s
    /// schema exactly (`strict: true`, no additional properties).
    pub async fn extract<T: StructuredOutput>(&self, system: &str, user: &str) -> Result<T> {
        let request = wire::ChatRequest {
            model: self.model.clone(),
            messages: vec![wire::Message::system(system), wire::Message::user(user)],
            temperature: Some(0.0),
            max_tokens: Some(1024),
            response_format: Some(wire::ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: wire::JsonSchemaFormat {
                    name: T::type_name(),
                    strict: true,
                    schema: T::strict_schema(),
                },
            }),
        };

        let content = self.send(&request).await?;
        serde_json::from_str(&content)
            .map_err(|e| anyhow!("Structured response did not match schema: {e}"))
    }

    /// Plain chat completion.
    pub async fn chat_completion(&self, system: &str, user: &str) -> Result<String> {
        let request = wire::ChatRequest {
            model: self.model.clone(),
            messages: vec![wire::Message::system(system), wire::Message::user(user)],
            temperature: Some(0.0),
            max_tokens: Some(1024),
            response_format: None,
        };
        self.send(&request).await
    }

    /// Embeddings for a batch of texts, in input order.
    pub async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = wire::EmbeddingRequest {
            model: model.to_string(),
            input: texts.to_vec(),
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Embedding API error ({status}): {body}"));
        }

        let parsed: wire::EmbeddingResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn send(&self, request: &wire::ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %request.model, "Chat completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chat API error ({status}): {body}"));
        }

        let parsed: wire::ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Empty chat completion"))
    }
}
