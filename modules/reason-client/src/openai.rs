//! OpenAI-compatible embeddings client. Works against any provider exposing
//! the `/embeddings` shape (Voyage AI, OpenAI).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::traits::Embedder;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiCompatible {
    api_key: String,
    embedding_model: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiCompatible {
    pub fn new(api_key: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
            base_url: OPENAI_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn request_embeddings(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        debug!(model = %self.embedding_model, "embedding request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.embedding_model,
                "input": input,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding API error ({status}): {error_text}"));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiCompatible {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .request_embeddings(serde_json::Value::String(text.to_string()))
            .await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("no embedding in response"))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(serde_json::json!(texts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_is_openai() {
        let c = OpenAiCompatible::new("sk-test", "voyage-3-large");
        assert_eq!(c.base_url, OPENAI_API_URL);
    }

    #[test]
    fn base_url_override_for_voyage() {
        let c = OpenAiCompatible::new("sk-test", "voyage-3-large")
            .with_base_url("https://api.voyageai.com/v1");
        assert_eq!(c.base_url, "https://api.voyageai.com/v1");
    }

    #[test]
    fn embedding_response_parses() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.1,0.2]}]}"#).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding.len(), 2);
    }
}
