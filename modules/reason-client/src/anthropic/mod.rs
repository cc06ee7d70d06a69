mod client;
pub(crate) mod types;

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::{ReasonError, Reasoner};
use client::AnthropicClient;
use types::{ChatRequest, WireMessage};

/// Reasoning backend over the Anthropic messages API.
///
/// Verification and arbitration prompts run at temperature 0 — the caller
/// wants a deterministic verdict, not prose.
#[derive(Clone)]
pub struct Anthropic {
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl Anthropic {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> AnthropicClient {
        let client = AnthropicClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    async fn chat_once(&self, prompt: &str) -> Result<String, ReasonError> {
        let request = ChatRequest::new(&self.model)
            .message(WireMessage::user(prompt))
            .temperature(0.0);

        let response = self.client().chat(&request).await?;
        response
            .text()
            .ok_or_else(|| ReasonError::Backend("empty response body".to_string()))
    }
}

#[async_trait]
impl Reasoner for Anthropic {
    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ReasonError> {
        match tokio::time::timeout(timeout, self.chat_once(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ReasonError::Timeout(timeout)),
        }
    }
}
