use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Failure modes of a reasoning call. Timeout is distinguished from generic
/// backend failure so callers can drive retry policy off it.
#[derive(Error, Debug)]
pub enum ReasonError {
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),

    #[error("reasoning backend error: {0}")]
    Backend(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ReasonError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReasonError::Timeout(_))
    }
}

// =============================================================================
// Reasoner Trait
// =============================================================================

/// A reasoning backend: one prompt in, one structured-text reply out,
/// bounded by a per-call timeout.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ReasonError>;
}

// =============================================================================
// Embedder Trait
// =============================================================================

/// Text embedding backend for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinguished() {
        let t = ReasonError::Timeout(Duration::from_secs(30));
        assert!(t.is_timeout());
        let b = ReasonError::Backend("500".to_string());
        assert!(!b.is_timeout());
    }
}
