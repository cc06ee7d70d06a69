//! Similarity backend for near-duplicate clustering.
//!
//! The index is optional: when none is configured (or an operation errors)
//! the deduplicator falls back to lexical Jaccard similarity.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use reason_client::Embedder;

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub score: f64,
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn upsert(&self, id: Uuid, text: &str) -> Result<()>;
    /// Ranked nearest neighbors, best first. Includes the query item itself
    /// if it was upserted.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<Neighbor>>;
}

/// In-memory cosine index over an embedding backend.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<(Uuid, Vec<f32>)>>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SimilarityIndex for EmbeddingIndex {
    async fn upsert(&self, id: Uuid, text: &str) -> Result<()> {
        let embedding = self.embedder.embed(text).await?;
        let mut entries = self.entries.write().expect("similarity index lock poisoned");
        if let Some(entry) = entries.iter_mut().find(|(eid, _)| *eid == id) {
            entry.1 = embedding;
        } else {
            entries.push((id, embedding));
        }
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<Neighbor>> {
        let embedding = self.embedder.embed(text).await?;
        let entries = self.entries.read().expect("similarity index lock poisoned");
        let mut neighbors: Vec<Neighbor> = entries
            .iter()
            .map(|(id, e)| Neighbor {
                id: *id,
                score: cosine_similarity(&embedding, e),
            })
            .collect();
        neighbors.sort_by(|a, b| b.score.total_cmp(&a.score));
        neighbors.truncate(top_k);
        Ok(neighbors)
    }
}

/// Cosine similarity for f32 embedding vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}
