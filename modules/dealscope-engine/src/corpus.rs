//! Source-document corpus and lexical excerpt retrieval for grounding.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Words too common to count toward lexical overlap.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "has", "was", "were", "are",
    "been", "will", "would", "could", "should", "their", "there", "which", "about", "into",
    "over", "under", "between", "after", "before", "during", "than", "then", "them", "they",
    "its", "also", "may", "can", "per", "our", "any", "all", "not",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub filename: String,
    pub text: String,
}

/// A candidate excerpt retrieved for a claim, with its overlap score.
#[derive(Debug, Clone)]
pub struct Excerpt {
    pub category: String,
    pub filename: String,
    pub text: String,
    pub overlap: usize,
}

/// Category-keyed document collections used for grounding lookups.
#[derive(Debug, Clone, Default)]
pub struct SourceCorpus {
    categories: BTreeMap<String, Vec<SourceDocument>>,
}

impl SourceCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, category: &str, doc: SourceDocument) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(doc);
    }

    pub fn is_empty(&self) -> bool {
        self.categories.values().all(|docs| docs.is_empty())
    }

    pub fn document_count(&self) -> usize {
        self.categories.values().map(|docs| docs.len()).sum()
    }

    /// Load a corpus from a directory tree: each subdirectory is a category,
    /// each `.txt`/`.md` file inside it a document.
    pub async fn load_dir(root: &Path) -> Result<Self> {
        let mut corpus = Self::new();
        let mut categories = tokio::fs::read_dir(root)
            .await
            .with_context(|| format!("failed to read corpus root {}", root.display()))?;

        while let Some(entry) = categories.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let category = entry.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                let is_text = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "txt" || e == "md");
                if !is_text {
                    continue;
                }
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                corpus.add_document(
                    &category,
                    SourceDocument {
                        filename: file.file_name().to_string_lossy().to_string(),
                        text,
                    },
                );
            }
        }
        Ok(corpus)
    }

    /// Retrieve the top `limit` excerpts sharing at least `min_overlap`
    /// significant words with the claim, across all categories.
    ///
    /// Excerpts are paragraphs; overlap is counted on stop-word-filtered
    /// lowercase words of length > 3.
    pub fn find_excerpts(&self, claim_text: &str, min_overlap: usize, limit: usize) -> Vec<Excerpt> {
        let claim_words = significant_words(claim_text);
        if claim_words.len() < min_overlap {
            return Vec::new();
        }

        let mut hits: Vec<Excerpt> = Vec::new();
        for (category, docs) in &self.categories {
            for doc in docs {
                for paragraph in doc.text.split("\n\n") {
                    let paragraph = paragraph.trim();
                    if paragraph.is_empty() {
                        continue;
                    }
                    let words = significant_words(paragraph);
                    let overlap = claim_words.intersection(&words).count();
                    if overlap >= min_overlap {
                        hits.push(Excerpt {
                            category: category.clone(),
                            filename: doc.filename.clone(),
                            text: paragraph.to_string(),
                            overlap,
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.overlap.cmp(&a.overlap));
        hits.truncate(limit);
        hits
    }
}

/// Lowercased words of length > 3 with stop words removed.
fn significant_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}
