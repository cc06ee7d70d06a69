//! Deduplication & Clustering — merges near-duplicate findings via
//! similarity clustering, with a lexical Jaccard fallback when no similarity
//! backend is available.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use dealscope_common::{Cluster, ConsensusStrength, Finding, RedundancyStats};

use crate::similarity::SimilarityIndex;

/// Cluster size at which consensus is considered strong.
const HIGH_CONSENSUS_SIZE: usize = 3;

#[derive(Debug, Default)]
pub struct DedupResult {
    pub unique: Vec<Finding>,
    pub clusters: Vec<Cluster>,
    pub stats: RedundancyStats,
    pub degradations: Vec<String>,
}

pub struct Deduplicator {
    index: Option<Arc<dyn SimilarityIndex>>,
    similarity_threshold: f64,
    jaccard_threshold: f64,
}

impl Deduplicator {
    pub fn new(
        index: Option<Arc<dyn SimilarityIndex>>,
        similarity_threshold: f64,
        jaccard_threshold: f64,
    ) -> Self {
        Self {
            index,
            similarity_threshold,
            jaccard_threshold,
        }
    }

    /// Partition findings into clusters and keep one representative each.
    ///
    /// Representative = highest composite confidence
    /// (0.7×raw_confidence + 0.3×grounding_coverage). Singletons pass
    /// through unchanged. Re-running on the unique output is a fixed point.
    pub async fn dedup(&self, findings: Vec<Finding>) -> DedupResult {
        if findings.is_empty() {
            return DedupResult::default();
        }

        let texts: Vec<String> = findings.iter().map(insight_text).collect();
        let mut degradations = Vec::new();

        let groups = match &self.index {
            Some(index) => match self.cluster_by_index(index.as_ref(), &findings, &texts).await {
                Ok(groups) => groups,
                Err(e) => {
                    warn!(error = %e, "Similarity index failed, falling back to lexical clustering");
                    degradations.push(format!(
                        "similarity backend unavailable ({e}); lexical fallback used"
                    ));
                    self.cluster_by_jaccard(&texts)
                }
            },
            None => self.cluster_by_jaccard(&texts),
        };

        let total = findings.len() as u32;
        let mut clusters = Vec::with_capacity(groups.len());
        let mut unique = Vec::with_capacity(groups.len());
        let mut multi_member = 0u32;

        for group in groups {
            let representative_idx = group
                .iter()
                .copied()
                .max_by(|a, b| {
                    findings[*a]
                        .composite_confidence()
                        .total_cmp(&findings[*b].composite_confidence())
                })
                .expect("cluster groups are never empty");

            let consensus = if group.len() >= HIGH_CONSENSUS_SIZE {
                ConsensusStrength::High
            } else {
                ConsensusStrength::Medium
            };

            if group.len() > 1 {
                multi_member += 1;
            }

            clusters.push(Cluster {
                id: Uuid::new_v4(),
                member_ids: group.iter().map(|i| findings[*i].id).collect(),
                representative_id: findings[representative_idx].id,
                consensus,
            });
            unique.push(findings[representative_idx].clone());
        }

        let stats = RedundancyStats {
            total_findings: total,
            redundant: total - unique.len() as u32,
            clusters: multi_member,
        };

        info!(
            total = stats.total_findings,
            unique = unique.len(),
            redundant = stats.redundant,
            clusters = stats.clusters,
            "Deduplication complete"
        );

        DedupResult {
            unique,
            clusters,
            stats,
            degradations,
        }
    }

    /// Embedding-backed clustering: insert all texts, then greedily absorb
    /// unassigned neighbors above the similarity threshold.
    async fn cluster_by_index(
        &self,
        index: &dyn SimilarityIndex,
        findings: &[Finding],
        texts: &[String],
    ) -> anyhow::Result<Vec<Vec<usize>>> {
        for (finding, text) in findings.iter().zip(texts) {
            index.upsert(finding.id, text).await?;
        }

        let mut assigned = vec![false; findings.len()];
        let mut groups = Vec::new();

        for i in 0..findings.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let mut group = vec![i];

            let neighbors = index.query(&texts[i], findings.len()).await?;
            for neighbor in neighbors {
                if neighbor.score < self.similarity_threshold {
                    continue;
                }
                if let Some(j) = findings.iter().position(|f| f.id == neighbor.id) {
                    if !assigned[j] {
                        assigned[j] = true;
                        group.push(j);
                    }
                }
            }
            groups.push(group);
        }

        Ok(groups)
    }

    /// Lexical fallback: pairwise Jaccard word-set similarity with the same
    /// greedy absorption.
    fn cluster_by_jaccard(&self, texts: &[String]) -> Vec<Vec<usize>> {
        let word_sets: Vec<HashSet<String>> = texts.iter().map(|t| word_set(t)).collect();
        let mut assigned = vec![false; texts.len()];
        let mut groups = Vec::new();

        for i in 0..texts.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let mut group = vec![i];

            for j in (i + 1)..texts.len() {
                if !assigned[j] && jaccard(&word_sets[i], &word_sets[j]) >= self.jaccard_threshold {
                    assigned[j] = true;
                    group.push(j);
                }
            }
            groups.push(group);
        }

        groups
    }
}

/// The text used to compare findings for near-duplication.
pub(crate) fn insight_text(finding: &Finding) -> String {
    for key in ["summary", "headline", "insight"] {
        if let Some(s) = finding.payload.get(key).and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return s.trim().to_string();
            }
        }
    }
    first_string_leaf(&finding.payload).unwrap_or_else(|| finding.analyzer_id.clone())
}

fn first_string_leaf(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_string_leaf),
        Value::Object(map) => map.values().find_map(first_string_leaf),
        _ => None,
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use dealscope_common::SourceLocation;
    use serde_json::json;

    use crate::similarity::Neighbor;

    fn finding(analyzer: &str, summary: &str, raw: f64) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            analyzer_id: analyzer.to_string(),
            payload: json!({ "summary": summary }),
            raw_confidence: raw,
            source_location: SourceLocation::PrimarySlot,
            extracted_at: Utc::now(),
            placeholder: false,
            grounding_coverage: 1.0,
            hallucination_warnings: vec![],
        }
    }

    fn lexical_dedup() -> Deduplicator {
        Deduplicator::new(None, 0.85, 0.6)
    }

    #[tokio::test]
    async fn ten_duplicates_collapse_into_one_high_cluster() {
        let findings: Vec<Finding> = (0..10)
            .map(|i| {
                finding(
                    "market_analysis",
                    "customer concentration risk in top accounts",
                    0.5 + (i as f64) * 0.01,
                )
            })
            .collect();
        let result = lexical_dedup().dedup(findings).await;

        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].member_ids.len(), 10);
        assert_eq!(result.clusters[0].consensus, ConsensusStrength::High);
        assert_eq!(result.stats.redundant, 9);
        assert_eq!(result.stats.clusters, 1);
    }

    #[tokio::test]
    async fn distinct_findings_pass_through_as_singletons() {
        let findings = vec![
            finding("financial_analysis", "revenue grew twelve percent", 0.8),
            finding("legal_analysis", "pending litigation in delaware chancery", 0.7),
        ];
        let result = lexical_dedup().dedup(findings).await;

        assert_eq!(result.unique.len(), 2);
        assert_eq!(result.stats.redundant, 0);
        assert_eq!(result.stats.clusters, 0);
        assert!(result
            .clusters
            .iter()
            .all(|c| c.consensus == ConsensusStrength::Medium));
    }

    #[tokio::test]
    async fn representative_has_highest_composite_confidence() {
        let mut low = finding("a", "customer concentration risk remains elevated", 0.4);
        low.grounding_coverage = 0.2;
        let high = finding("b", "customer concentration risk remains elevated", 0.9);
        let high_id = high.id;

        let result = lexical_dedup().dedup(vec![low, high]).await;
        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.unique[0].id, high_id);
        assert_eq!(result.clusters[0].representative_id, high_id);
    }

    #[tokio::test]
    async fn dedup_is_idempotent_on_unique_output() {
        let findings: Vec<Finding> = (0..6)
            .map(|i| finding("a", &format!("duplicate customer concentration note {}", i % 2), 0.8))
            .collect();
        let first = lexical_dedup().dedup(findings).await;
        let unique_count = first.unique.len();

        let second = lexical_dedup().dedup(first.unique).await;
        assert_eq!(second.unique.len(), unique_count);
        assert_eq!(second.stats.redundant, 0);
    }

    #[tokio::test]
    async fn clusters_partition_the_input() {
        let findings: Vec<Finding> = vec![
            finding("a", "customer concentration risk elevated", 0.8),
            finding("b", "customer concentration risk elevated", 0.7),
            finding("c", "tax exposure in ireland structure", 0.9),
        ];
        let ids: HashSet<Uuid> = findings.iter().map(|f| f.id).collect();
        let result = lexical_dedup().dedup(findings).await;

        let mut seen = HashSet::new();
        for cluster in &result.clusters {
            for id in &cluster.member_ids {
                assert!(seen.insert(*id), "finding appears in two clusters");
            }
        }
        assert_eq!(seen, ids);
    }

    struct FailingIndex;

    #[async_trait]
    impl SimilarityIndex for FailingIndex {
        async fn upsert(&self, _id: Uuid, _text: &str) -> anyhow::Result<()> {
            Err(anyhow!("connection refused"))
        }

        async fn query(&self, _text: &str, _top_k: usize) -> anyhow::Result<Vec<Neighbor>> {
            Err(anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn index_failure_falls_back_to_lexical() {
        let findings: Vec<Finding> = (0..3)
            .map(|_| finding("a", "customer concentration risk elevated", 0.8))
            .collect();
        let dedup = Deduplicator::new(Some(Arc::new(FailingIndex)), 0.85, 0.6);
        let result = dedup.dedup(findings).await;

        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.degradations.len(), 1);
        assert!(result.degradations[0].contains("lexical fallback"));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_result() {
        let result = lexical_dedup().dedup(vec![]).await;
        assert!(result.unique.is_empty());
        assert_eq!(result.stats.total_findings, 0);
    }

    #[test]
    fn jaccard_basics() {
        let a = word_set("customer concentration risk");
        let b = word_set("customer concentration risk");
        assert!((jaccard(&a, &b) - 1.0).abs() < 1e-9);

        let c = word_set("entirely different topic");
        assert_eq!(jaccard(&a, &c), 0.0);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn insight_text_prefers_summary() {
        let f = finding("a", "the summary line", 0.5);
        assert_eq!(insight_text(&f), "the summary line");

        let mut f2 = finding("a", "", 0.5);
        f2.payload = json!({ "nested": { "deep": "a buried insight" } });
        assert_eq!(insight_text(&f2), "a buried insight");

        let mut f3 = finding("fallback_analyzer", "", 0.5);
        f3.payload = json!({});
        assert_eq!(insight_text(&f3), "fallback_analyzer");
    }
}
