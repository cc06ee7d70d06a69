//! Pipeline orchestrator — runs the consolidation stages sequentially.
//!
//! INIT → COLLECTING → GROUNDING → DEDUPLICATING → RESOLVING → SCORING →
//! ASSEMBLING → DONE. FAILED is reachable from any stage, but only on an
//! unrecoverable internal error; every per-item failure degrades data
//! quality instead of aborting. Concurrency is confined to the Grounding
//! Verifier's internal fan-out.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use dealscope_common::{ConsolidatedOutput, ConsolidationConfig, DealscopeError};
use reason_client::Reasoner;

use crate::assembler::{AssembleContext, Assembler};
use crate::cache::VerificationCache;
use crate::claims::extract_claims;
use crate::collector::{Collector, JobState};
use crate::confidence::{aggregate, ConfidenceInputs};
use crate::conflicts::ConflictResolver;
use crate::corpus::SourceCorpus;
use crate::dedup::Deduplicator;
use crate::grounding::Verifier;
use crate::similarity::SimilarityIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Collecting,
    Grounding,
    Deduplicating,
    Resolving,
    Scoring,
    Assembling,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Init => write!(f, "INIT"),
            Stage::Collecting => write!(f, "COLLECTING"),
            Stage::Grounding => write!(f, "GROUNDING"),
            Stage::Deduplicating => write!(f, "DEDUPLICATING"),
            Stage::Resolving => write!(f, "RESOLVING"),
            Stage::Scoring => write!(f, "SCORING"),
            Stage::Assembling => write!(f, "ASSEMBLING"),
            Stage::Done => write!(f, "DONE"),
            Stage::Failed => write!(f, "FAILED"),
        }
    }
}

/// Metrics from one consolidation run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processing_ms: u128,
    pub findings_collected: u32,
    pub placeholders: u32,
    pub claims_extracted: u32,
    pub external_calls: u32,
    pub cache_hits: u32,
    pub degraded_verdicts: u32,
    pub hallucinations_flagged: u32,
    pub redundant_findings: u32,
    pub findings_synthesized: u32,
    pub conflicts_resolved: u32,
    pub overall_confidence: f64,
    pub confidence_high: u32,
    pub confidence_medium: u32,
    pub confidence_low: u32,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Consolidation Run Complete ===")?;
        writeln!(f, "Processing time:      {} ms", self.processing_ms)?;
        writeln!(
            f,
            "Findings collected:   {} ({} placeholders)",
            self.findings_collected, self.placeholders
        )?;
        writeln!(f, "Claims extracted:     {}", self.claims_extracted)?;
        writeln!(
            f,
            "External calls:       {} ({} cache hits, {} degraded)",
            self.external_calls, self.cache_hits, self.degraded_verdicts
        )?;
        writeln!(f, "Hallucinations:       {}", self.hallucinations_flagged)?;
        writeln!(
            f,
            "Findings synthesized: {} ({} redundant absorbed)",
            self.findings_synthesized, self.redundant_findings
        )?;
        writeln!(f, "Conflicts resolved:   {}", self.conflicts_resolved)?;
        writeln!(f, "Overall confidence:   {:.2}", self.overall_confidence)?;
        writeln!(f, "\nConfidence distribution:")?;
        writeln!(f, "  high (>=0.8):   {}", self.confidence_high)?;
        writeln!(f, "  medium (>=0.5): {}", self.confidence_medium)?;
        writeln!(f, "  low (<0.5):     {}", self.confidence_low)?;
        Ok(())
    }
}

/// One-shot batch consolidator for a single transaction.
///
/// All collaborators are injected at composition time: the reasoning
/// backend, the optional similarity index (its absence silently selects the
/// lexical clustering fallback), and the verification cache service.
pub struct Consolidator {
    reasoner: Arc<dyn Reasoner>,
    similarity: Option<Arc<dyn SimilarityIndex>>,
    cache: Arc<VerificationCache>,
    config: ConsolidationConfig,
}

impl Consolidator {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        similarity: Option<Arc<dyn SimilarityIndex>>,
        cache: Arc<VerificationCache>,
        config: ConsolidationConfig,
    ) -> Result<Self, DealscopeError> {
        config.validate()?;
        Ok(Self {
            reasoner,
            similarity,
            cache,
            config,
        })
    }

    pub async fn run(
        &self,
        job: &JobState,
        corpus: &SourceCorpus,
    ) -> Result<(ConsolidatedOutput, RunSummary), DealscopeError> {
        match self.run_inner(job, corpus).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(stage = %Stage::Failed, error = %e, "Consolidation run failed");
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        job: &JobState,
        corpus: &SourceCorpus,
    ) -> Result<(ConsolidatedOutput, RunSummary), DealscopeError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let mut summary = RunSummary::default();

        info!(
            run_id = %run_id,
            deal_id = job.deal_id.as_str(),
            target = job.target.as_str(),
            stage = %Stage::Init,
            "Starting consolidation"
        );

        // --- COLLECTING ---
        info!(stage = %Stage::Collecting, "Collecting analyzer findings");
        let (findings, mut degradations) = Collector::new().collect(job, &self.config);
        summary.findings_collected = findings.len() as u32;
        summary.placeholders = findings.iter().filter(|f| f.placeholder).count() as u32;

        let claims: Vec<_> = findings
            .iter()
            .flat_map(|f| extract_claims(f, &self.config))
            .collect();
        summary.claims_extracted = claims.len() as u32;

        // --- GROUNDING ---
        info!(stage = %Stage::Grounding, claims = claims.len(), "Verifying claims");
        let verifier = Verifier::new(
            Arc::clone(&self.reasoner),
            Arc::clone(&self.cache),
            self.config.clone(),
        );
        let grounding = verifier.verify(findings, claims, corpus).await;
        summary.external_calls = grounding.external_calls;
        summary.cache_hits = grounding.cache_hits;
        summary.degraded_verdicts = grounding.degraded_verdicts;
        summary.hallucinations_flagged = grounding.flags.len() as u32;
        degradations.extend(grounding.degradations);

        // --- DEDUPLICATING ---
        info!(stage = %Stage::Deduplicating, "Clustering near-duplicates");
        let dedup = Deduplicator::new(
            self.similarity.clone(),
            self.config.similarity_threshold,
            self.config.jaccard_threshold,
        );
        let dedup_result = dedup.dedup(grounding.findings).await;
        summary.redundant_findings = dedup_result.stats.redundant;
        summary.findings_synthesized = dedup_result.unique.len() as u32;
        degradations.extend(dedup_result.degradations);

        // --- RESOLVING ---
        info!(stage = %Stage::Resolving, "Resolving conflicts");
        let resolver = ConflictResolver::new(Arc::clone(&self.reasoner), self.config.clone());
        let conflicts = resolver.resolve(&dedup_result.unique).await;
        summary.conflicts_resolved = conflicts.numeric_resolved + conflicts.qualitative_resolved;
        degradations.extend(conflicts.degradations);

        // --- SCORING ---
        info!(stage = %Stage::Scoring, "Aggregating confidence");
        let (breakdown, overall) = aggregate(
            &ConfidenceInputs {
                findings: &dedup_result.unique,
                stats: dedup_result.stats,
                numeric_resolved: conflicts.numeric_resolved,
                qualitative_resolved: conflicts.qualitative_resolved,
                expected_analyzers: self.config.expected_analyzers.len(),
                reporting_analyzers: summary.findings_collected
                    .saturating_sub(summary.placeholders) as usize,
            },
            self.config.confidence_weights,
        );
        summary.overall_confidence = overall;
        for finding in &dedup_result.unique {
            let c = finding.composite_confidence();
            if c >= 0.8 {
                summary.confidence_high += 1;
            } else if c >= 0.5 {
                summary.confidence_medium += 1;
            } else {
                summary.confidence_low += 1;
            }
        }

        // --- ASSEMBLING ---
        info!(stage = %Stage::Assembling, "Assembling consolidated output");
        let assembler = Assembler::new(&self.config);
        let output = assembler.assemble(AssembleContext {
            run_id,
            deal_id: &job.deal_id,
            target: &job.target,
            started_at,
            findings: &dedup_result.unique,
            conflicts: conflicts.conflicts,
            flags: grounding.flags,
            breakdown,
            claims: grounding.claims,
            degradations,
            overall_confidence: overall,
        });

        if self.config.persist_snapshot {
            // Snapshot write errors never fail the run.
            if let Err(e) = assembler.persist_snapshot(&output).await {
                tracing::warn!(error = %e, "Snapshot persistence failed, continuing");
            }
        }

        summary.processing_ms = started.elapsed().as_millis();
        info!(stage = %Stage::Done, "{summary}");

        Ok((output, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealscope_common::ConfidenceWeights;

    struct NeverReasoner;

    #[async_trait::async_trait]
    impl Reasoner for NeverReasoner {
        async fn call(
            &self,
            _prompt: &str,
            timeout: std::time::Duration,
        ) -> Result<String, reason_client::ReasonError> {
            Err(reason_client::ReasonError::Timeout(timeout))
        }
    }

    #[test]
    fn constructor_rejects_invalid_weights() {
        let config = ConsolidationConfig::builder()
            .expected_analyzers(vec!["a".to_string()])
            .confidence_weights(ConfidenceWeights {
                grounding: 0.9,
                deduplication: 0.9,
                conflict_resolution: 0.0,
                analyzer_coverage: 0.0,
            })
            .build();
        let result = Consolidator::new(
            Arc::new(NeverReasoner),
            None,
            Arc::new(VerificationCache::new()),
            config,
        );
        assert!(matches!(result, Err(DealscopeError::Config(_))));
    }

    #[test]
    fn stage_display_matches_state_machine_names() {
        assert_eq!(Stage::Init.to_string(), "INIT");
        assert_eq!(Stage::Grounding.to_string(), "GROUNDING");
        assert_eq!(Stage::Assembling.to_string(), "ASSEMBLING");
        assert_eq!(Stage::Failed.to_string(), "FAILED");
    }

    #[test]
    fn run_summary_display_includes_key_metrics() {
        let summary = RunSummary {
            processing_ms: 1234,
            findings_collected: 5,
            overall_confidence: 0.75,
            ..RunSummary::default()
        };
        let rendered = summary.to_string();
        assert!(rendered.contains("Consolidation Run Complete"));
        assert!(rendered.contains("1234 ms"));
        assert!(rendered.contains("0.75"));
    }
}
