//! Grounding Verifier — fact-checks prioritized claims against the source
//! corpus through the reasoning backend, under a bounded call budget.
//!
//! Claims are grouped into batches; batches fan out concurrently while a
//! semaphore caps simultaneous external calls. Each call has an independent
//! timeout and bounded retry with exponential backoff, after which the task
//! degrades to a conservative verdict rather than aborting its siblings or
//! the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use dealscope_common::{
    Claim, ConsolidationConfig, Finding, HallucinationFlag, Severity, Verdict,
};
use reason_client::{util::strip_code_blocks, Reasoner};

use crate::cache::{CachedVerdict, VerificationCache};
use crate::corpus::{Excerpt, SourceCorpus};

/// A claim needs at least this many shared significant words with an excerpt.
const MIN_EXCERPT_OVERLAP: usize = 2;
const MAX_EXCERPTS_PER_CLAIM: usize = 5;
const NO_SOURCE_REASON: &str = "No relevant source data found";
const UNDETERMINED_REASON: &str = "Unable to determine";
const DEFAULT_ACTION: &str = "flag_for_review";
/// Jitter added on top of exponential backoff, in milliseconds.
const BACKOFF_JITTER_MS: u64 = 250;

/// Structured four-field verdict requested from the reasoning backend.
#[derive(Debug, Deserialize, JsonSchema)]
struct VerificationVerdict {
    is_grounded: bool,
    reasoning: String,
    severity: String,
    #[serde(default)]
    suggested_action: Option<String>,
}

#[derive(Debug, Default)]
pub struct GroundingOutcome {
    pub findings: Vec<Finding>,
    pub claims: Vec<Claim>,
    pub flags: Vec<HallucinationFlag>,
    pub external_calls: u32,
    pub cache_hits: u32,
    pub degraded_verdicts: u32,
    pub degradations: Vec<String>,
}

pub struct Verifier {
    reasoner: Arc<dyn Reasoner>,
    cache: Arc<VerificationCache>,
    config: ConsolidationConfig,
}

/// Internal per-claim result before merging back into findings.
struct ClaimResult {
    claim: Claim,
    external_calls: u32,
    cache_hit: bool,
    degraded: Option<String>,
}

impl Verifier {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        cache: Arc<VerificationCache>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            reasoner,
            cache,
            config,
        }
    }

    /// Verify all claims and annotate their findings.
    ///
    /// Findings pass through unchanged except for grounding coverage and the
    /// additive hallucination warnings; claims come back with their verdict
    /// fields set, merged by input order.
    pub async fn verify(
        &self,
        mut findings: Vec<Finding>,
        claims: Vec<Claim>,
        corpus: &SourceCorpus,
    ) -> GroundingOutcome {
        if claims.is_empty() {
            return GroundingOutcome {
                findings,
                ..GroundingOutcome::default()
            };
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_verifications));
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<Claim>> = claims
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        info!(
            claims = claims.len(),
            batches = batches.len(),
            max_in_flight = self.config.max_concurrent_verifications,
            "Starting grounding verification"
        );

        let mut batch_results: Vec<(usize, Vec<ClaimResult>)> =
            stream::iter(batches.into_iter().enumerate().map(|(idx, batch)| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let mut results = Vec::with_capacity(batch.len());
                    for claim in batch {
                        results.push(self.verify_claim(claim, corpus, &semaphore).await);
                    }
                    (idx, results)
                }
            }))
            .buffer_unordered(self.config.max_concurrent_verifications)
            .collect()
            .await;

        // Independent verifications carry no ordering guarantee; restore
        // input order after the join.
        batch_results.sort_by_key(|(idx, _)| *idx);

        let mut outcome = GroundingOutcome::default();
        let mut verified: Vec<Claim> = Vec::new();
        for (_, results) in batch_results {
            for r in results {
                outcome.external_calls += r.external_calls;
                if r.cache_hit {
                    outcome.cache_hits += 1;
                }
                if let Some(cause) = r.degraded {
                    outcome.degraded_verdicts += 1;
                    outcome.degradations.push(cause);
                }
                verified.push(r.claim);
            }
        }

        annotate_findings(&mut findings, &verified, &mut outcome.flags);

        info!(
            external_calls = outcome.external_calls,
            cache_hits = outcome.cache_hits,
            degraded = outcome.degraded_verdicts,
            hallucinations = outcome.flags.len(),
            "Grounding verification complete"
        );

        outcome.findings = findings;
        outcome.claims = verified;
        outcome
    }

    async fn verify_claim(
        &self,
        mut claim: Claim,
        corpus: &SourceCorpus,
        semaphore: &Semaphore,
    ) -> ClaimResult {
        if self.config.enable_caching {
            if let Some(hit) = self.cache.get(&claim.content) {
                apply_verdict(&mut claim, hit.is_grounded, hit.severity, &hit.reason, &hit.action);
                return ClaimResult {
                    claim,
                    external_calls: 0,
                    cache_hit: true,
                    degraded: None,
                };
            }
        }

        let excerpts = corpus.find_excerpts(&claim.content, MIN_EXCERPT_OVERLAP, MAX_EXCERPTS_PER_CLAIM);
        if excerpts.is_empty() {
            // Nothing to check against — conservative verdict, no external call.
            apply_verdict(&mut claim, false, Severity::Medium, NO_SOURCE_REASON, DEFAULT_ACTION);
            self.cache_claim(&claim);
            return ClaimResult {
                claim,
                external_calls: 0,
                cache_hit: false,
                degraded: None,
            };
        }

        let prompt = build_verification_prompt(&claim.content, &excerpts);
        let timeout = Duration::from_secs(self.config.verification_timeout_seconds);
        let mut calls = 0u32;
        let mut last_error = String::new();

        for attempt in 0..self.config.max_retries.max(1) {
            let response = {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("verification semaphore closed");
                calls += 1;
                self.reasoner.call(&prompt, timeout).await
            };

            match response {
                Ok(text) => {
                    match parse_verdict(&text) {
                        Some(v) => {
                            let severity = Severity::from_str_loose(&v.severity);
                            let action =
                                v.suggested_action.unwrap_or_else(|| DEFAULT_ACTION.to_string());
                            apply_verdict(&mut claim, v.is_grounded, severity, &v.reasoning, &action);
                            self.cache_claim(&claim);
                            return ClaimResult {
                                claim,
                                external_calls: calls,
                                cache_hit: false,
                                degraded: None,
                            };
                        }
                        None => {
                            // Malformed reply — conservative default, no retry.
                            warn!(claim = claim.content.as_str(), "Unparseable verification reply");
                            apply_verdict(
                                &mut claim,
                                false,
                                Severity::Medium,
                                UNDETERMINED_REASON,
                                DEFAULT_ACTION,
                            );
                            self.cache_claim(&claim);
                            let degraded = Some(format!(
                                "malformed verification reply for claim '{}'",
                                truncate(&claim.content, 80)
                            ));
                            return ClaimResult {
                                claim,
                                external_calls: calls,
                                cache_hit: false,
                                degraded,
                            };
                        }
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < self.config.max_retries.max(1) {
                        let backoff = Duration::from_secs_f64(
                            self.config.retry_base_delay_seconds
                                * f64::from(1u32 << attempt.min(16)),
                        );
                        let jitter =
                            Duration::from_millis(rand::rng().random_range(0..BACKOFF_JITTER_MS));
                        warn!(
                            claim = claim.content.as_str(),
                            attempt = attempt + 1,
                            backoff_secs = backoff.as_secs_f64(),
                            timed_out = e.is_timeout(),
                            "Verification call failed, retrying after backoff"
                        );
                        tokio::time::sleep(backoff + jitter).await;
                    }
                }
            }
        }

        // Retries exhausted — degrade instead of failing the run.
        warn!(
            claim = claim.content.as_str(),
            error = last_error.as_str(),
            "Verification degraded after retries"
        );
        apply_verdict(
            &mut claim,
            false,
            Severity::Medium,
            UNDETERMINED_REASON,
            DEFAULT_ACTION,
        );
        let degraded = Some(format!(
            "verification failed after retries for claim '{}': {last_error}",
            truncate(&claim.content, 80)
        ));
        ClaimResult {
            claim,
            external_calls: calls,
            cache_hit: false,
            degraded,
        }
    }

    fn cache_claim(&self, claim: &Claim) {
        if !self.config.enable_caching {
            return;
        }
        self.cache.put(
            &claim.content,
            CachedVerdict {
                is_grounded: claim.verdict == Verdict::Grounded,
                severity: claim.severity,
                reason: claim.reason.clone().unwrap_or_default(),
                action: claim.action.clone().unwrap_or_default(),
            },
        );
    }
}

fn apply_verdict(claim: &mut Claim, grounded: bool, severity: Severity, reason: &str, action: &str) {
    claim.verdict = if grounded {
        Verdict::Grounded
    } else {
        Verdict::Ungrounded
    };
    claim.severity = severity;
    claim.reason = Some(reason.to_string());
    claim.action = Some(action.to_string());
}

/// Recompute grounding coverage per finding and attach hallucination
/// warnings for high-severity ungrounded claims.
fn annotate_findings(findings: &mut [Finding], claims: &[Claim], flags: &mut Vec<HallucinationFlag>) {
    let mut per_finding: HashMap<Uuid, (u32, u32)> = HashMap::new();
    for claim in claims {
        let entry = per_finding.entry(claim.finding_id).or_insert((0, 0));
        entry.1 += 1;
        if claim.verdict == Verdict::Grounded {
            entry.0 += 1;
        }
    }

    for finding in findings.iter_mut() {
        if let Some((grounded, total)) = per_finding.get(&finding.id) {
            if *total > 0 {
                finding.grounding_coverage = f64::from(*grounded) / f64::from(*total);
            }
        }
    }

    for claim in claims {
        if claim.verdict == Verdict::Ungrounded
            && matches!(claim.severity, Severity::High | Severity::Critical)
        {
            let reason = claim.reason.clone().unwrap_or_default();
            let action = claim.action.clone().unwrap_or_else(|| DEFAULT_ACTION.to_string());
            if let Some(finding) = findings.iter_mut().find(|f| f.id == claim.finding_id) {
                finding.hallucination_warnings.push(format!(
                    "ungrounded {} claim: {}",
                    claim.severity,
                    truncate(&claim.content, 120)
                ));
            }
            flags.push(HallucinationFlag {
                analyzer_id: claim.analyzer_id.clone(),
                claim: claim.content.clone(),
                severity: claim.severity,
                reason,
                action,
            });
        }
    }
}

fn build_verification_prompt(claim: &str, excerpts: &[Excerpt]) -> String {
    let sources: String = excerpts
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "--- Source {} ({}/{}) ---\n{}",
                i + 1,
                e.category,
                e.filename,
                e.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a fact checker for an M&A due-diligence system. Judge the claim ONLY \
         against the source excerpts below.\n\n\
         Claim:\n{claim}\n\n\
         Source excerpts:\n{sources}\n\n\
         Return JSON with exactly these fields:\n\
         {{\"is_grounded\": true|false, \"reasoning\": \"...\", \
         \"severity\": \"low\"|\"medium\"|\"high\"|\"critical\", \
         \"suggested_action\": \"...\"}}\n\
         severity reflects how damaging it would be if the claim is wrong. \
         Return only the JSON object."
    )
}

fn parse_verdict(response: &str) -> Option<VerificationVerdict> {
    serde_json::from_str(strip_code_blocks(response)).ok()
}

fn truncate(s: &str, max: usize) -> &str {
    reason_client::util::truncate_to_char_boundary(s, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use dealscope_common::SourceLocation;
    use reason_client::ReasonError;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::corpus::SourceDocument;

    struct ScriptedReasoner {
        reply: Option<String>,
        calls: AtomicU32,
    }

    impl ScriptedReasoner {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn timing_out() -> Self {
            Self {
                reply: None,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn call(&self, _prompt: &str, timeout: Duration) -> Result<String, ReasonError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(r) => Ok(r.clone()),
                None => Err(ReasonError::Timeout(timeout)),
            }
        }
    }

    fn test_finding() -> Finding {
        Finding {
            id: Uuid::new_v4(),
            analyzer_id: "financial_analysis".to_string(),
            payload: serde_json::json!({}),
            raw_confidence: 0.8,
            source_location: SourceLocation::PrimarySlot,
            extracted_at: Utc::now(),
            placeholder: false,
            grounding_coverage: 1.0,
            hallucination_warnings: vec![],
        }
    }

    fn claim_for(finding: &Finding, content: &str) -> Claim {
        Claim {
            id: Uuid::new_v4(),
            analyzer_id: finding.analyzer_id.clone(),
            finding_id: finding.id,
            content: content.to_string(),
            priority_score: 80,
            verdict: Verdict::Pending,
            severity: Severity::Medium,
            reason: None,
            action: None,
        }
    }

    fn fast_config() -> ConsolidationConfig {
        ConsolidationConfig::builder()
            .expected_analyzers(vec!["financial_analysis".to_string()])
            .retry_base_delay_seconds(0.01)
            .build()
    }

    fn corpus_matching_revenue() -> SourceCorpus {
        let mut corpus = SourceCorpus::new();
        corpus.add_document(
            "financial",
            SourceDocument {
                filename: "10k.txt".to_string(),
                text: "Consolidated revenue reached $120 million in fiscal 2025.".to_string(),
            },
        );
        corpus
    }

    #[tokio::test]
    async fn no_matching_source_means_no_external_call() {
        let reasoner = Arc::new(ScriptedReasoner::replying("{}"));
        let verifier = Verifier::new(
            reasoner.clone(),
            Arc::new(VerificationCache::new()),
            fast_config(),
        );
        let finding = test_finding();
        let claim = claim_for(&finding, "DCF valuation of $450 million");
        let outcome = verifier
            .verify(vec![finding], vec![claim], &SourceCorpus::new())
            .await;

        assert_eq!(outcome.external_calls, 0);
        assert_eq!(reasoner.call_count(), 0);
        let verified = &outcome.claims[0];
        assert_eq!(verified.verdict, Verdict::Ungrounded);
        assert_eq!(verified.severity, Severity::Medium);
        assert_eq!(verified.reason.as_deref(), Some(NO_SOURCE_REASON));
    }

    #[tokio::test]
    async fn grounded_verdict_applied_from_backend_reply() {
        let reasoner = Arc::new(ScriptedReasoner::replying(
            r#"{"is_grounded": true, "reasoning": "matches the filing", "severity": "low", "suggested_action": "none"}"#,
        ));
        let verifier = Verifier::new(
            reasoner.clone(),
            Arc::new(VerificationCache::new()),
            fast_config(),
        );
        let finding = test_finding();
        let claim = claim_for(&finding, "revenue reached $120 million in fiscal 2025");
        let outcome = verifier
            .verify(vec![finding], vec![claim], &corpus_matching_revenue())
            .await;

        assert_eq!(outcome.external_calls, 1);
        assert_eq!(outcome.claims[0].verdict, Verdict::Grounded);
        assert!((outcome.findings[0].grounding_coverage - 1.0).abs() < 1e-9);
        assert!(outcome.flags.is_empty());
    }

    #[tokio::test]
    async fn timeout_on_all_retries_degrades_once() {
        let reasoner = Arc::new(ScriptedReasoner::timing_out());
        let verifier = Verifier::new(
            reasoner.clone(),
            Arc::new(VerificationCache::new()),
            fast_config(),
        );
        let finding = test_finding();
        let claim = claim_for(&finding, "revenue reached $120 million in fiscal 2025");
        let outcome = verifier
            .verify(vec![finding], vec![claim], &corpus_matching_revenue())
            .await;

        // max_retries = 3 attempts, then exactly one degraded verdict.
        assert_eq!(reasoner.call_count(), 3);
        assert_eq!(outcome.degraded_verdicts, 1);
        assert_eq!(outcome.claims.len(), 1);
        assert_eq!(outcome.claims[0].verdict, Verdict::Ungrounded);
        assert_eq!(outcome.claims[0].reason.as_deref(), Some(UNDETERMINED_REASON));
    }

    #[tokio::test]
    async fn malformed_reply_degrades_without_retry() {
        let reasoner = Arc::new(ScriptedReasoner::replying("certainly! the claim is true"));
        let verifier = Verifier::new(
            reasoner.clone(),
            Arc::new(VerificationCache::new()),
            fast_config(),
        );
        let finding = test_finding();
        let claim = claim_for(&finding, "revenue reached $120 million in fiscal 2025");
        let outcome = verifier
            .verify(vec![finding], vec![claim], &corpus_matching_revenue())
            .await;

        assert_eq!(reasoner.call_count(), 1);
        assert_eq!(outcome.claims[0].verdict, Verdict::Ungrounded);
        assert_eq!(outcome.degraded_verdicts, 1);
    }

    #[tokio::test]
    async fn critical_ungrounded_claim_flags_hallucination() {
        let reasoner = Arc::new(ScriptedReasoner::replying(
            r#"{"is_grounded": false, "reasoning": "no support in filings", "severity": "critical", "suggested_action": "remove_claim"}"#,
        ));
        let verifier = Verifier::new(
            reasoner,
            Arc::new(VerificationCache::new()),
            fast_config(),
        );
        let finding = test_finding();
        let claim = claim_for(&finding, "revenue reached $900 million in fiscal 2025");
        let outcome = verifier
            .verify(vec![finding], vec![claim], &corpus_matching_revenue())
            .await;

        assert_eq!(outcome.flags.len(), 1);
        assert_eq!(outcome.flags[0].severity, Severity::Critical);
        assert_eq!(outcome.flags[0].action, "remove_claim");
        assert_eq!(outcome.findings[0].hallucination_warnings.len(), 1);
        assert_eq!(outcome.findings[0].grounding_coverage, 0.0);
    }

    #[tokio::test]
    async fn identical_claims_hit_cache_after_first_call() {
        let reasoner = Arc::new(ScriptedReasoner::replying(
            r#"{"is_grounded": true, "reasoning": "matches", "severity": "low", "suggested_action": "none"}"#,
        ));
        let verifier = Verifier::new(
            reasoner.clone(),
            Arc::new(VerificationCache::new()),
            fast_config(),
        );
        let finding = test_finding();
        let c1 = claim_for(&finding, "revenue reached $120 million in fiscal 2025");
        let c2 = claim_for(&finding, "revenue reached $120 million in fiscal 2025");
        let outcome = verifier
            .verify(vec![finding], vec![c1, c2], &corpus_matching_revenue())
            .await;

        assert_eq!(reasoner.call_count(), 1);
        assert_eq!(outcome.cache_hits, 1);
        assert!(outcome.claims.iter().all(|c| c.verdict == Verdict::Grounded));
    }

    #[tokio::test]
    async fn results_merge_in_input_order() {
        let reasoner = Arc::new(ScriptedReasoner::replying(
            r#"{"is_grounded": true, "reasoning": "ok", "severity": "low", "suggested_action": "none"}"#,
        ));
        let mut config = fast_config();
        config.batch_size = 1;
        config.enable_caching = false;
        let verifier = Verifier::new(reasoner, Arc::new(VerificationCache::new()), config);
        let finding = test_finding();
        let claims: Vec<Claim> = (0..7)
            .map(|i| claim_for(&finding, &format!("revenue milestone {i} of $120 million")))
            .collect();
        let expected: Vec<Uuid> = claims.iter().map(|c| c.id).collect();
        let outcome = verifier
            .verify(vec![finding], claims, &corpus_matching_revenue())
            .await;
        let got: Vec<Uuid> = outcome.claims.iter().map(|c| c.id).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn findings_without_claims_keep_full_coverage() {
        let verifier = Verifier::new(
            Arc::new(ScriptedReasoner::replying("{}")),
            Arc::new(VerificationCache::new()),
            fast_config(),
        );
        let finding = test_finding();
        let outcome = verifier.verify(vec![finding], vec![], &SourceCorpus::new()).await;
        assert!((outcome.findings[0].grounding_coverage - 1.0).abs() < 1e-9);
        assert_eq!(outcome.external_calls, 0);
    }
}
