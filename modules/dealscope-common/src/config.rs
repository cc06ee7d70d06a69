use std::collections::{HashMap, HashSet};
use std::env;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::DealscopeError;

/// How aggressively claims are selected for grounding verification.
///
/// The cutoffs (80/60/0) are carried over from the original tuning and have
/// no documented derivation; they are configuration defaults pending
/// product-owner review, not constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingDepth {
    Minimal,
    Standard,
    Comprehensive,
}

impl GroundingDepth {
    /// Minimum priority score a claim needs to be verified at this depth.
    pub fn min_score(&self) -> u8 {
        match self {
            GroundingDepth::Minimal => 80,
            GroundingDepth::Standard => 60,
            GroundingDepth::Comprehensive => 0,
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "minimal" => GroundingDepth::Minimal,
            "comprehensive" => GroundingDepth::Comprehensive,
            _ => GroundingDepth::Standard,
        }
    }
}

impl std::fmt::Display for GroundingDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroundingDepth::Minimal => write!(f, "minimal"),
            GroundingDepth::Standard => write!(f, "standard"),
            GroundingDepth::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

/// Weights for the four confidence components. Must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub grounding: f64,
    pub deduplication: f64,
    pub conflict_resolution: f64,
    pub analyzer_coverage: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            grounding: 0.35,
            deduplication: 0.20,
            conflict_resolution: 0.25,
            analyzer_coverage: 0.20,
        }
    }
}

impl ConfidenceWeights {
    pub fn sum(&self) -> f64 {
        self.grounding + self.deduplication + self.conflict_resolution + self.analyzer_coverage
    }

    pub fn validate(&self) -> Result<(), DealscopeError> {
        if (self.sum() - 1.0).abs() > 1e-6 {
            return Err(DealscopeError::Config(format!(
                "confidence weights must sum to 1.0, got {}",
                self.sum()
            )));
        }
        Ok(())
    }
}

/// Full configuration surface for one consolidation run.
///
/// Constructed explicitly by the caller and injected into the pipeline at
/// composition time — no ambient global state.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ConsolidationConfig {
    /// Analyzer ids this deal type is expected to produce.
    pub expected_analyzers: Vec<String>,

    /// Analyzers that must always appear downstream; missing ones get a
    /// low-confidence placeholder Finding instead of being dropped.
    #[builder(default)]
    pub critical_analyzers: HashSet<String>,

    /// Analyzers whose claims get a +10 priority bonus.
    #[builder(default)]
    pub high_trust_analyzers: HashSet<String>,

    /// Designated authority for valuation/WACC/IRR conflicts.
    #[builder(default)]
    pub authority_analyzer: Option<String>,

    #[builder(default = 5)]
    pub max_concurrent_verifications: usize,

    #[builder(default = 30)]
    pub verification_timeout_seconds: u64,

    #[builder(default = 3)]
    pub max_retries: u32,

    #[builder(default = 1.0)]
    pub retry_base_delay_seconds: f64,

    #[builder(default = GroundingDepth::Standard)]
    pub grounding_depth: GroundingDepth,

    #[builder(default = 5)]
    pub batch_size: usize,

    #[builder(default = 10)]
    pub max_claims_per_analyzer: usize,

    /// Per-analyzer overrides for the claim cap.
    #[builder(default)]
    pub claim_caps: HashMap<String, usize>,

    #[builder(default = true)]
    pub enable_caching: bool,

    #[builder(default = false)]
    pub skip_verification_for_trusted_data: bool,

    #[builder(default = true)]
    pub persist_snapshot: bool,

    #[builder(
        default = "snapshots/{deal_id}/{target}/consolidated_{timestamp}.json".to_string()
    )]
    pub snapshot_path_template: String,

    #[builder(default)]
    pub confidence_weights: ConfidenceWeights,

    /// Embedding-similarity cutoff for clustering. Carried over from the
    /// original tuning, pending review.
    #[builder(default = 0.85)]
    pub similarity_threshold: f64,

    /// Lexical-fallback Jaccard cutoff for clustering.
    #[builder(default = 0.6)]
    pub jaccard_threshold: f64,
}

impl ConsolidationConfig {
    /// Claim cap for one analyzer, honoring per-analyzer overrides.
    pub fn claim_cap(&self, analyzer_id: &str) -> usize {
        self.claim_caps
            .get(analyzer_id)
            .copied()
            .unwrap_or(self.max_claims_per_analyzer)
    }

    pub fn validate(&self) -> Result<(), DealscopeError> {
        self.confidence_weights.validate()?;
        if self.expected_analyzers.is_empty() {
            return Err(DealscopeError::Config(
                "expected_analyzers must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 || self.max_concurrent_verifications == 0 {
            return Err(DealscopeError::Config(
                "batch_size and max_concurrent_verifications must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read a required environment variable, panicking with a clear message.
pub fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ConsolidationConfig {
        ConsolidationConfig::builder()
            .expected_analyzers(vec!["financial_analysis".to_string()])
            .build()
    }

    #[test]
    fn defaults_match_documented_surface() {
        let cfg = base_config();
        assert_eq!(cfg.max_concurrent_verifications, 5);
        assert_eq!(cfg.verification_timeout_seconds, 30);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.max_claims_per_analyzer, 10);
        assert!(cfg.enable_caching);
        assert!(!cfg.skip_verification_for_trusted_data);
        assert!(cfg.persist_snapshot);
        assert_eq!(cfg.grounding_depth, GroundingDepth::Standard);
        assert!((cfg.similarity_threshold - 0.85).abs() < 1e-9);
        assert!((cfg.jaccard_threshold - 0.6).abs() < 1e-9);
    }

    #[test]
    fn depth_cutoffs() {
        assert_eq!(GroundingDepth::Minimal.min_score(), 80);
        assert_eq!(GroundingDepth::Standard.min_score(), 60);
        assert_eq!(GroundingDepth::Comprehensive.min_score(), 0);
    }

    #[test]
    fn claim_cap_honors_override() {
        let mut cfg = base_config();
        cfg.claim_caps
            .insert("legal_analysis".to_string(), 3);
        assert_eq!(cfg.claim_cap("legal_analysis"), 3);
        assert_eq!(cfg.claim_cap("financial_analysis"), 10);
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!(ConfidenceWeights::default().validate().is_ok());
    }

    #[test]
    fn bad_weights_rejected() {
        let w = ConfidenceWeights {
            grounding: 0.5,
            deduplication: 0.5,
            conflict_resolution: 0.5,
            analyzer_coverage: 0.5,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_roster() {
        let cfg = ConsolidationConfig::builder()
            .expected_analyzers(vec![])
            .build();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn depth_loose_parse() {
        assert_eq!(GroundingDepth::from_str_loose("minimal"), GroundingDepth::Minimal);
        assert_eq!(
            GroundingDepth::from_str_loose("COMPREHENSIVE"),
            GroundingDepth::Comprehensive
        );
        assert_eq!(GroundingDepth::from_str_loose("whatever"), GroundingDepth::Standard);
    }
}
