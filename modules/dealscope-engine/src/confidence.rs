//! Confidence Aggregator — per-stage and overall confidence scores.
//!
//! Never raises: any internal failure yields the documented conservative
//! default of 0.5 with a logged cause.

use tracing::warn;

use dealscope_common::{
    confidence::{
        coverage_bucket, redundancy_bucket, CONSERVATIVE_CONFIDENCE, NO_CONFLICT_CONFIDENCE,
        NUMERIC_RESOLUTION_WEIGHT, QUALITATIVE_RESOLUTION_WEIGHT,
    },
    ConfidenceScore, ConfidenceWeights, Finding, RedundancyStats,
};

pub struct ConfidenceInputs<'a> {
    pub findings: &'a [Finding],
    pub stats: RedundancyStats,
    pub numeric_resolved: u32,
    pub qualitative_resolved: u32,
    pub expected_analyzers: usize,
    pub reporting_analyzers: usize,
}

/// Compute the four component scores and the fixed-weight overall score.
pub fn aggregate(inputs: &ConfidenceInputs, weights: ConfidenceWeights) -> (Vec<ConfidenceScore>, f64) {
    if inputs.findings.is_empty() {
        warn!("No findings reached the aggregator; conservative default confidence");
        return (
            vec![ConfidenceScore {
                component: "overall".to_string(),
                value: CONSERVATIVE_CONFIDENCE,
                rationale: "no analyzer findings; conservative default".to_string(),
            }],
            CONSERVATIVE_CONFIDENCE,
        );
    }

    let grounding = mean_grounding_coverage(inputs.findings);
    let dedup = redundancy_bucket(inputs.stats.redundancy_ratio());
    let conflicts = conflict_confidence(inputs.numeric_resolved, inputs.qualitative_resolved);
    let coverage = coverage_confidence(inputs.expected_analyzers, inputs.reporting_analyzers);

    let breakdown = vec![
        ConfidenceScore {
            component: "grounding".to_string(),
            value: grounding,
            rationale: format!(
                "mean grounding coverage across {} findings",
                inputs.findings.len()
            ),
        },
        ConfidenceScore {
            component: "deduplication".to_string(),
            value: dedup,
            rationale: format!(
                "{:.1}% redundancy across {} findings",
                inputs.stats.redundancy_ratio() * 100.0,
                inputs.stats.total_findings
            ),
        },
        ConfidenceScore {
            component: "conflict_resolution".to_string(),
            value: conflicts,
            rationale: format!(
                "{} numeric and {} qualitative resolutions",
                inputs.numeric_resolved, inputs.qualitative_resolved
            ),
        },
        ConfidenceScore {
            component: "analyzer_coverage".to_string(),
            value: coverage,
            rationale: format!(
                "{} of {} expected analyzers reported",
                inputs.reporting_analyzers, inputs.expected_analyzers
            ),
        },
    ];

    let overall = weights.grounding * grounding
        + weights.deduplication * dedup
        + weights.conflict_resolution * conflicts
        + weights.analyzer_coverage * coverage;

    if !overall.is_finite() {
        warn!("Overall confidence computation produced a non-finite value; conservative default");
        return (breakdown, CONSERVATIVE_CONFIDENCE);
    }

    (breakdown, overall.clamp(0.0, 1.0))
}

fn mean_grounding_coverage(findings: &[Finding]) -> f64 {
    let sum: f64 = findings.iter().map(|f| f.grounding_coverage).sum();
    let mean = sum / findings.len() as f64;
    if mean.is_finite() {
        mean.clamp(0.0, 1.0)
    } else {
        CONSERVATIVE_CONFIDENCE
    }
}

fn conflict_confidence(numeric: u32, qualitative: u32) -> f64 {
    let total = numeric + qualitative;
    if total == 0 {
        return NO_CONFLICT_CONFIDENCE;
    }
    (f64::from(numeric) * NUMERIC_RESOLUTION_WEIGHT
        + f64::from(qualitative) * QUALITATIVE_RESOLUTION_WEIGHT)
        / f64::from(total)
}

fn coverage_confidence(expected: usize, reporting: usize) -> f64 {
    if expected == 0 {
        return CONSERVATIVE_CONFIDENCE;
    }
    coverage_bucket(reporting as f64 / expected as f64)
}
