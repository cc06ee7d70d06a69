//! Claim Extractor & Prioritizer — pulls atomic verifiable statements out of
//! finding payloads and ranks them so verification cost stays bounded.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use dealscope_common::{Claim, ConsolidationConfig, Finding, Severity, Verdict};

/// Indicator terms that make a statement worth verifying on their own.
const CRITICAL_KEYWORDS: &[&str] = &[
    "valuation",
    "impairment",
    "litigation",
    "covenant",
    "default",
    "going concern",
    "material adverse",
    "regulatory violation",
    "undisclosed",
    "contingent liability",
    "goodwill write-down",
    "fraud",
    "restatement",
];

/// Softer operational/financial indicators.
const MEDIUM_KEYWORDS: &[&str] = &[
    "revenue",
    "ebitda",
    "margin",
    "growth",
    "synergy",
    "market share",
    "churn",
    "wacc",
    "irr",
    "multiple",
    "headcount",
    "integration",
    "pipeline",
    "concentration",
];

static CRITICAL_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(CRITICAL_KEYWORDS));
static MEDIUM_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(MEDIUM_KEYWORDS));
static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d").expect("numeric pattern is valid")
});

/// Whole-word, case-insensitive alternation over the keyword list, so
/// "IRR" matches but "irrelevant" does not.
fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation: Vec<String> = keywords.iter().map(|k| k.replace(' ', r"\s+")).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation.join("|")))
        .expect("keyword regex is valid")
}

const CRITICAL_POINTS_PER_HIT: u32 = 30;
const CRITICAL_CAP: u32 = 90;
const MEDIUM_POINTS_PER_HIT: u32 = 10;
const MEDIUM_CAP: u32 = 30;
const NUMERIC_BONUS: u32 = 20;
const HIGH_TRUST_BONUS: u32 = 10;

/// Minimum length for a string leaf to be considered a candidate statement.
const MIN_CANDIDATE_LEN: usize = 12;
/// Cap on candidates returned in trusted-data mode.
const TRUSTED_MODE_LIMIT: usize = 5;

/// Extract and prioritize claims for one finding.
///
/// Output is priority-descending and bounded by the analyzer's claim cap.
/// In trusted-data mode only critical-keyword matches (top 5, document
/// order) are returned, bypassing scoring.
pub fn extract_claims(finding: &Finding, config: &ConsolidationConfig) -> Vec<Claim> {
    if finding.placeholder {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    collect_candidate_strings(&finding.payload, &mut candidates);

    if config.skip_verification_for_trusted_data {
        let claims: Vec<Claim> = candidates
            .into_iter()
            .filter(|text| CRITICAL_RE.is_match(text))
            .take(TRUSTED_MODE_LIMIT)
            .map(|text| make_claim(finding, text, CRITICAL_CAP as u8))
            .collect();
        info!(
            analyzer = finding.analyzer_id.as_str(),
            count = claims.len(),
            "Trusted-data mode: critical claims only"
        );
        return claims;
    }

    let high_trust = config.high_trust_analyzers.contains(&finding.analyzer_id);
    let min_score = config.grounding_depth.min_score();

    let mut scored: Vec<(String, u8)> = candidates
        .into_iter()
        .filter_map(|text| {
            let score = score_candidate(&text, high_trust)?;
            (score >= min_score).then_some((text, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(config.claim_cap(&finding.analyzer_id));

    let claims: Vec<Claim> = scored
        .into_iter()
        .map(|(text, score)| make_claim(finding, text, score))
        .collect();

    info!(
        analyzer = finding.analyzer_id.as_str(),
        count = claims.len(),
        depth = %config.grounding_depth,
        "Claims extracted"
    );
    claims
}

/// Score a candidate statement 0-100, or None when no indicator term hits.
fn score_candidate(text: &str, high_trust: bool) -> Option<u8> {
    let critical_hits = CRITICAL_RE.find_iter(text).count() as u32;
    let medium_hits = MEDIUM_RE.find_iter(text).count() as u32;
    if critical_hits == 0 && medium_hits == 0 {
        return None;
    }

    let mut score = (critical_hits * CRITICAL_POINTS_PER_HIT).min(CRITICAL_CAP)
        + (medium_hits * MEDIUM_POINTS_PER_HIT).min(MEDIUM_CAP);
    if NUMERIC_RE.is_match(text) {
        score += NUMERIC_BONUS;
    }
    if high_trust {
        score += HIGH_TRUST_BONUS;
    }
    Some(score.min(100) as u8)
}

fn make_claim(finding: &Finding, content: String, score: u8) -> Claim {
    let severity = if CRITICAL_RE.is_match(&content) {
        Severity::High
    } else {
        Severity::Medium
    };
    Claim {
        id: Uuid::new_v4(),
        analyzer_id: finding.analyzer_id.clone(),
        finding_id: finding.id,
        content,
        priority_score: score,
        verdict: Verdict::Pending,
        severity,
        reason: None,
        action: None,
    }
}

/// Depth-first walk collecting string leaves long enough to be statements.
fn collect_candidate_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.len() >= MIN_CANDIDATE_LEN {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_candidate_strings(item, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_candidate_strings(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dealscope_common::SourceLocation;
    use serde_json::json;

    fn finding_with(payload: Value) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            analyzer_id: "financial_analysis".to_string(),
            payload,
            raw_confidence: 0.8,
            source_location: SourceLocation::PrimarySlot,
            extracted_at: Utc::now(),
            placeholder: false,
            grounding_coverage: 1.0,
            hallucination_warnings: vec![],
        }
    }

    fn config() -> ConsolidationConfig {
        ConsolidationConfig::builder()
            .expected_analyzers(vec!["financial_analysis".to_string()])
            .grounding_depth(dealscope_common::GroundingDepth::Comprehensive)
            .build()
    }

    #[test]
    fn scores_stay_within_bounds() {
        let text = "valuation impairment litigation covenant default fraud revenue ebitda \
                    margin growth of $450 million";
        let score = score_candidate(text, true).unwrap();
        assert!(score <= 100);
        assert_eq!(score, 100);
    }

    #[test]
    fn numeric_content_adds_twenty() {
        let without = score_candidate("revenue growth looks solid", false).unwrap();
        let with = score_candidate("revenue growth of 12 percent", false).unwrap();
        assert_eq!(with - without, 20);
    }

    #[test]
    fn high_trust_adds_ten() {
        let base = score_candidate("revenue growth looks solid", false).unwrap();
        let trusted = score_candidate("revenue growth looks solid", true).unwrap();
        assert_eq!(trusted - base, 10);
    }

    #[test]
    fn no_keywords_no_claim() {
        assert!(score_candidate("the weather was pleasant in Toronto", false).is_none());
    }

    #[test]
    fn per_analyzer_cap_respected() {
        let statements: Vec<Value> = (0..30)
            .map(|i| json!(format!("revenue grew {i} percent year over year")))
            .collect();
        let f = finding_with(json!({ "insights": statements }));
        let mut cfg = config();
        cfg.grounding_depth = dealscope_common::GroundingDepth::Comprehensive;
        cfg.claim_caps.insert("financial_analysis".to_string(), 4);
        let claims = extract_claims(&f, &cfg);
        assert_eq!(claims.len(), 4);
    }

    #[test]
    fn depth_cutoff_filters_low_priority() {
        let f = finding_with(json!({
            // medium only, no digits: scores 10
            "a": "margin compression observed this quarter",
            // three critical hits + digits: capped at 100
            "b": "litigation over an undisclosed contingent liability of $42 million",
        }));
        let mut cfg = config();
        cfg.grounding_depth = dealscope_common::GroundingDepth::Minimal; // cutoff 80
        let claims = extract_claims(&f, &cfg);
        assert_eq!(claims.len(), 1);
        assert!(claims[0].content.contains("litigation"));
    }

    #[test]
    fn output_is_priority_descending() {
        let f = finding_with(json!({
            "low": "integration planning is underway",
            "high": "undisclosed litigation and impairment of $30 million",
        }));
        let mut cfg = config();
        cfg.grounding_depth = dealscope_common::GroundingDepth::Comprehensive;
        let claims = extract_claims(&f, &cfg);
        assert!(claims.len() >= 2);
        assert!(claims[0].priority_score >= claims[1].priority_score);
        assert!(claims[0].content.contains("undisclosed"));
    }

    #[test]
    fn trusted_mode_returns_top_critical_only() {
        let statements: Vec<Value> = (0..8)
            .map(|i| json!(format!("valuation scenario {i} under review")))
            .chain(std::iter::once(json!("revenue grew 10 percent")))
            .collect();
        let f = finding_with(json!({ "insights": statements }));
        let mut cfg = config();
        cfg.skip_verification_for_trusted_data = true;
        let claims = extract_claims(&f, &cfg);
        assert_eq!(claims.len(), 5);
        assert!(claims.iter().all(|c| c.content.contains("valuation")));
    }

    #[test]
    fn each_claim_references_its_finding() {
        let f = finding_with(json!({"s": "revenue of $12 million reported"}));
        let claims = extract_claims(&f, &config());
        assert!(!claims.is_empty());
        assert!(claims.iter().all(|c| c.finding_id == f.id));
        assert!(claims.iter().all(|c| c.verdict == Verdict::Pending));
    }

    #[test]
    fn placeholder_findings_yield_no_claims() {
        let mut f = finding_with(json!({"s": "revenue of $12 million reported"}));
        f.placeholder = true;
        assert!(extract_claims(&f, &config()).is_empty());
    }

    #[test]
    fn short_strings_are_not_candidates() {
        let f = finding_with(json!({"s": "revenue"}));
        assert!(extract_claims(&f, &config()).is_empty());
    }
}
