use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl Severity {
    /// Loose parse for backend replies. Unknown strings collapse to Medium.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

/// Which lookup strategy produced a Finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLocation {
    PrimarySlot,
    TargetNested,
    LegacyOutputArray,
    ScatteredKeys,
    DeepSearch,
    Placeholder,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLocation::PrimarySlot => write!(f, "primary_slot"),
            SourceLocation::TargetNested => write!(f, "target_nested"),
            SourceLocation::LegacyOutputArray => write!(f, "legacy_output_array"),
            SourceLocation::ScatteredKeys => write!(f, "scattered_keys"),
            SourceLocation::DeepSearch => write!(f, "deep_search"),
            SourceLocation::Placeholder => write!(f, "placeholder"),
        }
    }
}

// --- Finding ---

/// One analyzer's output for a run, normalized by the Collector.
///
/// Immutable after collection except for the additive hallucination-warning
/// annotation applied by the Grounding Verifier, and the grounding coverage
/// it computes from claim verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub analyzer_id: String,
    pub payload: serde_json::Value,
    pub raw_confidence: f64,
    pub source_location: SourceLocation,
    pub extracted_at: DateTime<Utc>,
    /// True when the analyzer was missing and a low-confidence stand-in was
    /// synthesized so downstream stages see a complete roster.
    pub placeholder: bool,
    /// Fraction of this finding's claims that passed grounding (0.0-1.0).
    /// 1.0 when no verifiable claims were extracted.
    pub grounding_coverage: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hallucination_warnings: Vec<String>,
}

impl Finding {
    /// Composite confidence used to pick cluster representatives.
    pub fn composite_confidence(&self) -> f64 {
        0.7 * self.raw_confidence + 0.3 * self.grounding_coverage
    }
}

// --- Claim ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Grounded,
    Ungrounded,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pending => write!(f, "pending"),
            Verdict::Grounded => write!(f, "grounded"),
            Verdict::Ungrounded => write!(f, "ungrounded"),
        }
    }
}

/// An atomic verifiable assertion extracted from a Finding.
///
/// Verdict fields are mutated exactly once by the Grounding Verifier, then
/// the claim is retained permanently for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub analyzer_id: String,
    /// Back-reference to the originating Finding. Exactly one per claim.
    pub finding_id: Uuid,
    pub content: String,
    /// 0..=100, priority-descending ordering for verification.
    pub priority_score: u8,
    pub verdict: Verdict,
    pub severity: Severity,
    pub reason: Option<String>,
    pub action: Option<String>,
}

// --- Cluster ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStrength {
    High,
    Medium,
}

/// A group of near-duplicate findings. Clusters partition their input —
/// every finding belongs to exactly one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub member_ids: Vec<Uuid>,
    pub representative_id: Uuid,
    pub consensus: ConsensusStrength,
}

// --- Conflict ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ContendingValue {
    Number(f64),
    Assessment(String),
}

impl std::fmt::Display for ContendingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContendingValue::Number(n) => write!(f, "{n}"),
            ContendingValue::Assessment(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contender {
    pub analyzer_id: String,
    pub value: ContendingValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Authority,
    Average,
    Median,
    Arbitration,
    /// Qualitative fallback when arbitration fails: first contending
    /// assessment wins. Ordering-biased; always carries a fallback note.
    FirstAssessment,
}

impl std::fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionMethod::Authority => write!(f, "authority"),
            ResolutionMethod::Average => write!(f, "average"),
            ResolutionMethod::Median => write!(f, "median"),
            ResolutionMethod::Arbitration => write!(f, "arbitration"),
            ResolutionMethod::FirstAssessment => write!(f, "first_assessment"),
        }
    }
}

/// Two or more analyzers asserting different values for the same metric or
/// topic, plus how the disagreement was resolved.
///
/// `resolved` is always one of the contending values or a mean/median of
/// them — never fabricated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub key: String,
    pub contenders: Vec<Contender>,
    pub method: ResolutionMethod,
    pub resolved: ContendingValue,
    pub rationale: String,
}

// --- Confidence ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub component: String,
    pub value: f64,
    pub rationale: String,
}

// --- Hallucination audit record ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationFlag {
    pub analyzer_id: String,
    pub claim: String,
    pub severity: Severity,
    pub reason: String,
    pub action: String,
}

// --- Consolidated output ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRange {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub top_risks: Vec<String>,
    pub top_opportunities: Vec<String>,
    pub valuation_range: Option<ValuationRange>,
}

/// One domain section of the consolidated record. Always present in the
/// output — empty-but-present when no analyzer covered the domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSection {
    pub analyzer_ids: Vec<String>,
    pub highlights: Vec<String>,
    pub details: serde_json::Value,
}

impl Default for DomainSection {
    fn default() -> Self {
        Self {
            analyzer_ids: Vec::new(),
            highlights: Vec::new(),
            details: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub conflicts: Vec<Conflict>,
    pub hallucination_flags: Vec<HallucinationFlag>,
    pub confidence_breakdown: Vec<ConfidenceScore>,
    /// Every verified claim with its final verdict, kept for audit.
    #[serde(default)]
    pub verified_claims: Vec<Claim>,
    /// One audit entry per local degradation (missing analyzer, timed-out
    /// verification, lexical fallback, ...).
    pub degradations: Vec<String>,
}

/// The single merged, confidence-scored pipeline result. Produced exactly
/// once per run, immutable, persisted for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedOutput {
    pub run_id: Uuid,
    pub deal_id: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub executive_summary: ExecutiveSummary,
    pub financial: DomainSection,
    pub legal: DomainSection,
    pub market: DomainSection,
    pub integration_tax: DomainSection,
    pub risk_macro: DomainSection,
    pub external_validation: DomainSection,
    pub validation_summary: ValidationSummary,
    /// Always numeric. Defaults conservatively to 0.5 on internal failure.
    pub overall_confidence: f64,
}

// --- Redundancy statistics ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RedundancyStats {
    pub total_findings: u32,
    pub redundant: u32,
    /// Number of multi-member clusters.
    pub clusters: u32,
}

impl RedundancyStats {
    /// Fraction of input findings absorbed as duplicates (0.0-1.0).
    pub fn redundancy_ratio(&self) -> f64 {
        if self.total_findings == 0 {
            return 0.0;
        }
        self.redundant as f64 / self.total_findings as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_finding(raw: f64, coverage: f64) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            analyzer_id: "financial_analysis".to_string(),
            payload: serde_json::json!({"summary": "test"}),
            raw_confidence: raw,
            source_location: SourceLocation::PrimarySlot,
            extracted_at: Utc::now(),
            placeholder: false,
            grounding_coverage: coverage,
            hallucination_warnings: vec![],
        }
    }

    #[test]
    fn composite_confidence_weights_raw_over_coverage() {
        let f = test_finding(1.0, 0.0);
        assert!((f.composite_confidence() - 0.7).abs() < 1e-9);
        let f = test_finding(0.0, 1.0);
        assert!((f.composite_confidence() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn severity_loose_parse_defaults_to_medium() {
        assert_eq!(Severity::from_str_loose("HIGH"), Severity::High);
        assert_eq!(Severity::from_str_loose("critical"), Severity::Critical);
        assert_eq!(Severity::from_str_loose("garbage"), Severity::Medium);
        assert_eq!(Severity::from_str_loose(""), Severity::Medium);
    }

    #[test]
    fn redundancy_ratio_zero_when_empty() {
        let stats = RedundancyStats::default();
        assert_eq!(stats.redundancy_ratio(), 0.0);
    }

    #[test]
    fn redundancy_ratio_computes_fraction() {
        let stats = RedundancyStats {
            total_findings: 10,
            redundant: 4,
            clusters: 2,
        };
        assert!((stats.redundancy_ratio() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn contending_value_serializes_tagged() {
        let n = ContendingValue::Number(5.2e9);
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"kind\":\"number\""));
        let a = ContendingValue::Assessment("moderate".to_string());
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"kind\":\"assessment\""));
    }

    #[test]
    fn domain_section_default_is_empty_but_present() {
        let s = DomainSection::default();
        assert!(s.analyzer_ids.is_empty());
        assert!(s.details.is_object());
    }

    #[test]
    fn finding_warnings_skipped_when_empty() {
        let f = test_finding(0.8, 1.0);
        let json = serde_json::to_string(&f).unwrap();
        assert!(!json.contains("hallucination_warnings"));
    }
}
