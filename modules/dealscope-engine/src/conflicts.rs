//! Conflict Resolver — detects contradictory numeric/qualitative claims
//! about the same metric or topic across analyzers and resolves them.
//!
//! Numeric conflicts resolve deterministically (authority value, mean, or
//! median of the contending values) and are never sent to the reasoning
//! backend. Qualitative conflicts go to arbitration; on failure the first
//! contending assessment wins, with an explicit fallback note.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use dealscope_common::{
    Conflict, ConsolidationConfig, Contender, ContendingValue, Finding, ResolutionMethod,
};
use reason_client::{util::strip_code_blocks, Reasoner};

/// Numeric resolution policy for one metric family.
struct MetricRule {
    key: &'static str,
    aliases: &'static [&'static str],
    /// Whether a designated-authority analyzer's value wins when present.
    authority_preferred: bool,
    fallback: ResolutionMethod,
}

const METRIC_RULES: &[MetricRule] = &[
    MetricRule {
        key: "valuation",
        aliases: &["valuation", "enterprise_value"],
        authority_preferred: true,
        fallback: ResolutionMethod::Average,
    },
    MetricRule {
        key: "wacc",
        aliases: &["wacc", "discount_rate"],
        authority_preferred: true,
        fallback: ResolutionMethod::Median,
    },
    MetricRule {
        key: "irr",
        aliases: &["irr"],
        authority_preferred: true,
        fallback: ResolutionMethod::Median,
    },
    MetricRule {
        key: "revenue",
        aliases: &["revenue", "sales"],
        authority_preferred: false,
        fallback: ResolutionMethod::Average,
    },
    MetricRule {
        key: "ebitda",
        aliases: &["ebitda"],
        authority_preferred: false,
        fallback: ResolutionMethod::Average,
    },
    MetricRule {
        key: "trading_multiple",
        aliases: &["multiple"],
        authority_preferred: false,
        fallback: ResolutionMethod::Median,
    },
];

const QUALITATIVE_TOPICS: &[&str] = &[
    "risk_level",
    "growth_outlook",
    "competitive_position",
    "regulatory_risk",
];

/// Max length for a string value to count as a categorical assessment.
const MAX_ASSESSMENT_LEN: usize = 80;

#[derive(Debug, Deserialize, JsonSchema)]
struct ArbitrationVerdict {
    final_assessment: String,
    rationale: String,
}

#[derive(Debug, Default)]
pub struct ConflictOutcome {
    pub conflicts: Vec<Conflict>,
    pub numeric_resolved: u32,
    pub qualitative_resolved: u32,
    pub degradations: Vec<String>,
}

pub struct ConflictResolver {
    reasoner: Arc<dyn Reasoner>,
    config: ConsolidationConfig,
}

impl ConflictResolver {
    pub fn new(reasoner: Arc<dyn Reasoner>, config: ConsolidationConfig) -> Self {
        Self { reasoner, config }
    }

    /// Detect and resolve conflicts across the unique findings.
    pub async fn resolve(&self, findings: &[Finding]) -> ConflictOutcome {
        let mut outcome = ConflictOutcome::default();

        // --- Numeric metrics ---
        for rule in METRIC_RULES {
            let contenders = collect_numeric_contenders(findings, rule);
            if distinct_numbers(&contenders) < 2 {
                continue;
            }
            let conflict = self.resolve_numeric(rule, contenders);
            info!(
                key = conflict.key.as_str(),
                method = %conflict.method,
                resolved = %conflict.resolved,
                "Numeric conflict resolved"
            );
            outcome.numeric_resolved += 1;
            outcome.conflicts.push(conflict);
        }

        // --- Qualitative topics ---
        for topic in QUALITATIVE_TOPICS {
            let contenders = collect_qualitative_contenders(findings, topic);
            if distinct_assessments(&contenders) < 2 {
                continue;
            }
            let (conflict, degraded) = self.arbitrate(topic, contenders).await;
            if let Some(cause) = degraded {
                outcome.degradations.push(cause);
            }
            info!(
                key = conflict.key.as_str(),
                method = %conflict.method,
                "Qualitative conflict resolved"
            );
            outcome.qualitative_resolved += 1;
            outcome.conflicts.push(conflict);
        }

        outcome
    }

    fn resolve_numeric(&self, rule: &MetricRule, contenders: Vec<Contender>) -> Conflict {
        let values: Vec<f64> = contenders
            .iter()
            .filter_map(|c| match c.value {
                ContendingValue::Number(n) => Some(n),
                ContendingValue::Assessment(_) => None,
            })
            .collect();

        if rule.authority_preferred {
            if let Some(authority) = &self.config.authority_analyzer {
                if let Some(c) = contenders.iter().find(|c| &c.analyzer_id == authority) {
                    return Conflict {
                        key: rule.key.to_string(),
                        resolved: c.value.clone(),
                        method: ResolutionMethod::Authority,
                        rationale: format!("designated authority '{authority}' value preferred"),
                        contenders,
                    };
                }
            }
        }

        let (resolved, method, how) = match rule.fallback {
            ResolutionMethod::Average => (mean(&values), ResolutionMethod::Average, "mean"),
            _ => (median(&values), ResolutionMethod::Median, "median"),
        };

        Conflict {
            key: rule.key.to_string(),
            resolved: ContendingValue::Number(resolved),
            method,
            rationale: format!("{how} of {} contending values", values.len()),
            contenders,
        }
    }

    /// Qualitative arbitration through the reasoning backend. Any failure —
    /// call error, unparseable reply, or an assessment that matches none of
    /// the contenders — falls back to the first contending assessment.
    async fn arbitrate(
        &self,
        topic: &str,
        contenders: Vec<Contender>,
    ) -> (Conflict, Option<String>) {
        let prompt = build_arbitration_prompt(topic, &contenders);
        let timeout = Duration::from_secs(self.config.verification_timeout_seconds);

        let arbitrated = match self.reasoner.call(&prompt, timeout).await {
            Ok(text) => parse_arbitration(&text).and_then(|v| {
                matching_contender(&contenders, &v.final_assessment)
                    .map(|assessment| (assessment, v.rationale))
            }),
            Err(e) => {
                warn!(topic, error = %e, "Arbitration call failed");
                None
            }
        };

        match arbitrated {
            Some((assessment, rationale)) => (
                Conflict {
                    key: topic.to_string(),
                    resolved: ContendingValue::Assessment(assessment),
                    method: ResolutionMethod::Arbitration,
                    rationale,
                    contenders,
                },
                None,
            ),
            None => {
                let first = contenders
                    .first()
                    .map(|c| c.value.clone())
                    .unwrap_or_else(|| ContendingValue::Assessment(String::new()));
                let cause = format!("arbitration failed for '{topic}'; first assessment kept");
                (
                    Conflict {
                        key: topic.to_string(),
                        resolved: first,
                        method: ResolutionMethod::FirstAssessment,
                        rationale: format!(
                            "fallback: arbitration unavailable, first contending assessment kept \
                             (from '{}')",
                            contenders
                                .first()
                                .map(|c| c.analyzer_id.as_str())
                                .unwrap_or("unknown")
                        ),
                        contenders,
                    },
                    Some(cause),
                )
            }
        }
    }
}

// --- Contender collection ---

/// Contenders keep finding order (one value per analyzer, first hit wins),
/// so the first-assessment fallback favors the analyzer that ran first —
/// the bias the resolution rationale makes explicit.
fn collect_numeric_contenders(findings: &[Finding], rule: &MetricRule) -> Vec<Contender> {
    let mut seen = HashSet::new();
    let mut contenders = Vec::new();
    for finding in findings {
        if finding.placeholder || seen.contains(finding.analyzer_id.as_str()) {
            continue;
        }
        if let Some(value) = find_numeric_value(&finding.payload, rule.aliases) {
            seen.insert(finding.analyzer_id.as_str());
            contenders.push(Contender {
                analyzer_id: finding.analyzer_id.clone(),
                value: ContendingValue::Number(value),
            });
        }
    }
    contenders
}

fn collect_qualitative_contenders(findings: &[Finding], topic: &str) -> Vec<Contender> {
    let mut seen = HashSet::new();
    let mut contenders = Vec::new();
    for finding in findings {
        if finding.placeholder || seen.contains(finding.analyzer_id.as_str()) {
            continue;
        }
        if let Some(assessment) = find_assessment(&finding.payload, topic) {
            seen.insert(finding.analyzer_id.as_str());
            contenders.push(Contender {
                analyzer_id: finding.analyzer_id.clone(),
                value: ContendingValue::Assessment(assessment),
            });
        }
    }
    contenders
}

/// All valuation figures reported across findings, one per analyzer.
/// Used by the assembler's executive-summary projection.
pub(crate) fn valuation_values(findings: &[Finding]) -> Vec<f64> {
    let rule = METRIC_RULES
        .iter()
        .find(|r| r.key == "valuation")
        .expect("valuation rule is always present");
    collect_numeric_contenders(findings, rule)
        .into_iter()
        .filter_map(|c| match c.value {
            ContendingValue::Number(n) => Some(n),
            ContendingValue::Assessment(_) => None,
        })
        .collect()
}

fn find_numeric_value(payload: &Value, aliases: &[&str]) -> Option<f64> {
    match payload {
        Value::Object(map) => {
            for (key, value) in map {
                if aliases.iter().any(|a| key_matches(key, a)) {
                    if let Some(n) = parse_numeric(value) {
                        return Some(n);
                    }
                }
            }
            map.values().find_map(|v| find_numeric_value(v, aliases))
        }
        Value::Array(items) => items.iter().find_map(|v| find_numeric_value(v, aliases)),
        _ => None,
    }
}

/// Whole-token match on a normalized key: "dcf_valuation" matches
/// "valuation", but "mirror_notes" does not match "irr". Multi-token
/// aliases ("enterprise_value") match as substrings of the normalized key.
fn key_matches(key: &str, alias: &str) -> bool {
    let norm = normalize_key(key);
    if alias.contains('_') {
        return norm.contains(alias);
    }
    norm.split('_').any(|token| token == alias)
}

fn find_assessment(payload: &Value, topic: &str) -> Option<String> {
    match payload {
        Value::Object(map) => {
            for (key, value) in map {
                if normalize_key(key).contains(topic) {
                    if let Some(s) = value.as_str() {
                        let trimmed = s.trim();
                        if !trimmed.is_empty() && trimmed.len() <= MAX_ASSESSMENT_LEN {
                            return Some(trimmed.to_string());
                        }
                    }
                }
            }
            map.values().find_map(|v| find_assessment(v, topic))
        }
        Value::Array(items) => items.iter().find_map(|v| find_assessment(v, topic)),
        _ => None,
    }
}

fn normalize_key(key: &str) -> String {
    key.to_lowercase().replace('-', "_").replace(' ', "_")
}

/// Parse a numeric metric value from a JSON number or a money-style string
/// like "$5.0B", "5.4 billion", "450M".
fn parse_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_money(s),
        _ => None,
    }
}

fn parse_money(s: &str) -> Option<f64> {
    let cleaned = s.trim().trim_start_matches('$').replace(',', "");
    let lower = cleaned.to_lowercase();

    let digits_end = lower
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.' || *c == '-')
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    let number: f64 = lower[..digits_end].parse().ok()?;
    let suffix = lower[digits_end..].trim();

    let multiplier = if suffix.starts_with('b') {
        1e9
    } else if suffix.starts_with("mm") || suffix.starts_with('m') {
        1e6
    } else if suffix.starts_with('k') || suffix.starts_with("thousand") {
        1e3
    } else {
        1.0
    };
    Some(number * multiplier)
}

fn distinct_numbers(contenders: &[Contender]) -> usize {
    let mut distinct: Vec<f64> = Vec::new();
    for c in contenders {
        if let ContendingValue::Number(n) = c.value {
            if !distinct.iter().any(|d| approx_eq(*d, n)) {
                distinct.push(n);
            }
        }
    }
    distinct.len()
}

fn distinct_assessments(contenders: &[Contender]) -> usize {
    let mut distinct: Vec<String> = Vec::new();
    for c in contenders {
        if let ContendingValue::Assessment(ref a) = c.value {
            let norm = a.to_lowercase();
            if !distinct.contains(&norm) {
                distinct.push(norm);
            }
        }
    }
    distinct.len()
}

fn approx_eq(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() < scale * 1e-9
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn matching_contender(contenders: &[Contender], assessment: &str) -> Option<String> {
    let wanted = assessment.trim().to_lowercase();
    contenders.iter().find_map(|c| match &c.value {
        ContendingValue::Assessment(a) if a.trim().to_lowercase() == wanted => Some(a.clone()),
        _ => None,
    })
}

fn build_arbitration_prompt(topic: &str, contenders: &[Contender]) -> String {
    let assessments: String = contenders
        .iter()
        .map(|c| format!("- {}: {}", c.analyzer_id, c.value))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Multiple due-diligence analyzers disagree on '{topic}' for this transaction.\n\n\
         Assessments:\n{assessments}\n\n\
         Pick the single best-supported final assessment from the list above. \
         Return JSON with exactly these fields:\n\
         {{\"final_assessment\": \"...\", \"rationale\": \"...\"}}\n\
         final_assessment must be one of the listed assessments, verbatim. \
         Return only the JSON object."
    )
}

fn parse_arbitration(response: &str) -> Option<ArbitrationVerdict> {
    serde_json::from_str(strip_code_blocks(response)).ok()
}
