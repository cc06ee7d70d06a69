//! Finding Collector — normalizes per-analyzer outputs scattered across the
//! job state into canonical `Finding` records.
//!
//! Lookup is an ordered list of typed strategies, each polymorphic over the
//! `FindingLocator` trait: primary slot, target-entity-nested slot, legacy
//! output-array scan, scattered-key fallback, best-effort deep search. First
//! hit wins. Pure read — never mutates job state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use dealscope_common::{ConsolidationConfig, Finding, SourceLocation};

/// Default confidence when the analyzer did not self-report one.
const DEFAULT_RAW_CONFIDENCE: f64 = 0.7;
/// Confidence assigned to placeholder findings for missing critical analyzers.
const PLACEHOLDER_CONFIDENCE: f64 = 0.3;
/// Recursion cap for the deep-search strategy.
const DEEP_SEARCH_MAX_DEPTH: usize = 8;

/// Read-only view of the deal's job state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub deal_id: String,
    pub target: String,
    pub state: Value,
}

impl JobState {
    pub fn new(deal_id: impl Into<String>, target: impl Into<String>, state: Value) -> Self {
        Self {
            deal_id: deal_id.into(),
            target: target.into(),
            state,
        }
    }
}

// --- FindingLocator strategies ---

pub trait FindingLocator: Send + Sync {
    fn location(&self) -> SourceLocation;
    fn locate(&self, job: &JobState, analyzer_id: &str) -> Option<Value>;
}

/// `state.analyses[analyzer_id]`
struct PrimarySlot;

impl FindingLocator for PrimarySlot {
    fn location(&self) -> SourceLocation {
        SourceLocation::PrimarySlot
    }

    fn locate(&self, job: &JobState, analyzer_id: &str) -> Option<Value> {
        job.state.get("analyses")?.get(analyzer_id).cloned()
    }
}

/// `state.targets[target][analyzer_id]`
struct TargetNested;

impl FindingLocator for TargetNested {
    fn location(&self) -> SourceLocation {
        SourceLocation::TargetNested
    }

    fn locate(&self, job: &JobState, analyzer_id: &str) -> Option<Value> {
        job.state
            .get("targets")?
            .get(&job.target)?
            .get(analyzer_id)
            .cloned()
    }
}

/// Ordered run history: `state.outputs[] = {analyzer, result|output|data}`.
/// Later entries win over earlier ones.
struct LegacyOutputArray;

impl FindingLocator for LegacyOutputArray {
    fn location(&self) -> SourceLocation {
        SourceLocation::LegacyOutputArray
    }

    fn locate(&self, job: &JobState, analyzer_id: &str) -> Option<Value> {
        let outputs = job.state.get("outputs")?.as_array()?;
        outputs
            .iter()
            .rev()
            .find(|entry| {
                entry
                    .get("analyzer")
                    .and_then(Value::as_str)
                    .is_some_and(|a| a == analyzer_id)
            })
            .map(|entry| {
                entry
                    .get("result")
                    .or_else(|| entry.get("output"))
                    .or_else(|| entry.get("data"))
                    .cloned()
                    .unwrap_or_else(|| entry.clone())
            })
    }
}

/// Root-level keys like `{analyzer_id}_result` left behind by older runs.
struct ScatteredKeys;

impl FindingLocator for ScatteredKeys {
    fn location(&self) -> SourceLocation {
        SourceLocation::ScatteredKeys
    }

    fn locate(&self, job: &JobState, analyzer_id: &str) -> Option<Value> {
        for suffix in ["_result", "_output", "_analysis"] {
            let key = format!("{analyzer_id}{suffix}");
            if let Some(v) = job.state.get(&key) {
                return Some(v.clone());
            }
        }
        None
    }
}

/// Best-effort recursive search for an object tagged with the analyzer id,
/// or keyed by it anywhere in the tree. Depth-limited.
struct DeepSearch;

impl FindingLocator for DeepSearch {
    fn location(&self) -> SourceLocation {
        SourceLocation::DeepSearch
    }

    fn locate(&self, job: &JobState, analyzer_id: &str) -> Option<Value> {
        deep_search(&job.state, analyzer_id, 0)
    }
}

fn deep_search(value: &Value, analyzer_id: &str, depth: usize) -> Option<Value> {
    if depth > DEEP_SEARCH_MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            let tagged = map
                .get("analyzer_id")
                .or_else(|| map.get("analyzer"))
                .and_then(Value::as_str)
                .is_some_and(|a| a == analyzer_id);
            if tagged {
                return Some(value.clone());
            }
            if let Some(v) = map.get(analyzer_id) {
                return Some(v.clone());
            }
            map.values()
                .find_map(|v| deep_search(v, analyzer_id, depth + 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|v| deep_search(v, analyzer_id, depth + 1)),
        _ => None,
    }
}

// --- Collector ---

pub struct Collector {
    locators: Vec<Box<dyn FindingLocator>>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        Self {
            locators: vec![
                Box::new(PrimarySlot),
                Box::new(TargetNested),
                Box::new(LegacyOutputArray),
                Box::new(ScatteredKeys),
                Box::new(DeepSearch),
            ],
        }
    }

    /// Collect at most one Finding per expected analyzer id.
    ///
    /// Missing optional analyzers are omitted with a log entry; missing
    /// critical analyzers get a low-confidence placeholder so downstream
    /// stages always see the complete roster. Returns the findings plus one
    /// audit entry per degradation.
    pub fn collect(
        &self,
        job: &JobState,
        config: &ConsolidationConfig,
    ) -> (Vec<Finding>, Vec<String>) {
        let mut findings = Vec::new();
        let mut degradations = Vec::new();

        for analyzer_id in &config.expected_analyzers {
            let located = self
                .locators
                .iter()
                .find_map(|loc| loc.locate(job, analyzer_id).map(|v| (loc.location(), v)));

            match located {
                Some((location, payload)) => {
                    info!(analyzer = analyzer_id.as_str(), %location, "Analyzer output found");
                    findings.push(make_finding(analyzer_id, payload, location));
                }
                None if config.critical_analyzers.contains(analyzer_id) => {
                    warn!(
                        analyzer = analyzer_id.as_str(),
                        "Critical analyzer missing, inserting placeholder"
                    );
                    degradations.push(format!(
                        "critical analyzer '{analyzer_id}' missing; placeholder inserted"
                    ));
                    findings.push(placeholder_finding(analyzer_id));
                }
                None => {
                    warn!(analyzer = analyzer_id.as_str(), "Optional analyzer missing, omitted");
                    degradations.push(format!("analyzer '{analyzer_id}' missing; omitted"));
                }
            }
        }

        (findings, degradations)
    }
}

fn make_finding(analyzer_id: &str, payload: Value, location: SourceLocation) -> Finding {
    let raw_confidence = payload
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_RAW_CONFIDENCE);

    let extracted_at = payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Finding {
        id: Uuid::new_v4(),
        analyzer_id: analyzer_id.to_string(),
        payload,
        raw_confidence,
        source_location: location,
        extracted_at,
        placeholder: false,
        grounding_coverage: 1.0,
        hallucination_warnings: vec![],
    }
}

fn placeholder_finding(analyzer_id: &str) -> Finding {
    Finding {
        id: Uuid::new_v4(),
        analyzer_id: analyzer_id.to_string(),
        payload: serde_json::json!({
            "status": "missing",
            "summary": format!("{analyzer_id} produced no output for this run"),
        }),
        raw_confidence: PLACEHOLDER_CONFIDENCE,
        source_location: SourceLocation::Placeholder,
        extracted_at: Utc::now(),
        placeholder: true,
        grounding_coverage: 1.0,
        hallucination_warnings: vec![],
    }
}
