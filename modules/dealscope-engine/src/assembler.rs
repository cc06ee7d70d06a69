//! Output Assembler — builds the final immutable consolidated record and
//! persists an audit snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use dealscope_common::{
    Claim, Conflict, ConfidenceScore, ConsolidatedOutput, ConsolidationConfig, DealscopeError,
    DomainSection, ExecutiveSummary, Finding, HallucinationFlag, ValidationSummary,
    ValuationRange,
};

use crate::conflicts::valuation_values;
use crate::dedup::insight_text;

const RISK_KEYWORDS: &[&str] = &[
    "risk",
    "litigation",
    "exposure",
    "decline",
    "churn",
    "threat",
    "violation",
    "impairment",
];

const OPPORTUNITY_KEYWORDS: &[&str] = &[
    "growth",
    "synergy",
    "opportunity",
    "upside",
    "expansion",
    "tailwind",
];

const TOP_N_SUMMARY_ITEMS: usize = 5;

/// Analyzer-id keyword → domain section routing. First match wins; analyzers
/// matching nothing land in external validation.
const SECTION_ROUTES: &[(&str, &[&str])] = &[
    ("financial", &["financial", "valuation", "dcf", "lbo", "comps"]),
    ("legal", &["legal", "compliance", "regulatory", "contract"]),
    ("market", &["market", "commercial", "competitive", "customer"]),
    ("integration_tax", &["integration", "tax", "synergy"]),
    ("risk_macro", &["risk", "macro", "scenario"]),
    ("external_validation", &["external", "validation", "benchmark"]),
];

pub struct AssembleContext<'a> {
    pub run_id: Uuid,
    pub deal_id: &'a str,
    pub target: &'a str,
    pub started_at: DateTime<Utc>,
    pub findings: &'a [Finding],
    pub conflicts: Vec<Conflict>,
    pub flags: Vec<HallucinationFlag>,
    pub breakdown: Vec<ConfidenceScore>,
    pub claims: Vec<Claim>,
    pub degradations: Vec<String>,
    pub overall_confidence: f64,
}

pub struct Assembler<'a> {
    config: &'a ConsolidationConfig,
}

impl<'a> Assembler<'a> {
    pub fn new(config: &'a ConsolidationConfig) -> Self {
        Self { config }
    }

    /// Build the consolidated record. Every domain section is present even
    /// when no analyzer covered it.
    pub fn assemble(&self, ctx: AssembleContext) -> ConsolidatedOutput {
        let mut sections: std::collections::BTreeMap<&str, DomainSection> = SECTION_ROUTES
            .iter()
            .map(|(name, _)| (*name, DomainSection::default()))
            .collect();

        for finding in ctx.findings {
            let section = sections
                .get_mut(section_for(&finding.analyzer_id))
                .expect("section routes cover every name");
            section.analyzer_ids.push(finding.analyzer_id.clone());
            if !finding.placeholder {
                section.highlights.push(insight_text(finding));
            }
            if let serde_json::Value::Object(map) = &mut section.details {
                map.insert(finding.analyzer_id.clone(), finding.payload.clone());
            }
        }

        let executive_summary = build_executive_summary(ctx.findings);

        ConsolidatedOutput {
            run_id: ctx.run_id,
            deal_id: ctx.deal_id.to_string(),
            target: ctx.target.to_string(),
            started_at: ctx.started_at,
            completed_at: Utc::now(),
            executive_summary,
            financial: sections.remove("financial").unwrap_or_default(),
            legal: sections.remove("legal").unwrap_or_default(),
            market: sections.remove("market").unwrap_or_default(),
            integration_tax: sections.remove("integration_tax").unwrap_or_default(),
            risk_macro: sections.remove("risk_macro").unwrap_or_default(),
            external_validation: sections.remove("external_validation").unwrap_or_default(),
            validation_summary: ValidationSummary {
                conflicts: ctx.conflicts,
                hallucination_flags: ctx.flags,
                confidence_breakdown: ctx.breakdown,
                verified_claims: ctx.claims,
                degradations: ctx.degradations,
            },
            overall_confidence: ctx.overall_confidence,
        }
    }

    /// Persist a timestamped snapshot. Failure is logged and reported to the
    /// caller, who swallows it — persistence never fails a run.
    pub async fn persist_snapshot(
        &self,
        output: &ConsolidatedOutput,
    ) -> Result<PathBuf, DealscopeError> {
        let path = PathBuf::from(render_snapshot_path(
            &self.config.snapshot_path_template,
            &output.deal_id,
            &output.target,
            output.completed_at,
        ));

        let json = serde_json::to_string_pretty(output)
            .map_err(|e| DealscopeError::PersistenceFailure(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DealscopeError::PersistenceFailure(e.to_string()))?;
        }
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| DealscopeError::PersistenceFailure(e.to_string()))?;

        info!(path = %path.display(), "Snapshot persisted");
        Ok(path)
    }

    /// Reload a persisted snapshot. Round-trips structurally.
    pub async fn load_snapshot(path: &Path) -> Result<ConsolidatedOutput, DealscopeError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DealscopeError::PersistenceFailure(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| DealscopeError::PersistenceFailure(e.to_string()))
    }
}

fn section_for(analyzer_id: &str) -> &'static str {
    let lower = analyzer_id.to_lowercase();
    for (name, keywords) in SECTION_ROUTES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return name;
        }
    }
    "external_validation"
}

fn build_executive_summary(findings: &[Finding]) -> ExecutiveSummary {
    let mut top_risks = Vec::new();
    let mut top_opportunities = Vec::new();

    for finding in findings {
        if finding.placeholder {
            continue;
        }
        let text = insight_text(finding);
        let lower = text.to_lowercase();
        if top_risks.len() < TOP_N_SUMMARY_ITEMS
            && RISK_KEYWORDS.iter().any(|k| lower.contains(k))
        {
            top_risks.push(text.clone());
        } else if top_opportunities.len() < TOP_N_SUMMARY_ITEMS
            && OPPORTUNITY_KEYWORDS.iter().any(|k| lower.contains(k))
        {
            top_opportunities.push(text);
        }
    }

    let values = valuation_values(findings);
    let valuation_range = match (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) {
        (Some(low), Some(high)) => Some(ValuationRange { low, high }),
        _ => None,
    };

    ExecutiveSummary {
        top_risks,
        top_opportunities,
        valuation_range,
    }
}

fn render_snapshot_path(
    template: &str,
    deal_id: &str,
    target: &str,
    completed_at: DateTime<Utc>,
) -> String {
    template
        .replace("{deal_id}", deal_id)
        .replace("{target}", target)
        .replace("{timestamp}", &completed_at.format("%Y%m%dT%H%M%SZ").to_string())
}
