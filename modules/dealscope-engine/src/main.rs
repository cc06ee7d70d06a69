use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dealscope_common::{ConsolidationConfig, GroundingDepth};
use dealscope_engine::{
    Consolidator, EmbeddingIndex, JobState, SourceCorpus, VerificationCache,
};
use reason_client::{Anthropic, OpenAiCompatible};

const REASONING_MODEL: &str = "claude-haiku-4-5-20251001";
const EMBEDDING_MODEL: &str = "voyage-3-large";
const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Consolidate due-diligence analyzer outputs for one transaction into a
/// single fact-checked, confidence-scored record.
#[derive(Parser, Debug)]
#[command(name = "dealscope", version)]
struct Args {
    /// Path to the job-state JSON file ({deal_id, target, state}).
    #[arg(long)]
    job_state: PathBuf,

    /// Source-document corpus root (subdirectories are categories).
    #[arg(long)]
    corpus: PathBuf,

    /// Expected analyzer ids (comma-separated).
    #[arg(long, value_delimiter = ',')]
    analyzers: Vec<String>,

    /// Critical analyzer ids that must appear downstream (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "")]
    critical: Vec<String>,

    /// Grounding depth: minimal, standard, or comprehensive.
    #[arg(long, default_value = "standard")]
    depth: String,

    /// Skip snapshot persistence.
    #[arg(long)]
    no_snapshot: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("dealscope_engine=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Dealscope consolidation starting...");

    let job_json = tokio::fs::read_to_string(&args.job_state)
        .await
        .with_context(|| format!("failed to read job state {}", args.job_state.display()))?;
    let job: JobState = serde_json::from_str(&job_json).context("invalid job-state JSON")?;

    let corpus = SourceCorpus::load_dir(&args.corpus).await?;
    info!(
        documents = corpus.document_count(),
        "Source corpus loaded"
    );

    let config = ConsolidationConfig::builder()
        .expected_analyzers(args.analyzers)
        .critical_analyzers(
            args.critical
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect(),
        )
        .grounding_depth(GroundingDepth::from_str_loose(&args.depth))
        .persist_snapshot(!args.no_snapshot)
        .build();

    let reasoner = Arc::new(Anthropic::from_env(REASONING_MODEL)?);

    // The similarity backend is optional; without an embedding key the
    // deduplicator silently uses the lexical fallback.
    let similarity: Option<Arc<dyn dealscope_engine::SimilarityIndex>> =
        match std::env::var("VOYAGE_API_KEY") {
            Ok(key) => {
                let embedder = Arc::new(
                    OpenAiCompatible::new(key, EMBEDDING_MODEL).with_base_url(VOYAGE_BASE_URL),
                );
                Some(Arc::new(EmbeddingIndex::new(embedder)))
            }
            Err(_) => {
                warn!("VOYAGE_API_KEY not set, using lexical dedup fallback");
                None
            }
        };

    let cache = Arc::new(VerificationCache::new());
    let consolidator = Consolidator::new(reasoner, similarity, cache, config)?;

    let (output, summary) = consolidator.run(&job, &corpus).await?;

    info!(
        run_id = %output.run_id,
        overall_confidence = output.overall_confidence,
        conflicts = output.validation_summary.conflicts.len(),
        hallucinations = output.validation_summary.hallucination_flags.len(),
        "Consolidation complete"
    );
    println!("{summary}");

    Ok(())
}
