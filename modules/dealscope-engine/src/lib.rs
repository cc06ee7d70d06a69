pub mod assembler;
pub mod cache;
pub mod claims;
pub mod collector;
pub mod confidence;
pub mod conflicts;
pub mod corpus;
pub mod dedup;
pub mod grounding;
pub mod pipeline;
pub mod similarity;

pub use cache::VerificationCache;
pub use collector::JobState;
pub use corpus::{SourceCorpus, SourceDocument};
pub use pipeline::{Consolidator, RunSummary, Stage};
pub use similarity::{EmbeddingIndex, Neighbor, SimilarityIndex};
