pub mod types;
pub mod config;
pub mod error;
pub mod confidence;

pub use types::*;
pub use config::{ConfidenceWeights, ConsolidationConfig, GroundingDepth};
pub use error::DealscopeError;
pub use confidence::*;
