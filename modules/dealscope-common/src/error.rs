use thiserror::Error;

/// Error taxonomy for the consolidation pipeline.
///
/// Every class except `InternalComputation` recovers locally: the stage
/// degrades data quality, logs the cause, and records an audit entry.
/// `InternalComputation` is the only class that fails a run.
#[derive(Error, Debug)]
pub enum DealscopeError {
    #[error("Missing collaborator data: {0}")]
    MissingCollaboratorData(String),

    #[error("Verification failure: {0}")]
    VerificationFailure(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Clustering backend unavailable: {0}")]
    ClusteringBackendUnavailable(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal computation error: {0}")]
    InternalComputation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl DealscopeError {
    /// True only for the class that aborts a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DealscopeError::InternalComputation(_) | DealscopeError::Anyhow(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_internal_errors_are_fatal() {
        assert!(DealscopeError::InternalComputation("overflow".into()).is_fatal());
        assert!(!DealscopeError::MissingCollaboratorData("legal_analysis".into()).is_fatal());
        assert!(!DealscopeError::VerificationFailure("timeout".into()).is_fatal());
        assert!(!DealscopeError::MalformedResponse("not json".into()).is_fatal());
        assert!(!DealscopeError::ClusteringBackendUnavailable("no index".into()).is_fatal());
        assert!(!DealscopeError::PersistenceFailure("disk full".into()).is_fatal());
    }
}
