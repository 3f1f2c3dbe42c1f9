//! Error taxonomy shared by the pipeline services

use crate::model::Domain;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Referenced fact or domain does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Semantic reviewer or extraction collaborator did not answer in time
    #[error("External capability timed out: {0}")]
    ExternalCapabilityTimeout(String),

    /// Terminal state of the retry loop, reported through an escalation record
    #[error("Retry budget exhausted for {domain} after {attempts} attempts")]
    RetryBudgetExhausted { domain: Domain, attempts: u32 },

    /// Optimistic version check kept failing
    #[error("Validation conflict: {0}")]
    ValidationConflict(String),

    /// Payload is structurally unusable
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PipelineError::NotFound(id),
            StoreError::VersionConflict { .. } => PipelineError::ValidationConflict(err.to_string()),
            StoreError::InvalidTransition { .. } => PipelineError::InvalidTransition(err.to_string()),
        }
    }
}
