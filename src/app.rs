//! Application state and service initialization
//!
//! Builds the per-run stores and the service graph once, so handlers only
//! receive an `AppState`.

use std::sync::Arc;

use url::Url;

use crate::model::{Config, PipelineConfig};
use crate::service::{
    CheckpointRegistry, CorrectionPipeline, ExtractionCollaborator, HttpExtractionClient,
    HttpSemanticReviewer, NoSignalReviewer, NullExtractor, Orchestrator, ReviewService,
    SemanticReviewer,
};
use crate::store::{AuditStore, CorrectionStore, ValidationStore};

/// Application state containing all services and shared stores
pub struct AppState {
    pub store: Arc<ValidationStore>,
    pub corrections: Arc<CorrectionStore>,
    pub orchestrator: Orchestrator,
    pub review: ReviewService,
    pub correction: CorrectionPipeline,
    /// Whether a remote semantic reviewer is configured
    pub semantic_review_enabled: bool,
    /// Whether a remote extraction service is configured
    pub extraction_enabled: bool,
}

impl AppState {
    /// Validate configuration and build the service dependency graph
    ///
    /// Without collaborator URLs the pipeline runs deterministic-only.
    pub fn new(config: Config) -> Result<Self, AppError> {
        validate_pipeline(&config.pipeline)?;

        let reviewer: Arc<dyn SemanticReviewer> = match &config.semantic_review_url {
            Some(url) => Arc::new(HttpSemanticReviewer::new(parse_url(url)?.as_str())),
            None => {
                tracing::info!("No semantic reviewer configured, running deterministic checks only");
                Arc::new(NoSignalReviewer)
            }
        };
        let extractor: Arc<dyn ExtractionCollaborator> = match &config.extraction_url {
            Some(url) => Arc::new(HttpExtractionClient::new(parse_url(url)?.as_str())),
            None => {
                tracing::info!("No extraction service configured, re-extraction returns empty batches");
                Arc::new(NullExtractor)
            }
        };

        let registry = Arc::new(CheckpointRegistry::with_overrides(config.checkpoints));
        let store = Arc::new(ValidationStore::new(Arc::new(AuditStore::new())));
        let corrections = Arc::new(CorrectionStore::new());

        let orchestrator = Orchestrator::new(
            store.clone(),
            registry.clone(),
            reviewer,
            extractor,
            &config.pipeline,
        );
        let review = ReviewService::new(store.clone(), &config.pipeline);
        let correction =
            CorrectionPipeline::new(store.clone(), corrections.clone(), registry, &config.pipeline);

        Ok(Self {
            store,
            corrections,
            orchestrator,
            review,
            correction,
            semantic_review_enabled: config.semantic_review_url.is_some(),
            extraction_enabled: config.extraction_url.is_some(),
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, AppError> {
    Url::parse(raw).map_err(|e| AppError::InvalidConfig(format!("invalid URL '{}': {}", raw, e)))
}

fn validate_pipeline(config: &PipelineConfig) -> Result<(), AppError> {
    if config.worker_pool_size == 0 {
        return Err(AppError::InvalidConfig("worker_pool_size must be at least 1".to_string()));
    }
    if config.evidence_partial_threshold > config.evidence_verified_threshold {
        return Err(AppError::InvalidConfig(
            "evidence_partial_threshold exceeds evidence_verified_threshold".to_string(),
        ));
    }
    if config.agreement_ratio > config.agreement_warning_ratio {
        return Err(AppError::InvalidConfig(
            "agreement_ratio exceeds agreement_warning_ratio".to_string(),
        ));
    }
    Ok(())
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_deterministic_state() {
        let state = AppState::new(Config::default()).unwrap();
        assert!(!state.semantic_review_enabled);
        assert!(!state.extraction_enabled);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.pipeline.worker_pool_size = 0;
        assert!(matches!(AppState::new(config), Err(AppError::InvalidConfig(_))));

        let config = Config {
            semantic_review_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(matches!(AppState::new(config), Err(AppError::InvalidConfig(_))));
    }
}
