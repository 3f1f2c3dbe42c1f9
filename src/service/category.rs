//! Layer 1: per-category completeness
//!
//! Deterministic pre-checks run first. The semantic reviewer is consulted only
//! when they fail, and can confirm completeness of a category whose items lack
//! required fields, but never of a category below its minimum item count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{
    CategoryValidationResult, Checkpoint, CompletenessVerdict, Fact, Flag, FlagCategory,
    FlagSeverity, FlagSource, PipelineConfig, Recommendation, ReviewMode, ReviewRequest,
};
use crate::service::reviewer::{ReviewOutcome, SemanticReviewer, review_as};
use crate::service::validator::Validator;

/// Facts of one (domain, category) with the checkpoint they are held against
#[derive(Debug, Clone)]
pub struct CategoryInput {
    pub checkpoint: Checkpoint,
    pub facts: Vec<Fact>,
    pub excerpt: String,
}

pub struct CategoryValidator {
    reviewer: Arc<dyn SemanticReviewer>,
    timeout: Duration,
    retryable_missing_items: usize,
}

impl CategoryValidator {
    pub fn new(reviewer: Arc<dyn SemanticReviewer>, config: &PipelineConfig) -> Self {
        Self {
            reviewer,
            timeout: config.review_timeout(),
            retryable_missing_items: config.retryable_missing_items,
        }
    }
}

#[async_trait]
impl Validator for CategoryValidator {
    type Input = CategoryInput;
    type Output = CategoryValidationResult;

    async fn validate(&self, input: CategoryInput) -> CategoryValidationResult {
        let CategoryInput {
            checkpoint,
            facts,
            excerpt,
        } = input;
        let item_count = facts.len();
        let mut fact_flags = Vec::new();
        let mut flags = Vec::new();

        let mut missing_fields = Vec::new();
        for fact in &facts {
            for field in &checkpoint.required_fields {
                if !has_field(fact, field) {
                    missing_fields.push(format!("{}: {}", fact.item, field));
                    fact_flags.push((
                        fact.id.clone(),
                        Flag::new(
                            FlagSeverity::Warning,
                            FlagCategory::Completeness,
                            FlagSource::Category,
                            format!("Missing required field '{}'", field),
                        )
                        .with_suggestion(format!("Add '{}' from the source document", field)),
                    ));
                }
            }
        }

        if let Some(max) = checkpoint.max_items.filter(|max| item_count > *max) {
            flags.push(Flag::new(
                FlagSeverity::Warning,
                FlagCategory::Completeness,
                FlagSource::Category,
                format!(
                    "Category '{}' has {} items, more than the expected {}: possible duplicates",
                    checkpoint.category, item_count, max
                ),
            ));
        }

        let below_minimum = item_count < checkpoint.min_items;

        let mut result = CategoryValidationResult {
            domain: checkpoint.domain,
            category: checkpoint.category.clone(),
            item_count,
            is_complete: true,
            confidence: 1.0,
            missing_items: Vec::new(),
            recommendation: Recommendation::Pass,
            within_retry_bound: true,
            degraded: false,
            fact_flags,
            flags,
        };

        if !below_minimum && missing_fields.is_empty() {
            tracing::debug!(
                domain = %checkpoint.domain,
                category = %checkpoint.category,
                item_count = item_count,
                "Category passed deterministic checks"
            );
            return result;
        }

        let request = ReviewRequest {
            mode: ReviewMode::Completeness,
            domain: Some(checkpoint.domain),
            category: Some(checkpoint.category.clone()),
            excerpt,
            extracted_items: facts.iter().map(|f| f.item.clone()).collect(),
            checklist: build_checklist(&checkpoint),
        };

        let (is_complete, mut missing_items, confidence) =
            match review_as::<CompletenessVerdict>(self.reviewer.as_ref(), &request, self.timeout).await
            {
                ReviewOutcome::Signal(verdict) => (
                    verdict.is_complete && !below_minimum,
                    verdict
                        .missing_items
                        .into_iter()
                        .map(|i| i.trim().to_string())
                        .filter(|i| !i.is_empty())
                        .collect::<Vec<_>>(),
                    verdict.confidence.clamp(0.0, 1.0),
                ),
                ReviewOutcome::NoSignal => (false, Vec::new(), 0.5),
                ReviewOutcome::Degraded(reason) => {
                    result.degraded = true;
                    result.flags.push(Flag::new(
                        FlagSeverity::Warning,
                        FlagCategory::Completeness,
                        FlagSource::Category,
                        format!(
                            "Semantic review unavailable for '{}' ({}): degraded to deterministic checks",
                            checkpoint.category, reason
                        ),
                    ));
                    (false, Vec::new(), 0.5)
                }
            };

        if !is_complete {
            if below_minimum && missing_items.is_empty() {
                missing_items.push(checkpoint.category.clone());
            }
            for field in missing_fields {
                if !missing_items.contains(&field) {
                    missing_items.push(field);
                }
            }
        }

        result.is_complete = is_complete;
        result.confidence = confidence;
        result.recommendation = if is_complete {
            Recommendation::Pass
        } else {
            Recommendation::Retry
        };
        result.within_retry_bound = missing_items.len() <= self.retryable_missing_items;
        result.missing_items = missing_items;

        tracing::debug!(
            domain = %checkpoint.domain,
            category = %checkpoint.category,
            item_count = item_count,
            is_complete = result.is_complete,
            missing_items = result.missing_items.len(),
            degraded = result.degraded,
            "Category validated"
        );

        result
    }
}

pub(crate) fn has_field(fact: &Fact, field: &str) -> bool {
    match fact.details.get(field) {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn build_checklist(checkpoint: &Checkpoint) -> Vec<String> {
    let mut checklist = vec![format!(
        "At least {} {} item(s) are enumerated",
        checkpoint.min_items, checkpoint.category
    )];
    checklist.extend(
        checkpoint
            .required_fields
            .iter()
            .map(|f| format!("Every item states its {}", f)),
    );
    checklist
}
