//! Adversarial review of domains that passed Layer 2
//!
//! Findings are speculative: they only ever become WARNING flags, weighted by
//! the finding's own confidence and a global discount.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{
    Domain, Fact, FactId, FindingKind, Flag, FlagCategory, FlagSeverity, FlagSource,
    PipelineConfig, ReviewFinding, ReviewFindings, ReviewMode, ReviewRequest,
};
use crate::service::reviewer::{ReviewOutcome, SemanticReviewer, review_as};
use crate::service::validator::Validator;

#[derive(Debug, Clone)]
pub struct AdversarialInput {
    pub domain: Domain,
    pub facts: Vec<Fact>,
    pub excerpt: String,
}

#[derive(Debug, Clone, Default)]
pub struct AdversarialResult {
    pub findings: Vec<ReviewFinding>,
    pub fact_flags: Vec<(FactId, Flag)>,
    pub domain_flags: Vec<Flag>,
}

pub struct AdversarialReviewer {
    reviewer: Arc<dyn SemanticReviewer>,
    timeout: Duration,
    weight: f64,
}

impl AdversarialReviewer {
    pub fn new(reviewer: Arc<dyn SemanticReviewer>, config: &PipelineConfig) -> Self {
        Self {
            reviewer,
            timeout: config.review_timeout(),
            weight: config.adversarial_weight,
        }
    }
}

fn describe_fact(fact: &Fact) -> String {
    format!(
        "[{}] {}/{}: {}",
        fact.id,
        fact.category,
        fact.item,
        serde_json::to_string(&fact.details).unwrap_or_default()
    )
}

fn finding_category(kind: FindingKind) -> FlagCategory {
    match kind {
        FindingKind::MissingData | FindingKind::CoverageGap => FlagCategory::Completeness,
        FindingKind::Inconsistency | FindingKind::SuspiciousValue => FlagCategory::Consistency,
        FindingKind::EvidenceQuality => FlagCategory::Evidence,
    }
}

#[async_trait]
impl Validator for AdversarialReviewer {
    type Input = AdversarialInput;
    type Output = AdversarialResult;

    async fn validate(&self, input: AdversarialInput) -> AdversarialResult {
        let AdversarialInput {
            domain,
            facts,
            excerpt,
        } = input;

        let request = ReviewRequest {
            mode: ReviewMode::Adversarial,
            domain: Some(domain),
            category: None,
            excerpt,
            extracted_items: facts.iter().map(describe_fact).collect(),
            checklist: vec![
                "Values that look implausible for an organization of this size".to_string(),
                "Items the excerpt mentions but the facts omit".to_string(),
                "Quotes that do not support the value they are attached to".to_string(),
            ],
        };

        let mut result = AdversarialResult::default();
        match review_as::<ReviewFindings>(self.reviewer.as_ref(), &request, self.timeout).await {
            ReviewOutcome::Signal(found) => {
                for finding in found.findings {
                    let confidence = finding.confidence.clamp(0.0, 1.0);
                    let flag = Flag::new(
                        FlagSeverity::Warning,
                        finding_category(finding.kind),
                        FlagSource::Adversarial,
                        format!("Adversarial review: {}", finding.description),
                    )
                    .with_weight(self.weight * confidence);

                    match finding
                        .fact_id
                        .as_ref()
                        .filter(|id| facts.iter().any(|f| &f.id == *id))
                    {
                        Some(id) => result.fact_flags.push((id.clone(), flag)),
                        None => result.domain_flags.push(flag),
                    }
                    result.findings.push(finding);
                }
            }
            ReviewOutcome::NoSignal => {}
            ReviewOutcome::Degraded(reason) => {
                result.domain_flags.push(Flag::new(
                    FlagSeverity::Warning,
                    FlagCategory::Completeness,
                    FlagSource::Adversarial,
                    format!("Adversarial review unavailable ({}): skipped", reason),
                ));
            }
        }

        tracing::info!(
            domain = %domain,
            findings = result.findings.len(),
            fact_flags = result.fact_flags.len(),
            "Adversarial review completed"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{ScriptedReviewer, SlowReviewer, create_test_fact, details};
    use serde_json::json;

    fn create_test_input() -> AdversarialInput {
        AdversarialInput {
            domain: Domain::Organization,
            facts: vec![Fact::from_new(create_test_fact(
                Domain::Organization,
                "teams",
                "Service desk",
                details(&[("headcount", json!(400))]),
            ))],
            excerpt: String::new(),
        }
    }

    #[tokio::test]
    async fn test_findings_become_low_weight_warnings() {
        let input = create_test_input();
        let fact_id = input.facts[0].id.clone();
        let reviewer = Arc::new(ScriptedReviewer::new().with_adversarial(json!({
            "findings": [
                { "kind": "suspicious_value", "description": "400 service desk staff", "confidence": 0.6, "fact_id": fact_id },
                { "kind": "coverage_gap", "description": "No contractors listed", "confidence": 0.4 },
                { "kind": "evidence_quality", "description": "Unknown fact", "confidence": 1.0, "fact_id": "missing" }
            ]
        })));
        let result = AdversarialReviewer::new(reviewer, &PipelineConfig::default())
            .validate(input)
            .await;

        assert_eq!(result.findings.len(), 3);
        assert_eq!(result.fact_flags.len(), 1);
        assert_eq!(result.domain_flags.len(), 2);

        let (id, flag) = &result.fact_flags[0];
        assert_eq!(id, &fact_id);
        assert_eq!(flag.severity, FlagSeverity::Warning);
        assert_eq!(flag.category, FlagCategory::Consistency);
        assert!((flag.weight - 0.3).abs() < 1e-9);
        assert_eq!(result.domain_flags[0].category, FlagCategory::Completeness);
    }

    #[tokio::test]
    async fn test_timeout_adds_single_warning() {
        let config = PipelineConfig {
            review_timeout_ms: 10,
            ..Default::default()
        };
        let reviewer = Arc::new(SlowReviewer::new(Duration::from_millis(200)));
        let result = AdversarialReviewer::new(reviewer, &config)
            .validate(create_test_input())
            .await;
        assert!(result.findings.is_empty());
        assert_eq!(result.domain_flags.len(), 1);
        assert_eq!(result.domain_flags[0].severity, FlagSeverity::Warning);
    }
}
