//! Bounded self-correction loop for a failing domain
//!
//! validate -> targeted re-extract -> merge -> validate, at most
//! `max_attempts` re-extractions; then (or on cancellation) an escalation
//! record hands the domain to human review.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{
    AuditAction, AuditEvent, Domain, EscalationRecord, Flag, FlagCategory, FlagSeverity,
    FlagSource, PipelineConfig, ReviewPriority,
};
use crate::service::domain_pass::{DomainAttempt, DomainPass};
use crate::service::extraction::{ExtractionCollaborator, ReextractionRequest};
use crate::store::ValidationStore;

const RETRY_ACTOR: &str = "retry_controller";

/// Final state of a domain once the loop stops
#[derive(Debug, Clone)]
pub struct SettledDomain {
    pub attempt: DomainAttempt,
    /// Number of re-extractions performed
    pub attempts: u32,
    pub escalation: Option<EscalationRecord>,
    /// Warnings about degraded re-extraction
    pub notes: Vec<Flag>,
}

pub struct RetryController {
    pass: Arc<DomainPass>,
    extractor: Arc<dyn ExtractionCollaborator>,
    store: Arc<ValidationStore>,
    max_attempts: u32,
    extraction_timeout: Duration,
}

impl RetryController {
    pub fn new(
        pass: Arc<DomainPass>,
        extractor: Arc<dyn ExtractionCollaborator>,
        store: Arc<ValidationStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            pass,
            extractor,
            store,
            max_attempts: config.max_retry_attempts,
            extraction_timeout: config.extraction_timeout(),
        }
    }

    pub fn pass(&self) -> &Arc<DomainPass> {
        &self.pass
    }

    /// Run the loop until the domain passes, the budget is spent or `cancel` is set
    pub async fn settle(&self, domain: Domain, cancel: &AtomicBool) -> SettledDomain {
        let mut attempts = 0u32;
        let mut notes = Vec::new();

        loop {
            let attempt = self.pass.run(domain).await;
            self.store
                .audit()
                .append(
                    AuditEvent::new(AuditAction::DomainAttempt, RETRY_ACTOR)
                        .domain(domain)
                        .details(serde_json::json!({
                            "attempt": attempts + 1,
                            "completeness_score": attempt.result.completeness_score,
                            "requires_rerun": attempt.result.requires_rerun,
                            "issues": attempt.result.issues,
                        })),
                )
                .await;

            if attempt.passed() {
                tracing::info!(domain = %domain, attempts = attempts, "Domain passed validation");
                return SettledDomain {
                    attempt,
                    attempts,
                    escalation: None,
                    notes,
                };
            }

            let cancelled = cancel.load(Ordering::SeqCst);
            if cancelled || attempts >= self.max_attempts {
                let escalation = self.escalate(&attempt, attempts, cancelled).await;
                return SettledDomain {
                    attempt,
                    attempts,
                    escalation: Some(escalation),
                    notes,
                };
            }

            attempts += 1;
            let request = ReextractionRequest {
                domain,
                attempt: attempts,
                guidance: attempt.result.rerun_guidance.clone().unwrap_or_default(),
            };
            self.store
                .audit()
                .append(
                    AuditEvent::new(AuditAction::ReextractionRequested, RETRY_ACTOR)
                        .domain(domain)
                        .details(serde_json::to_value(&request).unwrap_or_default()),
                )
                .await;

            let batch = match tokio::time::timeout(
                self.extraction_timeout,
                self.extractor.reextract(&request),
            )
            .await
            {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    tracing::warn!(domain = %domain, attempt = attempts, error = %e, "Re-extraction failed, continuing with existing facts");
                    notes.push(degraded_note(&format!("Re-extraction attempt {} failed: {}", attempts, e)));
                    Vec::new()
                }
                Err(_) => {
                    let err = PipelineError::ExternalCapabilityTimeout(format!(
                        "re-extraction of {} (attempt {})",
                        domain, attempts
                    ));
                    tracing::warn!(domain = %domain, attempt = attempts, error = %err, "Re-extraction timed out, continuing with existing facts");
                    notes.push(degraded_note(&err.to_string()));
                    Vec::new()
                }
            };

            let batch: Vec<_> = batch.into_iter().filter(|f| f.domain == domain).collect();
            let outcome = self.store.merge_batch(batch, RETRY_ACTOR).await;
            tracing::info!(
                domain = %domain,
                attempt = attempts,
                added = outcome.added.len(),
                duplicates = outcome.duplicates,
                "Re-extracted facts merged"
            );
        }
    }

    async fn escalate(&self, attempt: &DomainAttempt, attempts: u32, cancelled: bool) -> EscalationRecord {
        let domain = attempt.domain;
        let mut remaining_issues = attempt.result.issues.clone();
        let mut suggested_actions = Vec::new();
        for category in attempt.categories.iter().filter(|c| !c.is_complete) {
            if !category.missing_items.is_empty() {
                remaining_issues.push(format!(
                    "Missing in '{}': {}",
                    category.category,
                    category.missing_items.join(", ")
                ));
            }
            suggested_actions.push(format!(
                "Manually enumerate '{}' from the source documents",
                category.category
            ));
        }
        if attempt.result.checks.iter().any(|c| !c.is_consistent) {
            suggested_actions.push("Reconcile stated totals with the itemized facts".to_string());
        }
        suggested_actions.push("Request additional source documents covering the gaps".to_string());

        let record = EscalationRecord {
            id: Uuid::new_v4(),
            domain,
            attempts,
            remaining_issues,
            suggested_actions,
            priority: ReviewPriority::High,
            cancelled,
            created_at: Utc::now(),
        };

        let reason = if cancelled {
            format!("retry loop for {} cancelled after {} attempts", domain, attempts)
        } else {
            PipelineError::RetryBudgetExhausted { domain, attempts }.to_string()
        };
        tracing::warn!(
            domain = %domain,
            attempts = attempts,
            escalation_id = %record.id,
            issues = record.remaining_issues.len(),
            reason = %reason,
            "Domain escalated to human review"
        );

        self.store.record_escalation(record.clone(), RETRY_ACTOR).await;
        record
    }
}

fn degraded_note(message: &str) -> Flag {
    Flag::new(
        FlagSeverity::Warning,
        FlagCategory::Completeness,
        FlagSource::Domain,
        format!("Degraded validation: {}", message),
    )
}
