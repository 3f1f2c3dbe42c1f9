//! Human review operations: queue, confirm, reject, manual flags

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{
    AuditAction, Domain, Fact, Flag, FlagCategory, FlagSeverity, FlagSource, PipelineConfig,
    ValidationState, ValidationStatus,
};
use crate::service::confidence::aggregate_confidence;
use crate::store::{StoreError, ValidationStore};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    pub domain: Option<Domain>,
    pub min_severity: Option<FlagSeverity>,
}

/// One fact awaiting (or open to) human attention
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueueItem {
    pub fact: Fact,
    pub state: ValidationState,
    pub effective_confidence: f64,
    pub max_severity: Option<FlagSeverity>,
    pub open_flags: usize,
}

pub struct ReviewService {
    store: Arc<ValidationStore>,
    conflict_retries: u32,
}

impl ReviewService {
    pub fn new(store: Arc<ValidationStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            conflict_retries: config.version_conflict_retries,
        }
    }

    /// Non-terminal facts that need a human, most severe first
    ///
    /// A fact is queued when it is HUMAN_PENDING or carries an open flag of at
    /// least `min_severity`.
    pub async fn queue(&self, filter: &QueueFilter) -> Vec<QueueItem> {
        let states = self.store.states().await;
        let mut items = Vec::new();
        for state in states.into_iter().filter(|s| !s.status.is_terminal()) {
            let Ok(fact) = self.store.fact(&state.fact_id).await else {
                continue;
            };
            if filter.domain.is_some_and(|d| d != fact.value.domain) {
                continue;
            }
            let max_severity = state.max_open_severity();
            let queued = match filter.min_severity {
                Some(min) => max_severity.is_some_and(|s| s >= min),
                None => state.status == ValidationStatus::HumanPending || max_severity.is_some(),
            };
            if !queued {
                continue;
            }
            items.push(QueueItem {
                effective_confidence: state.effective_confidence(),
                max_severity,
                open_flags: state.open_flags().count(),
                fact: fact.value,
                state,
            });
        }

        items.sort_by(|a, b| {
            b.max_severity
                .cmp(&a.max_severity)
                .then_with(|| {
                    a.effective_confidence
                        .partial_cmp(&b.effective_confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.fact.id.cmp(&b.fact.id))
        });
        items
    }

    pub async fn confirm(
        &self,
        fact_id: &str,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ValidationState, PipelineError> {
        self.decide(fact_id, ValidationStatus::HumanConfirmed, AuditAction::HumanConfirmed, reviewer, notes)
            .await
    }

    pub async fn reject(
        &self,
        fact_id: &str,
        reviewer: &str,
        reason: String,
    ) -> Result<ValidationState, PipelineError> {
        self.decide(fact_id, ValidationStatus::HumanRejected, AuditAction::HumanRejected, reviewer, Some(reason))
            .await
    }

    async fn decide(
        &self,
        fact_id: &str,
        status: ValidationStatus,
        action: AuditAction,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ValidationState, PipelineError> {
        let state = self
            .store
            .update_state(
                fact_id,
                action,
                reviewer,
                serde_json::json!({ "notes": notes }),
                self.conflict_retries,
                |state| {
                    if !state.status.can_transition_to(status) {
                        return Err(StoreError::InvalidTransition {
                            fact_id: state.fact_id.clone(),
                            from: state.status,
                            to: status,
                        });
                    }
                    state.status = status;
                    state.reviewed_by = Some(reviewer.to_string());
                    state.reviewed_at = Some(Utc::now());
                    state.review_notes = notes.clone();
                    Ok(())
                },
            )
            .await?;
        tracing::info!(fact_id = %fact_id, status = ?status, reviewer = %reviewer, "Human decision recorded");
        Ok(state)
    }

    /// Attach a reviewer's flag; ERROR or worse sends a non-terminal fact back to HUMAN_PENDING
    pub async fn add_manual_flag(
        &self,
        fact_id: &str,
        severity: FlagSeverity,
        message: &str,
        author: &str,
    ) -> Result<Flag, PipelineError> {
        if message.trim().is_empty() {
            return Err(PipelineError::MalformedInput("flag message is empty".to_string()));
        }
        let flag = Flag::new(
            severity,
            FlagCategory::Manual,
            FlagSource::Manual,
            message.trim(),
        );
        self.store
            .update_state(
                fact_id,
                AuditAction::FlagAdded,
                author,
                serde_json::to_value(&flag).unwrap_or_default(),
                self.conflict_retries,
                |state| {
                    state.flags.push(flag.clone());
                    state.ai_confidence =
                        aggregate_confidence(state.evidence.as_ref(), &state.flags);
                    if severity >= FlagSeverity::Error && !state.status.is_terminal() {
                        state.status = ValidationStatus::HumanPending;
                    }
                    Ok(())
                },
            )
            .await?;
        tracing::info!(fact_id = %fact_id, severity = ?severity, author = %author, "Manual flag added");
        Ok(flag)
    }

    /// Mark an existing flag resolved; flags are never removed
    pub async fn resolve_flag(
        &self,
        fact_id: &str,
        flag_id: Uuid,
        resolver: &str,
    ) -> Result<ValidationState, PipelineError> {
        let state = self
            .store
            .update_state(
                fact_id,
                AuditAction::FlagResolved,
                resolver,
                serde_json::json!({ "flag_id": flag_id }),
                self.conflict_retries,
                |state| {
                    let flag = state
                        .flags
                        .iter_mut()
                        .find(|f| f.id == flag_id)
                        .ok_or_else(|| StoreError::NotFound(format!("flag {}", flag_id)))?;
                    flag.resolve(resolver);
                    state.ai_confidence =
                        aggregate_confidence(state.evidence.as_ref(), &state.flags);
                    Ok(())
                },
            )
            .await?;
        Ok(state)
    }
}
