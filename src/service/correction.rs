//! Human correction pipeline
//!
//! A correction is atomic per fact: the fact, its state and the derived totals
//! it ripples into are replaced in one store write, guarded by the versions the
//! correction was computed from. A single re-validation pass may add flags.
//! Corrections never fail because of what they reveal downstream; they flag
//! instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{
    AuditAction, AuditEvent, Band, CorrectionRecord, CorrectionRequest, CorrectionResult, Fact,
    Flag, FlagCategory, FlagSeverity, FlagSource, PipelineConfig, RippleEffect, ValidationStatus,
    numeric_value,
};
use crate::service::category::has_field;
use crate::service::checkpoints::CheckpointRegistry;
use crate::service::confidence::aggregate_confidence;
use crate::service::derived::{
    RippleRule, TOTAL_HEADCOUNT, TOTAL_IT_COST, compute_derived, cost_per_head, ripple_rules_for,
};
use crate::service::evidence::EvidenceVerifier;
use crate::store::{
    CorrectionCommit, CorrectionStore, DerivedChange, DerivedDelta, StoreError, ValidationStore,
};

/// A ripple rule triggered by one corrected field
struct PlannedRipple {
    rule: &'static RippleRule,
    old_value: f64,
    new_value: f64,
}

struct Committed {
    record: CorrectionRecord,
    before: Fact,
    after: Fact,
    ripples: Vec<(PlannedRipple, DerivedChange)>,
}

pub struct CorrectionPipeline {
    store: Arc<ValidationStore>,
    corrections: Arc<CorrectionStore>,
    registry: Arc<CheckpointRegistry>,
    verifier: EvidenceVerifier,
    cost_per_head: Band,
}

impl CorrectionPipeline {
    pub fn new(
        store: Arc<ValidationStore>,
        corrections: Arc<CorrectionStore>,
        registry: Arc<CheckpointRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            corrections,
            registry,
            verifier: EvidenceVerifier::from_config(config),
            cost_per_head: config.cost_per_head,
        }
    }

    pub fn corrections(&self) -> &Arc<CorrectionStore> {
        &self.corrections
    }

    /// Apply a correction and return once it is durable
    pub async fn correct(
        &self,
        fact_id: &str,
        request: CorrectionRequest,
    ) -> Result<CorrectionResult, PipelineError> {
        let existing = self.store.fact(fact_id).await?.value;
        let domain = existing.domain;
        let author = request.author.trim().to_string();

        self.store
            .audit()
            .append(
                AuditEvent::new(AuditAction::CorrectionRequested, &author)
                    .fact(fact_id)
                    .domain(domain)
                    .details(serde_json::json!({
                        "fields": request.fields.keys().collect::<Vec<_>>(),
                        "reason": request.reason,
                        "new_evidence": request.new_evidence.is_some(),
                    })),
            )
            .await;

        let (matched, ignored_fields): (BTreeMap<String, serde_json::Value>, Vec<String>) = {
            let mut matched = BTreeMap::new();
            let mut ignored = Vec::new();
            for (field, value) in &request.fields {
                if existing.field_value(field).is_some() {
                    matched.insert(field.clone(), value.clone());
                } else {
                    ignored.push(field.clone());
                }
            }
            (matched, ignored)
        };
        if matched.is_empty() {
            return Err(PipelineError::MalformedInput(format!(
                "correction of {} names no correctable field (got: {})",
                fact_id,
                ignored_fields.join(", ")
            )));
        }

        let Committed {
            record,
            before,
            after,
            ripples,
        } = self.commit(fact_id, &matched, &request, &author).await?;

        self.corrections.append(record.clone()).await;
        self.store
            .audit()
            .append(
                AuditEvent::new(AuditAction::CorrectionRecorded, &author)
                    .fact(fact_id)
                    .domain(domain)
                    .details(serde_json::to_value(&record).unwrap_or_default()),
            )
            .await;

        let mut ripple_effects = Vec::new();
        for (planned, change) in ripples {
            let effect = self.ripple_effect(&before, planned, change).await;
            self.store
                .audit()
                .append(
                    AuditEvent::new(AuditAction::RippleApplied, &author)
                        .fact(fact_id)
                        .domain(domain)
                        .details(serde_json::to_value(&effect).unwrap_or_default()),
                )
                .await;
            ripple_effects.push(effect);
        }

        let new_flags = self
            .revalidate(&after, &request, &ripple_effects, &author)
            .await?;

        tracing::info!(
            fact_id = %fact_id,
            domain = %domain,
            correction_id = %record.id,
            fields = matched.len(),
            ignored = ignored_fields.len(),
            ripple_effects = ripple_effects.len(),
            new_flags = new_flags.len(),
            "Correction applied"
        );

        Ok(CorrectionResult {
            record,
            status: ValidationStatus::HumanCorrected,
            ripple_effects,
            new_flags,
            ignored_fields,
        })
    }

    /// Replace fact, state and rippled totals together, re-reading on version conflicts
    ///
    /// Each conflict means another write to this fact landed, so the loop
    /// retries until the correction is durable.
    async fn commit(
        &self,
        fact_id: &str,
        matched: &BTreeMap<String, serde_json::Value>,
        request: &CorrectionRequest,
        author: &str,
    ) -> Result<Committed, PipelineError> {
        let mut attempt: u32 = 0;
        loop {
            let fact = self.store.fact(fact_id).await?;
            let state = self.store.state(fact_id).await?;

            let original_values = matched
                .keys()
                .map(|k| {
                    (
                        k.clone(),
                        fact.value.field_value(k).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect();

            let mut corrected = fact.value.clone();
            for (field, value) in matched {
                corrected.set_field(field, value.clone());
            }
            if let Some(evidence) = request
                .new_evidence
                .as_ref()
                .filter(|_| !matched.contains_key("evidence_quote"))
            {
                corrected.evidence_quote = evidence.clone();
            }

            let now = Utc::now();
            let record = CorrectionRecord {
                id: Uuid::new_v4(),
                fact_id: fact_id.to_string(),
                timestamp: now,
                author: author.to_string(),
                original_values,
                corrected_values: matched.clone(),
                reason: request.reason.clone(),
                new_evidence: request.new_evidence.clone(),
            };

            let mut new_state = state.value.clone();
            new_state.status = ValidationStatus::HumanCorrected;
            new_state.last_correction = Some(record.id);
            new_state.reviewed_by = Some(author.to_string());
            new_state.reviewed_at = Some(now);
            new_state.review_notes = Some(request.reason.clone());

            let planned = plan_ripples(&fact.value, matched);
            let commit = CorrectionCommit {
                fact_version: fact.version,
                fact: corrected.clone(),
                state_version: state.version,
                state: new_state,
                derived_deltas: planned
                    .iter()
                    .map(|p| DerivedDelta {
                        key: p.rule.target.to_string(),
                        delta: p.new_value - p.old_value,
                    })
                    .collect(),
            };

            match self
                .store
                .commit_correction(
                    fact_id,
                    commit,
                    compute_derived,
                    author,
                    serde_json::json!({ "correction_id": record.id }),
                )
                .await
            {
                Ok(changes) => {
                    return Ok(Committed {
                        record,
                        before: fact.value,
                        after: corrected,
                        ripples: planned.into_iter().zip(changes).collect(),
                    });
                }
                Err(StoreError::VersionConflict { .. }) => {
                    attempt += 1;
                    tracing::debug!(fact_id = %fact_id, attempt = attempt, "Correction raced another write, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn ripple_effect(
        &self,
        before: &Fact,
        planned: PlannedRipple,
        change: DerivedChange,
    ) -> RippleEffect {
        let rule = planned.rule;
        let affected_fact_ids = self
            .store
            .facts()
            .await
            .into_iter()
            .filter(|f| rule.applies_to(f, rule.field) && f.numeric_detail(rule.field).is_some())
            .map(|f| f.id)
            .collect();

        RippleEffect {
            field: change.key,
            old_value: change.old_value,
            new_value: change.new_value,
            reason: format!(
                "{} of '{}' corrected from {} to {}",
                rule.field, before.item, planned.old_value, planned.new_value
            ),
            affected_fact_ids,
        }
    }

    /// The single re-validation pass of a corrected fact
    async fn revalidate(
        &self,
        fact: &Fact,
        request: &CorrectionRequest,
        ripple_effects: &[RippleEffect],
        author: &str,
    ) -> Result<Vec<Flag>, PipelineError> {
        let mut new_flags = Vec::new();

        let evidence_changed =
            request.new_evidence.is_some() || request.fields.contains_key("evidence_quote");
        let verification = if evidence_changed {
            let document = self.store.document(&fact.source_document_ref).await;
            let (verification, flag) = self
                .verifier
                .verify(&fact.evidence_quote, document.as_deref());
            new_flags.extend(flag);
            Some(verification)
        } else {
            None
        };

        if let Some(checkpoint) = self.registry.get(fact.domain, &fact.category) {
            for field in checkpoint
                .required_fields
                .iter()
                .filter(|f| !has_field(fact, f))
            {
                new_flags.push(Flag::new(
                    FlagSeverity::Warning,
                    FlagCategory::Completeness,
                    FlagSource::Correction,
                    format!("Missing required field '{}' after correction", field),
                ));
            }
        }

        let totals_moved = ripple_effects
            .iter()
            .any(|e| e.field == TOTAL_HEADCOUNT || e.field == TOTAL_IT_COST);
        if totals_moved {
            let cost = self.store.derived(TOTAL_IT_COST).await.map(|v| v.value);
            let heads = self.store.derived(TOTAL_HEADCOUNT).await.map(|v| v.value);
            if let Some(per_head) = cost
                .zip(heads)
                .and_then(|(cost, heads)| cost_per_head(cost, heads))
                .filter(|v| !self.cost_per_head.contains(*v))
            {
                new_flags.push(
                    Flag::new(
                        FlagSeverity::Warning,
                        FlagCategory::Consistency,
                        FlagSource::Correction,
                        format!(
                            "IT cost per head {:.0} outside plausible range {} after correction",
                            per_head,
                            self.cost_per_head.describe()
                        ),
                    )
                    .with_suggestion("Check the corrected headcount or cost against the source"),
                );
            }
        }

        if new_flags.is_empty() && verification.is_none() {
            return Ok(new_flags);
        }

        let flags = new_flags.clone();
        self.store
            .update_state(
                &fact.id,
                AuditAction::FlagAdded,
                author,
                serde_json::json!({ "stage": "correction_revalidation", "flags": flags.len() }),
                // The correction is already durable; retry until the flags land
                u32::MAX,
                |state| {
                    state.flags.extend(flags.iter().cloned());
                    if let Some(verification) = &verification {
                        state.evidence = Some(verification.clone());
                    }
                    state.ai_confidence =
                        aggregate_confidence(state.evidence.as_ref(), &state.flags);
                    Ok(())
                },
            )
            .await?;

        Ok(new_flags)
    }
}

/// Ripple rules triggered by the corrected fields, skipping unchanged values
fn plan_ripples(before: &Fact, matched: &BTreeMap<String, serde_json::Value>) -> Vec<PlannedRipple> {
    let mut planned = Vec::new();
    for (field, value) in matched {
        let old_value = before.numeric_detail(field).unwrap_or(0.0);
        let new_value = numeric_value(value).unwrap_or(0.0);
        if old_value == new_value {
            continue;
        }
        planned.extend(ripple_rules_for(before, field).map(|rule| PlannedRipple {
            rule,
            old_value,
            new_value,
        }));
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuditFilter, Domain, EvidenceVerdict};
    use crate::service::testing::{TEST_DOCUMENT, create_test_fact, create_test_store, details};
    use serde_json::json;

    fn create_test_pipeline(store: Arc<ValidationStore>) -> CorrectionPipeline {
        CorrectionPipeline::new(
            store,
            Arc::new(CorrectionStore::new()),
            Arc::new(CheckpointRegistry::builtin()),
            &PipelineConfig::default(),
        )
    }

    fn create_test_request(fields: &[(&str, serde_json::Value)]) -> CorrectionRequest {
        CorrectionRequest {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            reason: "Checked against the org chart".to_string(),
            author: "alice".to_string(),
            new_evidence: None,
        }
    }

    async fn seed_team(store: &ValidationStore, headcount: u64) -> String {
        store
            .ingest(
                create_test_fact(
                    Domain::Organization,
                    "teams",
                    "Service desk",
                    details(&[("headcount", json!(headcount))]),
                ),
                "test",
            )
            .await
            .0
    }

    async fn set_totals(store: &ValidationStore, headcount: f64, it_cost: f64) {
        store
            .replace_derived(BTreeMap::from([
                (TOTAL_HEADCOUNT.to_string(), headcount),
                (TOTAL_IT_COST.to_string(), it_cost),
            ]))
            .await;
    }

    #[tokio::test]
    async fn test_field_without_ripple_rule_touches_nothing_else() {
        let store = create_test_store();
        let (erp, _) = store
            .ingest(
                create_test_fact(
                    Domain::Applications,
                    "erp",
                    "SAP",
                    details(&[("vendor", json!("SAP"))]),
                ),
                "test",
            )
            .await;
        let other = seed_team(&store, 20).await;
        let other_before = store.state(&other).await.unwrap();

        let result = create_test_pipeline(store.clone())
            .correct(&erp, create_test_request(&[("vendor", json!("SAP SE"))]))
            .await
            .unwrap();

        assert!(result.ripple_effects.is_empty());
        assert_eq!(result.status, ValidationStatus::HumanCorrected);
        assert_eq!(result.record.original_values["vendor"], json!("SAP"));
        assert_eq!(store.state(&other).await.unwrap(), other_before);
        assert_eq!(
            store.fact(&erp).await.unwrap().value.details["vendor"],
            json!("SAP SE")
        );
    }

    #[tokio::test]
    async fn test_headcount_correction_moves_total_by_delta() {
        let store = create_test_store();
        let fact_id = seed_team(&store, 20).await;
        set_totals(&store, 98.0, 10_000_000.0).await;

        let result = create_test_pipeline(store.clone())
            .correct(&fact_id, create_test_request(&[("headcount", json!(35))]))
            .await
            .unwrap();

        assert_eq!(result.ripple_effects.len(), 1);
        let effect = &result.ripple_effects[0];
        assert_eq!(effect.field, TOTAL_HEADCOUNT);
        assert_eq!(effect.old_value, 98.0);
        assert_eq!(effect.new_value, 98.0 - 20.0 + 35.0);
        assert_eq!(effect.affected_fact_ids, vec![fact_id.clone()]);
        assert_eq!(store.derived(TOTAL_HEADCOUNT).await.unwrap().value, 113.0);
        assert!(result.new_flags.is_empty());

        let state = store.state(&fact_id).await.unwrap().value;
        assert_eq!(state.last_correction, Some(result.record.id));
        assert_eq!(state.reviewed_by.as_deref(), Some("alice"));

        let actions: Vec<AuditAction> = store
            .audit()
            .export(&AuditFilter {
                fact_id: Some(fact_id),
                ..Default::default()
            })
            .await
            .into_iter()
            .map(|e| e.action)
            .collect();
        for action in [
            AuditAction::CorrectionRequested,
            AuditAction::CorrectionApplied,
            AuditAction::CorrectionRecorded,
            AuditAction::RippleApplied,
        ] {
            assert!(actions.contains(&action), "missing {:?}", action);
        }
    }

    #[tokio::test]
    async fn test_out_of_band_cost_per_head_adds_one_warning() {
        let store = create_test_store();
        let fact_id = seed_team(&store, 20).await;
        // 2.1M over 100 heads is 21k, over 115 heads it drops below the 20k floor
        set_totals(&store, 100.0, 2_100_000.0).await;

        let result = create_test_pipeline(store.clone())
            .correct(&fact_id, create_test_request(&[("headcount", json!(35))]))
            .await
            .unwrap();

        assert_eq!(result.ripple_effects.len(), 1);
        assert_eq!(result.new_flags.len(), 1);
        let flag = &result.new_flags[0];
        assert_eq!(flag.severity, FlagSeverity::Warning);
        assert_eq!(flag.source, FlagSource::Correction);
        assert!(flag.message.contains("cost per head"));

        let state = store.state(&fact_id).await.unwrap().value;
        assert_eq!(state.status, ValidationStatus::HumanCorrected);
        assert_eq!(state.flags.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_corrections_do_not_lose_updates() {
        let store = create_test_store();
        let fact_id = seed_team(&store, 20).await;
        set_totals(&store, 100.0, 10_000_000.0).await;
        let pipeline = create_test_pipeline(store.clone());

        let (first, second) = tokio::join!(
            pipeline.correct(&fact_id, create_test_request(&[("headcount", json!(35))])),
            pipeline.correct(&fact_id, create_test_request(&[("headcount", json!(50))])),
        );
        first.unwrap();
        second.unwrap();

        let history = pipeline.corrections().history(&fact_id).await;
        assert_eq!(history.len(), 2);
        let from_original = history
            .iter()
            .filter(|r| r.original_values["headcount"] == json!(20))
            .count();
        assert_eq!(from_original, 1);

        let final_value = store
            .fact(&fact_id)
            .await
            .unwrap()
            .value
            .numeric_detail("headcount")
            .unwrap();
        assert_eq!(
            store.derived(TOTAL_HEADCOUNT).await.unwrap().value,
            100.0 - 20.0 + final_value
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_corrections_keep_total_equal_to_sum() {
        let store = create_test_store();
        let mut ids = Vec::new();
        for i in 0..40 {
            let (id, _) = store
                .ingest(
                    create_test_fact(
                        Domain::Organization,
                        "teams",
                        &format!("Team {}", i),
                        details(&[("headcount", json!(10))]),
                    ),
                    "test",
                )
                .await;
            ids.push(id);
        }
        store.recompute_derived(compute_derived).await;
        assert_eq!(store.derived(TOTAL_HEADCOUNT).await.unwrap().value, 400.0);
        let pipeline = create_test_pipeline(store.clone());

        let results = futures::future::join_all(ids.iter().map(|id| {
            pipeline.correct(id, create_test_request(&[("headcount", json!(20))]))
        }))
        .await;

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|c| c.ripple_effects.len() == 1)));
        let sum: f64 = store
            .facts()
            .await
            .iter()
            .filter_map(|f| f.numeric_detail("headcount"))
            .sum();
        assert_eq!(sum, 800.0);
        assert_eq!(store.derived(TOTAL_HEADCOUNT).await.unwrap().value, sum);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_writers_on_one_fact_all_succeed() {
        let store = create_test_store();
        let fact_id = seed_team(&store, 20).await;
        store.recompute_derived(compute_derived).await;
        let pipeline = create_test_pipeline(store.clone());

        let results = futures::future::join_all((21..31).map(|headcount| {
            pipeline.correct(&fact_id, create_test_request(&[("headcount", json!(headcount))]))
        }))
        .await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(pipeline.corrections().history(&fact_id).await.len(), 10);
        let final_value = store
            .fact(&fact_id)
            .await
            .unwrap()
            .value
            .numeric_detail("headcount")
            .unwrap();
        assert_eq!(store.derived(TOTAL_HEADCOUNT).await.unwrap().value, final_value);
        let chained = results
            .iter()
            .flatten()
            .filter(|c| c.record.original_values["headcount"] == json!(20))
            .count();
        assert_eq!(chained, 1);
    }

    #[tokio::test]
    async fn test_unknown_fields_and_missing_fact() {
        let store = create_test_store();
        let fact_id = seed_team(&store, 20).await;
        let pipeline = create_test_pipeline(store.clone());

        let err = pipeline
            .correct(&fact_id, create_test_request(&[("colour", json!("blue"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput(_)));
        assert_eq!(
            store.state(&fact_id).await.unwrap().value.status,
            ValidationStatus::Extracted
        );

        let err = pipeline
            .correct("missing", create_test_request(&[("headcount", json!(1))]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let result = pipeline
            .correct(
                &fact_id,
                create_test_request(&[("headcount", json!(21)), ("colour", json!("blue"))]),
            )
            .await
            .unwrap();
        assert_eq!(result.ignored_fields, vec!["colour".to_string()]);
    }

    #[tokio::test]
    async fn test_new_evidence_is_reverified() {
        let store = create_test_store();
        store
            .register_document(TEST_DOCUMENT, "The service desk is staffed by 12 people.".to_string(), "test")
            .await;
        let fact_id = seed_team(&store, 20).await;

        let mut request = create_test_request(&[("headcount", json!(12))]);
        request.new_evidence = Some("service desk is staffed by 12 people".to_string());
        let result = create_test_pipeline(store.clone())
            .correct(&fact_id, request)
            .await
            .unwrap();

        assert!(result.new_flags.is_empty());
        let state = store.state(&fact_id).await.unwrap().value;
        assert_eq!(
            state.evidence.map(|e| e.verdict),
            Some(EvidenceVerdict::Verified)
        );
        assert_eq!(
            store.fact(&fact_id).await.unwrap().value.evidence_quote,
            "service desk is staffed by 12 people"
        );
    }
}
