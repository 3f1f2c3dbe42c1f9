//! Validation pipeline orchestrator
//!
//! The only place that knows execution order. Domains settle concurrently
//! (each through its own retry loop), adversarial review follows a domain as
//! soon as it clears Layer 2, and Layer 3 waits on every domain. Flags are
//! committed once per run in stage order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, Semaphore};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{
    AuditAction, AuditEvent, Domain, DomainReport, DomainVerdict, EvidenceVerification, FactId,
    Flag, FlagSeverity, PipelineConfig, PipelineReport, ValidationState, ValidationStatus,
};
use crate::service::adversarial::{AdversarialInput, AdversarialResult, AdversarialReviewer};
use crate::service::category::CategoryValidator;
use crate::service::checkpoints::CheckpointRegistry;
use crate::service::confidence::aggregate_confidence;
use crate::service::cross_domain::{CrossDomainInput, CrossDomainResult, CrossDomainValidator};
use crate::service::derived::compute_derived;
use crate::service::domain_pass::DomainPass;
use crate::service::extraction::ExtractionCollaborator;
use crate::service::retry::{RetryController, SettledDomain};
use crate::service::reviewer::SemanticReviewer;
use crate::service::validator::Validator;
use crate::store::ValidationStore;

const PIPELINE_ACTOR: &str = "pipeline";

struct DomainRun {
    settled: SettledDomain,
    adversarial: Option<AdversarialResult>,
}

pub struct Orchestrator {
    store: Arc<ValidationStore>,
    retry: RetryController,
    cross_domain: CrossDomainValidator,
    adversarial: AdversarialReviewer,
    adversarial_enabled: bool,
    conflict_retries: u32,
    cancellations: BTreeMap<Domain, Arc<AtomicBool>>,
    run_lock: Mutex<()>,
    last_report: RwLock<Option<PipelineReport>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ValidationStore>,
        registry: Arc<CheckpointRegistry>,
        reviewer: Arc<dyn SemanticReviewer>,
        extractor: Arc<dyn ExtractionCollaborator>,
        config: &PipelineConfig,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        let pass = DomainPass::new(
            store.clone(),
            registry,
            CategoryValidator::new(reviewer.clone(), config),
            pool,
            config,
        );
        let retry = RetryController::new(Arc::new(pass), extractor, store.clone(), config);

        Self {
            store,
            retry,
            cross_domain: CrossDomainValidator::new(reviewer.clone(), config),
            adversarial: AdversarialReviewer::new(reviewer, config),
            adversarial_enabled: config.adversarial_enabled,
            conflict_retries: config.version_conflict_retries,
            cancellations: Domain::ALL
                .into_iter()
                .map(|d| (d, Arc::new(AtomicBool::new(false))))
                .collect(),
            run_lock: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ValidationStore> {
        &self.store
    }

    /// Abort the retry loop of a domain before its next attempt
    pub fn cancel(&self, domain: Domain) {
        if let Some(flag) = self.cancellations.get(&domain) {
            flag.store(true, Ordering::SeqCst);
            tracing::info!(domain = %domain, "Retry loop cancellation requested");
        }
    }

    pub async fn last_report(&self) -> Option<PipelineReport> {
        self.last_report.read().await.clone()
    }

    /// Validate the given domains (all domains when `None` or empty)
    pub async fn run(&self, domains: Option<Vec<Domain>>) -> Result<PipelineReport, PipelineError> {
        let _guard = self.run_lock.lock().await;
        let start_time = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let domains: Vec<Domain> = match domains.filter(|d| !d.is_empty()) {
            Some(selected) => selected.into_iter().collect::<BTreeSet<_>>().into_iter().collect(),
            None => Domain::ALL.to_vec(),
        };
        for flag in domains.iter().filter_map(|d| self.cancellations.get(d)) {
            flag.store(false, Ordering::SeqCst);
        }

        self.store
            .audit()
            .append(
                AuditEvent::new(AuditAction::ValidationRunStarted, PIPELINE_ACTOR)
                    .details(serde_json::json!({ "run_id": run_id, "domains": domains })),
            )
            .await;
        tracing::info!(run_id = %run_id, domains = domains.len(), "Validation run started");

        let runs = join_all(domains.iter().map(|d| self.settle_domain(*d))).await;

        let (facts, derived) = self.store.recompute_derived(compute_derived).await;

        let cross = self
            .cross_domain
            .validate(CrossDomainInput {
                results: runs
                    .iter()
                    .map(|r| r.settled.attempt.result.clone())
                    .collect(),
                facts,
                derived,
            })
            .await;
        self.store
            .record_checks(run_id, cross.checks.clone(), PIPELINE_ACTOR)
            .await;

        let mut reports = Vec::with_capacity(runs.len());
        for domain_run in &runs {
            reports.push(self.commit_domain(run_id, domain_run, &cross).await?);
        }

        let report = PipelineReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            domains: reports,
            consistency_checks: cross.checks,
            escalations: runs
                .iter()
                .filter_map(|r| r.settled.escalation.clone())
                .collect(),
        };

        let verdicts: BTreeMap<Domain, DomainVerdict> =
            report.domains.iter().map(|d| (d.domain, d.verdict)).collect();
        self.store
            .audit()
            .append(
                AuditEvent::new(AuditAction::ValidationRunCompleted, PIPELINE_ACTOR).details(
                    serde_json::json!({
                        "run_id": run_id,
                        "verdicts": verdicts,
                        "escalations": report.escalations.len(),
                    }),
                ),
            )
            .await;

        tracing::info!(
            run_id = %run_id,
            domains = report.domains.len(),
            escalations = report.escalations.len(),
            inconsistent_checks = report.consistency_checks.iter().filter(|c| !c.is_consistent).count(),
            elapsed_ms = start_time.elapsed().as_millis(),
            "Validation run completed"
        );

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    async fn settle_domain(&self, domain: Domain) -> DomainRun {
        let cancelled = self
            .cancellations
            .get(&domain)
            .cloned()
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        let settled = self.retry.settle(domain, &cancelled).await;

        let adversarial = if self.adversarial_enabled
            && settled.escalation.is_none()
            && settled.attempt.passed()
        {
            let facts = self.store.facts_in_domain(domain).await;
            let excerpt = self.retry.pass().domain_excerpt(domain).await;
            Some(
                self.adversarial
                    .validate(AdversarialInput {
                        domain,
                        facts,
                        excerpt,
                    })
                    .await,
            )
        } else {
            None
        };

        DomainRun {
            settled,
            adversarial,
        }
    }

    async fn commit_domain(
        &self,
        run_id: Uuid,
        domain_run: &DomainRun,
        cross: &CrossDomainResult,
    ) -> Result<DomainReport, PipelineError> {
        let settled = &domain_run.settled;
        let attempt = &settled.attempt;
        let domain = attempt.domain;

        // Stage order: Evidence, Layer 1, Layer 2, Layer 3, Adversarial
        let mut fact_flags: BTreeMap<FactId, Vec<Flag>> = attempt
            .fact_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        let mut push = |id: &FactId, flag: &Flag| {
            if let Some(flags) = fact_flags.get_mut(id) {
                flags.push(flag.clone());
            }
        };
        for outcome in &attempt.evidence {
            if let Some(flag) = &outcome.flag {
                push(&outcome.fact_id, flag);
            }
        }
        for category in &attempt.categories {
            for (id, flag) in &category.fact_flags {
                push(id, flag);
            }
        }
        for (id, flag) in &attempt.result.fact_flags {
            push(id, flag);
        }
        for (id, flag) in &cross.fact_flags {
            push(id, flag);
        }
        if let Some(adversarial) = &domain_run.adversarial {
            for (id, flag) in &adversarial.fact_flags {
                push(id, flag);
            }
        }

        let mut domain_flags: Vec<Flag> = attempt
            .categories
            .iter()
            .flat_map(|c| c.flags.iter().cloned())
            .collect();
        domain_flags.extend(attempt.result.flags.iter().cloned());
        domain_flags.extend(settled.notes.iter().cloned());
        if let Some(adversarial) = &domain_run.adversarial {
            domain_flags.extend(adversarial.domain_flags.iter().cloned());
        }

        let mut critical = fact_flags
            .values()
            .flatten()
            .chain(domain_flags.iter())
            .any(|f| f.severity == FlagSeverity::Critical);
        if !critical {
            for id in fact_flags.keys() {
                if self
                    .store
                    .state(id)
                    .await
                    .is_ok_and(|s| s.value.has_open_at_least(FlagSeverity::Critical))
                {
                    critical = true;
                    break;
                }
            }
        }

        let escalated = settled.escalation.as_ref();
        let verdict = if critical || cross.is_inconsistent_for(domain) || escalated.is_some() {
            DomainVerdict::HumanReviewNeeded
        } else if !attempt.passed() {
            DomainVerdict::RequiresRerun
        } else {
            DomainVerdict::OverallValid
        };

        let existing = self.store.domain_flags(domain).await;
        let fresh: Vec<Flag> = domain_flags
            .into_iter()
            .filter(|f| !contains_equivalent(&existing, f))
            .collect();
        self.store
            .add_domain_flags(domain, fresh, PIPELINE_ACTOR)
            .await;

        let evidence: HashMap<&FactId, &EvidenceVerification> = attempt
            .evidence
            .iter()
            .map(|e| (&e.fact_id, &e.verification))
            .collect();
        let needs_human = verdict != DomainVerdict::OverallValid;

        for (fact_id, flags) in &fact_flags {
            let verification = evidence.get(fact_id).copied();
            self.store
                .update_state(
                    fact_id,
                    AuditAction::StateUpdated,
                    PIPELINE_ACTOR,
                    serde_json::json!({
                        "run_id": run_id,
                        "verdict": verdict,
                        "raised_flags": flags.len(),
                    }),
                    self.conflict_retries,
                    |state| {
                        apply_run(state, flags, verification, needs_human);
                        Ok(())
                    },
                )
                .await?;
        }

        tracing::info!(
            domain = %domain,
            verdict = ?verdict,
            completeness_score = attempt.result.completeness_score,
            attempts = settled.attempts,
            facts = fact_flags.len(),
            "Domain committed"
        );

        Ok(DomainReport {
            domain,
            verdict,
            completeness_score: attempt.result.completeness_score,
            attempts: settled.attempts,
            fact_count: attempt.fact_ids.len(),
            categories: attempt.categories.clone(),
            adversarial_findings: domain_run
                .adversarial
                .as_ref()
                .map(|a| a.findings.len())
                .unwrap_or(0),
            escalation_id: escalated.map(|e| e.id),
        })
    }
}

/// Same source and message as a flag already present, resolved or not
fn contains_equivalent(flags: &[Flag], flag: &Flag) -> bool {
    flags
        .iter()
        .any(|f| f.source == flag.source && f.message == flag.message)
}

fn apply_run(
    state: &mut ValidationState,
    flags: &[Flag],
    verification: Option<&EvidenceVerification>,
    needs_human: bool,
) {
    for flag in flags {
        if !contains_equivalent(&state.flags, flag) {
            state.flags.push(flag.clone());
        }
    }
    if let Some(verification) = verification {
        state.evidence = Some(verification.clone());
    }
    state.ai_confidence = aggregate_confidence(state.evidence.as_ref(), &state.flags);
    if !state.status.is_terminal() {
        state.status = if needs_human || state.has_open_at_least(FlagSeverity::Error) {
            ValidationStatus::HumanPending
        } else {
            ValidationStatus::AiValidated
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Checkpoint, FlagSource, ImportanceTier};
    use crate::service::derived::TOTAL_HEADCOUNT;
    use crate::service::extraction::NullExtractor;
    use crate::service::reviewer::NoSignalReviewer;
    use crate::model::CorrectionRequest;
    use crate::service::correction::CorrectionPipeline;
    use crate::service::testing::{
        ScriptedExtractor, ScriptedReviewer, TEST_DOCUMENT, create_test_fact, create_test_store,
        details,
    };
    use crate::store::CorrectionStore;
    use serde_json::json;
    use std::time::Duration;

    fn create_test_orchestrator(
        store: Arc<ValidationStore>,
        registry: CheckpointRegistry,
        reviewer: Arc<dyn SemanticReviewer>,
        extractor: Arc<dyn ExtractionCollaborator>,
    ) -> Orchestrator {
        Orchestrator::new(
            store,
            Arc::new(registry),
            reviewer,
            extractor,
            &PipelineConfig::default(),
        )
    }

    async fn seed_organization(store: &ValidationStore) -> (FactId, FactId) {
        store
            .register_document(
                TEST_DOCUMENT,
                "The CIO leads IT. Service desk has 10 staff; infrastructure team has 15.".to_string(),
                "test",
            )
            .await;
        let (cio, _) = store
            .ingest(create_test_fact(Domain::Organization, "leadership", "CIO", details(&[])), "test")
            .await;
        let (desk, _) = store
            .ingest(
                create_test_fact(
                    Domain::Organization,
                    "teams",
                    "Service desk",
                    details(&[("headcount", json!(10))]),
                ),
                "test",
            )
            .await;
        (cio, desk)
    }

    #[tokio::test]
    async fn test_flags_committed_in_stage_order() {
        let store = create_test_store();
        store
            .register_document(TEST_DOCUMENT, "The CIO leads the service desk.".to_string(), "test")
            .await;
        store
            .ingest(
                create_test_fact(
                    Domain::Organization,
                    "leadership",
                    "CIO",
                    details(&[("total_headcount", json!(100))]),
                ),
                "test",
            )
            .await;
        let mut desk = create_test_fact(
            Domain::Organization,
            "teams",
            "Service desk",
            details(&[("headcount", json!(10))]),
        );
        desk.evidence_quote = "zzzz qqqq xxxx wwww vvvv".to_string();
        let (desk_id, _) = store.ingest(desk, "test").await;

        let registry = CheckpointRegistry::with_overrides(vec![
            Checkpoint::new(Domain::Organization, "teams", 1, ImportanceTier::Critical)
                .requiring(&["headcount", "manager"]),
        ]);
        let reviewer = Arc::new(
            ScriptedReviewer::new()
                .with_category("teams", json!({ "is_complete": true, "confidence": 0.9 }))
                .with_adversarial(json!({
                    "findings": [{
                        "kind": "suspicious_value",
                        "description": "Service desk looks small",
                        "confidence": 0.5,
                        "fact_id": desk_id
                    }]
                })),
        );
        let orchestrator =
            create_test_orchestrator(store.clone(), registry, reviewer, Arc::new(NullExtractor));

        let report = orchestrator
            .run(Some(vec![Domain::Organization]))
            .await
            .unwrap();
        let organization = report.domain(Domain::Organization).unwrap();
        assert_eq!(organization.verdict, DomainVerdict::HumanReviewNeeded);
        assert_eq!(organization.adversarial_findings, 1);

        let state = store.state(&desk_id).await.unwrap().value;
        let sources: Vec<FlagSource> = state.flags.iter().map(|f| f.source).collect();
        assert_eq!(
            sources,
            vec![
                FlagSource::Evidence,
                FlagSource::Category,
                FlagSource::CrossDomain,
                FlagSource::Adversarial
            ]
        );
        assert_eq!(state.status, ValidationStatus::HumanPending);

        // A second run raises the same issues and must not duplicate them
        orchestrator
            .run(Some(vec![Domain::Organization]))
            .await
            .unwrap();
        let rerun = store.state(&desk_id).await.unwrap().value;
        assert_eq!(rerun.flags.len(), state.flags.len());
    }

    #[tokio::test]
    async fn test_clean_domain_is_ai_validated_and_derived_values_recomputed() {
        let store = create_test_store();
        let (cio, desk) = seed_organization(&store).await;
        store
            .ingest(
                create_test_fact(
                    Domain::Organization,
                    "teams",
                    "infrastructure team",
                    details(&[("headcount", json!(15))]),
                ),
                "test",
            )
            .await;
        let orchestrator = create_test_orchestrator(
            store.clone(),
            CheckpointRegistry::builtin(),
            Arc::new(NoSignalReviewer),
            Arc::new(NullExtractor),
        );

        let report = orchestrator
            .run(Some(vec![Domain::Organization]))
            .await
            .unwrap();
        assert_eq!(
            report.domain(Domain::Organization).unwrap().verdict,
            DomainVerdict::OverallValid
        );
        assert_eq!(store.derived(TOTAL_HEADCOUNT).await.unwrap().value, 25.0);

        for id in [&cio, &desk] {
            let state = store.state(id).await.unwrap().value;
            assert_eq!(state.status, ValidationStatus::AiValidated);
            assert!(state.flags.is_empty());
            assert_eq!(state.ai_confidence, 1.0);
        }
        assert!(orchestrator.last_report().await.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_domain_escalates_and_goes_to_humans() {
        let store = create_test_store();
        let extractor = Arc::new(ScriptedExtractor::new());
        let orchestrator = create_test_orchestrator(
            store.clone(),
            CheckpointRegistry::builtin(),
            Arc::new(NoSignalReviewer),
            extractor.clone(),
        );

        let report = orchestrator
            .run(Some(vec![Domain::Infrastructure]))
            .await
            .unwrap();
        let infrastructure = report.domain(Domain::Infrastructure).unwrap();
        assert_eq!(infrastructure.verdict, DomainVerdict::HumanReviewNeeded);
        assert_eq!(infrastructure.attempts, 3);
        assert!(infrastructure.escalation_id.is_some());
        assert_eq!(report.escalations.len(), 1);
        assert_eq!(extractor.calls(), 3);
        assert!(!store.domain_flags(Domain::Infrastructure).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_retry_loop_between_attempts() {
        let store = create_test_store();
        let extractor = Arc::new(ScriptedExtractor::new().with_delay(Duration::from_millis(100)));
        let orchestrator = create_test_orchestrator(
            store.clone(),
            CheckpointRegistry::builtin(),
            Arc::new(NoSignalReviewer),
            extractor.clone(),
        );

        let (report, _) = tokio::join!(orchestrator.run(Some(vec![Domain::Network])), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            orchestrator.cancel(Domain::Network);
        });
        let report = report.unwrap();

        assert_eq!(extractor.calls(), 1);
        assert_eq!(report.escalations.len(), 1);
        assert!(report.escalations[0].cancelled);
        assert_eq!(
            report.domain(Domain::Network).unwrap().verdict,
            DomainVerdict::HumanReviewNeeded
        );
    }

    #[tokio::test]
    async fn test_terminal_fact_keeps_status_but_gains_flags() {
        let store = create_test_store();
        let (_, desk) = seed_organization(&store).await;
        let current = store.state(&desk).await.unwrap();
        let mut confirmed = current.value.clone();
        confirmed.status = ValidationStatus::HumanConfirmed;
        store
            .commit_state(
                &desk,
                current.version,
                confirmed,
                AuditAction::HumanConfirmed,
                "alice",
                json!({}),
            )
            .await
            .unwrap();

        let reviewer = Arc::new(ScriptedReviewer::new().with_adversarial(json!({
            "findings": [{ "kind": "missing_data", "description": "No manager named", "confidence": 0.8, "fact_id": desk }]
        })));
        let orchestrator = create_test_orchestrator(
            store.clone(),
            CheckpointRegistry::builtin(),
            reviewer,
            Arc::new(NullExtractor),
        );
        orchestrator
            .run(Some(vec![Domain::Organization]))
            .await
            .unwrap();

        let state = store.state(&desk).await.unwrap().value;
        assert_eq!(state.status, ValidationStatus::HumanConfirmed);
        assert_eq!(state.flags.len(), 1);
        assert_eq!(state.flags[0].source, FlagSource::Adversarial);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_corrections_during_run_keep_derived_total() {
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
        let orchestrator = create_test_orchestrator(
            store.clone(),
            CheckpointRegistry::builtin(),
            Arc::new(NoSignalReviewer),
            Arc::new(NullExtractor),
        );
        let corrections = CorrectionPipeline::new(
            store.clone(),
            Arc::new(CorrectionStore::new()),
            Arc::new(CheckpointRegistry::builtin()),
            &PipelineConfig::default(),
        );

        let (report, results) = tokio::join!(
            orchestrator.run(Some(vec![Domain::Organization])),
            join_all(ids.iter().map(|id| {
                corrections.correct(
                    id,
                    CorrectionRequest {
                        fields: BTreeMap::from([("headcount".to_string(), json!(25))]),
                        reason: "Updated roster".to_string(),
                        author: "alice".to_string(),
                        new_evidence: None,
                    },
                )
            })),
        );

        report.unwrap();
        assert!(results.iter().all(Result::is_ok));
        let sum: f64 = store
            .facts()
            .await
            .iter()
            .filter_map(|f| f.numeric_detail("headcount"))
            .sum();
        assert_eq!(sum, 1000.0);
        assert_eq!(store.derived(TOTAL_HEADCOUNT).await.unwrap().value, sum);
        for id in &ids {
            assert_eq!(
                store.state(id).await.unwrap().value.status,
                ValidationStatus::HumanCorrected
            );
        }
    }
}
