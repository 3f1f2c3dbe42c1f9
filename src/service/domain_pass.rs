//! One validation attempt of a domain: Evidence and Layer 1 per category on the
//! shared worker pool, then Layer 2 once every category of the domain is done

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::model::{
    CategoryValidationResult, Domain, DomainValidationResult, EvidenceVerification, Fact, FactId,
    Flag, PipelineConfig,
};
use crate::service::category::{CategoryInput, CategoryValidator};
use crate::service::checkpoints::CheckpointRegistry;
use crate::service::domain::{DomainInput, DomainValidator};
use crate::service::evidence::EvidenceVerifier;
use crate::service::validator::Validator;
use crate::store::ValidationStore;

/// Evidence verdict of one fact with the flag it raised
#[derive(Debug, Clone)]
pub struct EvidenceOutcome {
    pub fact_id: FactId,
    pub verification: EvidenceVerification,
    pub flag: Option<Flag>,
}

#[derive(Debug, Clone)]
pub struct DomainAttempt {
    pub domain: Domain,
    pub fact_ids: Vec<FactId>,
    pub evidence: Vec<EvidenceOutcome>,
    pub categories: Vec<CategoryValidationResult>,
    pub result: DomainValidationResult,
}

impl DomainAttempt {
    pub fn passed(&self) -> bool {
        !self.result.requires_rerun
    }
}

pub struct DomainPass {
    store: Arc<ValidationStore>,
    registry: Arc<CheckpointRegistry>,
    verifier: EvidenceVerifier,
    category_validator: CategoryValidator,
    domain_validator: DomainValidator,
    pool: Arc<Semaphore>,
    excerpt_max_chars: usize,
}

impl DomainPass {
    pub fn new(
        store: Arc<ValidationStore>,
        registry: Arc<CheckpointRegistry>,
        category_validator: CategoryValidator,
        pool: Arc<Semaphore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            verifier: EvidenceVerifier::from_config(config),
            category_validator,
            domain_validator: DomainValidator::new(config),
            pool,
            excerpt_max_chars: config.excerpt_max_chars,
        }
    }

    pub async fn run(&self, domain: Domain) -> DomainAttempt {
        let start_time = Instant::now();
        let facts = self.store.facts_in_domain(domain).await;
        let documents = self.store.documents().await;

        let categories: BTreeSet<String> = self
            .registry
            .for_domain(domain)
            .into_iter()
            .map(|c| c.category.clone())
            .chain(facts.iter().map(|f| f.category.clone()))
            .collect();

        let documents = Arc::new(documents);
        let tasks = categories.into_iter().map(|category| {
            let category_facts: Vec<Fact> = facts
                .iter()
                .filter(|f| f.category == category)
                .cloned()
                .collect();
            let checkpoint = self.registry.get_or_default(domain, &category);
            let excerpt = build_excerpt(&category_facts, &documents, self.excerpt_max_chars);
            let documents = documents.clone();

            async move {
                // A closed pool only happens at shutdown; the task still runs
                let _permit = self.pool.acquire().await.ok();
                let evidence = self
                    .verify_evidence(&category, category_facts.clone(), documents)
                    .await;
                let result = self
                    .category_validator
                    .validate(CategoryInput {
                        checkpoint,
                        facts: category_facts,
                        excerpt,
                    })
                    .await;
                (evidence, result)
            }
        });

        let outcomes = join_all(tasks).await;

        let mut evidence = Vec::new();
        let mut category_results = Vec::new();
        for (category_evidence, result) in outcomes {
            evidence.extend(category_evidence);
            category_results.push(result);
        }

        let verdicts = evidence
            .iter()
            .map(|e| (e.fact_id.clone(), e.verification.verdict))
            .collect();
        let input = DomainInput {
            domain,
            checkpoints: self
                .registry
                .for_domain(domain)
                .into_iter()
                .cloned()
                .collect(),
            categories: category_results.clone(),
            facts: facts.clone(),
            gaps: self.store.gaps_for(domain).await,
            evidence: verdicts,
        };
        let result = self.domain_validator.validate(input).await;

        tracing::debug!(
            domain = %domain,
            facts = facts.len(),
            categories = category_results.len(),
            elapsed_ms = start_time.elapsed().as_millis(),
            "Domain attempt completed"
        );

        DomainAttempt {
            domain,
            fact_ids: facts.into_iter().map(|f| f.id).collect(),
            evidence,
            categories: category_results,
            result,
        }
    }

    /// Source text shown to reviewers for a domain
    pub async fn domain_excerpt(&self, domain: Domain) -> String {
        let facts = self.store.facts_in_domain(domain).await;
        let documents = self.store.documents().await;
        build_excerpt(&facts, &documents, self.excerpt_max_chars)
    }
}

/// Text of the documents the facts cite (all documents when they cite none), capped in length
impl DomainPass {
    /// Alignment is CPU-bound and runs on the blocking pool
    async fn verify_evidence(
        &self,
        category: &str,
        facts: Vec<Fact>,
        documents: Arc<HashMap<String, String>>,
    ) -> Vec<EvidenceOutcome> {
        let verifier = self.verifier.clone();
        let verified = tokio::task::spawn_blocking(move || {
            facts
                .iter()
                .map(|fact| {
                    let document = documents.get(&fact.source_document_ref).map(String::as_str);
                    let (verification, flag) = verifier.verify(&fact.evidence_quote, document);
                    EvidenceOutcome {
                        fact_id: fact.id.clone(),
                        verification,
                        flag,
                    }
                })
                .collect()
        })
        .await;

        match verified {
            Ok(evidence) => evidence,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                tracing::error!(category = %category, error = %e, "Evidence verification task aborted");
                Vec::new()
            }
        }
    }
}

fn build_excerpt(facts: &[Fact], documents: &HashMap<String, String>, max_chars: usize) -> String {
    let references: BTreeSet<&str> = facts
        .iter()
        .map(|f| f.source_document_ref.as_str())
        .filter(|r| documents.contains_key(*r))
        .collect();

    let mut texts: Vec<&str> = if references.is_empty() {
        let mut all: Vec<(&String, &String)> = documents.iter().collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all.into_iter().map(|(_, text)| text.as_str()).collect()
    } else {
        references
            .iter()
            .filter_map(|r| documents.get(*r).map(String::as_str))
            .collect()
    };
    texts.retain(|t| !t.trim().is_empty());

    texts.join("\n\n").chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EvidenceVerdict, FlagSeverity};
    use crate::service::reviewer::NoSignalReviewer;
    use crate::service::testing::{TEST_DOCUMENT, create_test_fact, create_test_store, details};
    use serde_json::json;

    fn create_test_pass(store: Arc<ValidationStore>) -> DomainPass {
        let config = PipelineConfig::default();
        DomainPass::new(
            store,
            Arc::new(CheckpointRegistry::builtin()),
            CategoryValidator::new(Arc::new(NoSignalReviewer), &config),
            Arc::new(Semaphore::new(2)),
            &config,
        )
    }

    #[tokio::test]
    async fn test_attempt_covers_checkpoints_and_extra_categories() {
        let store = create_test_store();
        store
            .register_document(TEST_DOCUMENT, "Our WAN is MPLS. VoIP runs on Teams.".to_string(), "test")
            .await;
        store
            .ingest(create_test_fact(Domain::Network, "wan", "MPLS", details(&[])), "test")
            .await;
        store
            .ingest(create_test_fact(Domain::Network, "voip", "Teams", details(&[])), "test")
            .await;
        let attempt = create_test_pass(store).run(Domain::Network).await;

        let names: Vec<&str> = attempt.categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(names, vec!["lan", "security_devices", "voip", "wan"]);
        assert_eq!(attempt.evidence.len(), 2);
        assert!(attempt
            .evidence
            .iter()
            .all(|e| e.verification.verdict == EvidenceVerdict::Verified));
        assert!(attempt.passed());
    }

    #[tokio::test]
    async fn test_unregistered_document_fails_evidence() {
        let store = create_test_store();
        store
            .ingest(
                create_test_fact(
                    Domain::IdentityAccess,
                    "directory",
                    "Entra ID",
                    details(&[("account_count", json!(900))]),
                ),
                "test",
            )
            .await;
        let attempt = create_test_pass(store).run(Domain::IdentityAccess).await;
        assert_eq!(attempt.evidence.len(), 1);
        assert_eq!(attempt.evidence[0].verification.verdict, EvidenceVerdict::NotFound);
        assert_eq!(
            attempt.evidence[0].flag.as_ref().map(|f| f.severity),
            Some(FlagSeverity::Critical)
        );
    }

    #[tokio::test]
    async fn test_long_document_verified_per_fact() {
        let store = create_test_store();
        let document = format!(
            "{}Perimeter firewalls are Palo Alto PA-3220 units.",
            "Unrelated narrative about the estate. ".repeat(2_000)
        );
        store.register_document(TEST_DOCUMENT, document, "test").await;
        let (exact, _) = store
            .ingest(
                create_test_fact(Domain::Network, "security_devices", "Palo Alto PA-3220", details(&[])),
                "test",
            )
            .await;
        let (missing, _) = store
            .ingest(
                create_test_fact(Domain::Network, "security_devices", "Cisco Meraki MX", details(&[])),
                "test",
            )
            .await;

        let attempt = create_test_pass(store).run(Domain::Network).await;
        let outcome = |id: &FactId| attempt.evidence.iter().find(|e| &e.fact_id == id).unwrap();
        assert_eq!(attempt.evidence.len(), 2);
        assert_eq!(outcome(&exact).verification.verdict, EvidenceVerdict::Verified);
        assert!(outcome(&exact).flag.is_none());
        assert_ne!(outcome(&missing).verification.verdict, EvidenceVerdict::Verified);
        assert!(outcome(&missing).flag.is_some());
    }

    #[test]
    fn test_excerpt_is_capped() {
        let documents = HashMap::from([("doc-1".to_string(), "x".repeat(100))]);
        assert_eq!(build_excerpt(&[], &documents, 10).len(), 10);
    }
}
