//! Layer 3: invariants that span domains
//!
//! A fixed battery of arithmetic and ratio rules, plus one holistic semantic
//! review over summarized data whose findings are kept at lower confidence.
//! Nothing here triggers re-extraction; every inconsistency goes to humans.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{
    Band, ConsistencyCheck, Domain, DomainValidationResult, Fact, FactId, Flag, FlagCategory,
    FindingKind, FlagSeverity, FlagSource, PipelineConfig, ReviewFindings, ReviewMode, ReviewRequest,
};
use crate::service::derived::{
    TOTAL_APPLICATIONS, TOTAL_HEADCOUNT, TOTAL_IT_COST, cost_per_head, stated_value, sum_field,
};
use crate::service::domain::{agreement, percent};
use crate::service::reviewer::{ReviewOutcome, SemanticReviewer, review_as};
use crate::service::validator::Validator;

/// Confidence multiplier applied to holistic review findings
const HOLISTIC_CONFIDENCE_FACTOR: f64 = 0.5;

/// Detail fields naming an external provider of a service
const PROVIDER_FIELDS: &[&str] = &["provider", "managed_by"];

const MAX_SUMMARY_ITEMS: usize = 200;

#[derive(Debug, Clone)]
pub struct CrossDomainInput {
    pub results: Vec<DomainValidationResult>,
    pub facts: Vec<Fact>,
    pub derived: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CrossDomainResult {
    pub checks: Vec<ConsistencyCheck>,
    pub fact_flags: Vec<(FactId, Flag)>,
    pub degraded: bool,
}

impl CrossDomainResult {
    /// Whether an inconsistency involves the domain
    pub fn is_inconsistent_for(&self, domain: Domain) -> bool {
        self.checks
            .iter()
            .any(|c| !c.is_consistent && c.touches(domain))
    }
}

pub struct CrossDomainValidator {
    reviewer: Arc<dyn SemanticReviewer>,
    timeout: Duration,
    agreement_ratio: f64,
    cost_per_head: Band,
    applications_per_it_head: Band,
    accounts_per_employee: Band,
}

impl CrossDomainValidator {
    pub fn new(reviewer: Arc<dyn SemanticReviewer>, config: &PipelineConfig) -> Self {
        Self {
            reviewer,
            timeout: config.review_timeout(),
            agreement_ratio: config.agreement_ratio,
            cost_per_head: config.cost_per_head,
            applications_per_it_head: config.applications_per_it_head,
            accounts_per_employee: config.accounts_per_employee,
        }
    }

    fn check_headcount(&self, facts: &[Fact], derived: &BTreeMap<String, f64>) -> Option<ConsistencyCheck> {
        let total_fact = facts
            .iter()
            .find(|f| f.numeric_detail("total_headcount").is_some())?;
        let stated = total_fact.numeric_detail("total_headcount")?;
        let summed = derived.get(TOTAL_HEADCOUNT).copied().filter(|v| *v > 0.0)?;

        let ratio = agreement(stated, summed);
        let is_consistent = ratio >= self.agreement_ratio;
        let mut affected = vec![total_fact.id.clone()];
        affected.extend(
            facts
                .iter()
                .filter(|f| f.numeric_detail("headcount").is_some())
                .map(|f| f.id.clone()),
        );
        let mut domains: Vec<Domain> = facts
            .iter()
            .filter(|f| f.numeric_detail("headcount").is_some())
            .map(|f| f.domain)
            .collect();
        domains.push(total_fact.domain);
        domains.sort();
        domains.dedup();

        Some(ConsistencyCheck {
            name: "headcount_total".to_string(),
            domains,
            expected: format!(
                "{} +/- {:.0}%",
                stated,
                (1.0 - self.agreement_ratio) * 100.0
            ),
            actual: summed.to_string(),
            is_consistent,
            severity: if is_consistent {
                FlagSeverity::Info
            } else {
                FlagSeverity::Error
            },
            message: format!(
                "Stated headcount {} vs summed team headcount {} ({}% agreement)",
                stated,
                summed,
                percent(ratio)
            ),
            confidence: 1.0,
            affected_fact_ids: affected,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn ratio_check(
        &self,
        name: &str,
        domains: Vec<Domain>,
        band: Band,
        numerator: f64,
        denominator: f64,
        label: &str,
        affected: Vec<FactId>,
    ) -> ConsistencyCheck {
        let ratio = numerator / denominator;
        let is_consistent = band.contains(ratio);
        ConsistencyCheck {
            name: name.to_string(),
            domains,
            expected: band.describe(),
            actual: format!("{:.2}", ratio),
            is_consistent,
            severity: if is_consistent {
                FlagSeverity::Info
            } else {
                FlagSeverity::Warning
            },
            message: if is_consistent {
                format!("{} {:.2} within {}", label, ratio, band.describe())
            } else {
                format!(
                    "{} {:.2} outside plausible range {} ({} / {})",
                    label,
                    ratio,
                    band.describe(),
                    numerator,
                    denominator
                )
            },
            confidence: 1.0,
            affected_fact_ids: affected,
        }
    }

    fn headcount_facts(facts: &[Fact]) -> Vec<FactId> {
        facts
            .iter()
            .filter(|f| f.numeric_detail("headcount").is_some())
            .map(|f| f.id.clone())
            .collect()
    }

    fn check_applications_per_head(&self, facts: &[Fact], derived: &BTreeMap<String, f64>) -> Option<ConsistencyCheck> {
        let applications = stated_value(facts, "total_applications")
            .or_else(|| derived.get(TOTAL_APPLICATIONS).copied())
            .filter(|v| *v > 0.0)?;
        let heads = derived.get(TOTAL_HEADCOUNT).copied().filter(|v| *v > 0.0)?;
        let mut affected = Self::headcount_facts(facts);
        affected.extend(
            facts
                .iter()
                .filter(|f| f.domain == Domain::Applications)
                .map(|f| f.id.clone()),
        );
        Some(self.ratio_check(
            "applications_per_it_head",
            vec![Domain::Applications, Domain::Organization],
            self.applications_per_it_head,
            applications,
            heads,
            "Applications per IT head",
            affected,
        ))
    }

    fn check_accounts_per_employee(&self, facts: &[Fact]) -> Option<ConsistencyCheck> {
        let identity: Vec<&Fact> = facts
            .iter()
            .filter(|f| f.domain == Domain::IdentityAccess)
            .collect();
        let accounts = sum_field(identity.iter().copied(), "account_count")?;
        let employees = stated_value(facts, "total_employees").filter(|v| *v > 0.0)?;
        let affected = identity
            .iter()
            .filter(|f| f.numeric_detail("account_count").is_some())
            .map(|f| f.id.clone())
            .collect();
        Some(self.ratio_check(
            "accounts_per_employee",
            vec![Domain::IdentityAccess, Domain::Organization],
            self.accounts_per_employee,
            accounts,
            employees,
            "Accounts per employee",
            affected,
        ))
    }

    fn check_cost_per_head(&self, facts: &[Fact], derived: &BTreeMap<String, f64>) -> Option<ConsistencyCheck> {
        let cost = derived.get(TOTAL_IT_COST).copied().unwrap_or(0.0);
        let heads = derived.get(TOTAL_HEADCOUNT).copied().unwrap_or(0.0);
        cost_per_head(cost, heads)?;
        let mut affected = Self::headcount_facts(facts);
        affected.extend(
            facts
                .iter()
                .filter(|f| {
                    f.numeric_detail("annual_cost").is_some()
                        || f.numeric_detail("total_it_cost").is_some()
                })
                .map(|f| f.id.clone()),
        );
        Some(self.ratio_check(
            "cost_per_head",
            vec![Domain::Organization],
            self.cost_per_head,
            cost,
            heads,
            "IT cost per head",
            affected,
        ))
    }

    fn check_vendors(&self, facts: &[Fact]) -> Vec<ConsistencyCheck> {
        let vendors: Vec<String> = facts
            .iter()
            .filter(|f| f.domain == Domain::Organization && f.category == "outsourcing")
            .flat_map(|f| {
                let mut names = vec![normalize_vendor(&f.item)];
                if let Some(serde_json::Value::String(v)) = f.details.get("vendor") {
                    names.push(normalize_vendor(v));
                }
                names
            })
            .filter(|v| !v.is_empty())
            .collect();

        let mut checks = Vec::new();
        for fact in facts.iter().filter(|f| {
            matches!(
                f.domain,
                Domain::Infrastructure | Domain::Cybersecurity | Domain::Network
            )
        }) {
            for field in PROVIDER_FIELDS {
                let Some(serde_json::Value::String(provider)) = fact.details.get(*field) else {
                    continue;
                };
                let normalized = normalize_vendor(provider);
                if normalized.is_empty() {
                    continue;
                }
                let known = vendors
                    .iter()
                    .any(|v| v.contains(&normalized) || normalized.contains(v.as_str()));
                checks.push(ConsistencyCheck {
                    name: "vendor_cross_reference".to_string(),
                    domains: vec![fact.domain, Domain::Organization],
                    expected: format!("'{}' listed among outsourcing vendors", provider),
                    actual: if known {
                        "listed".to_string()
                    } else {
                        "not listed".to_string()
                    },
                    is_consistent: known,
                    severity: if known {
                        FlagSeverity::Info
                    } else {
                        FlagSeverity::Warning
                    },
                    message: if known {
                        format!("Provider '{}' of {} is a known vendor", provider, fact.item)
                    } else {
                        format!(
                            "Provider '{}' named for {} ({}) is missing from organization outsourcing",
                            provider, fact.item, fact.domain
                        )
                    },
                    confidence: 1.0,
                    affected_fact_ids: vec![fact.id.clone()],
                });
            }
        }
        checks
    }

    async fn holistic_review(&self, input: &CrossDomainInput) -> (Vec<ConsistencyCheck>, bool) {
        let mut summary: Vec<String> = input
            .results
            .iter()
            .map(|r| {
                format!(
                    "{}: completeness {:.2}, {} issues",
                    r.domain,
                    r.completeness_score,
                    r.issues.len()
                )
            })
            .collect();
        summary.extend(input.derived.iter().map(|(k, v)| format!("{} = {}", k, v)));

        let request = ReviewRequest {
            mode: ReviewMode::Holistic,
            domain: None,
            category: None,
            excerpt: summary.join("\n"),
            extracted_items: input
                .facts
                .iter()
                .take(MAX_SUMMARY_ITEMS)
                .map(|f| format!("{}/{}: {}", f.domain, f.category, f.item))
                .collect(),
            checklist: vec![
                "Headcount, cost and asset figures describe the same organization".to_string(),
                "Vendors and platforms named in one domain are consistent with the others".to_string(),
            ],
        };

        match review_as::<ReviewFindings>(self.reviewer.as_ref(), &request, self.timeout).await {
            ReviewOutcome::Signal(found) => {
                let checks = found
                    .findings
                    .into_iter()
                    .map(|finding| ConsistencyCheck {
                        name: format!("holistic_review.{}", kind_name(finding.kind)),
                        domains: finding.domains,
                        expected: "consistent narrative across domains".to_string(),
                        actual: finding.description.clone(),
                        is_consistent: false,
                        severity: FlagSeverity::Warning,
                        message: finding.description,
                        confidence: (finding.confidence * HOLISTIC_CONFIDENCE_FACTOR).clamp(0.0, 1.0),
                        affected_fact_ids: finding.fact_id.into_iter().collect(),
                    })
                    .collect();
                (checks, false)
            }
            ReviewOutcome::NoSignal => (Vec::new(), false),
            ReviewOutcome::Degraded(reason) => (
                vec![ConsistencyCheck {
                    name: "holistic_review".to_string(),
                    domains: Vec::new(),
                    expected: "holistic review answer".to_string(),
                    actual: reason.clone(),
                    is_consistent: true,
                    severity: FlagSeverity::Warning,
                    message: format!(
                        "Holistic review unavailable ({}): degraded to deterministic checks",
                        reason
                    ),
                    confidence: 0.0,
                    affected_fact_ids: Vec::new(),
                }],
                true,
            ),
        }
    }
}

fn kind_name(kind: FindingKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn normalize_vendor(name: &str) -> String {
    crate::service::evidence::normalize_text(name)
}

#[async_trait]
impl Validator for CrossDomainValidator {
    type Input = CrossDomainInput;
    type Output = CrossDomainResult;

    async fn validate(&self, input: CrossDomainInput) -> CrossDomainResult {
        let facts = &input.facts;
        let derived = &input.derived;

        let mut checks: Vec<ConsistencyCheck> = [
            self.check_headcount(facts, derived),
            self.check_applications_per_head(facts, derived),
            self.check_accounts_per_employee(facts),
            self.check_cost_per_head(facts, derived),
        ]
        .into_iter()
        .flatten()
        .collect();
        checks.extend(self.check_vendors(facts));

        let (review_checks, degraded) = self.holistic_review(&input).await;
        checks.extend(review_checks);

        let mut fact_flags = Vec::new();
        for check in checks.iter().filter(|c| !c.is_consistent) {
            for fact_id in &check.affected_fact_ids {
                fact_flags.push((
                    fact_id.clone(),
                    Flag::new(
                        check.severity,
                        FlagCategory::Consistency,
                        FlagSource::CrossDomain,
                        check.message.clone(),
                    )
                    .with_weight(check.confidence),
                ));
            }
        }

        tracing::info!(
            checks = checks.len(),
            inconsistent = checks.iter().filter(|c| !c.is_consistent).count(),
            degraded = degraded,
            "Cross-domain validation completed"
        );

        CrossDomainResult {
            checks,
            fact_flags,
            degraded,
        }
    }
}
