//! Layer 2: per-domain aggregation
//!
//! Folds the Layer 1 results of a domain into a completeness score, checks
//! itemized sub-counts against separately stated totals, and decides whether
//! the domain needs a targeted re-extraction.

use async_trait::async_trait;

use crate::model::{
    CategoryValidationResult, Checkpoint, ConsistencyCheck, Domain, DomainValidationResult,
    EvidenceVerdict, Fact, FactId, Flag, FlagCategory, FlagSeverity, FlagSource, Gap,
    ImportanceTier, PenaltyConfig, PipelineConfig, RerunGuidance,
};
use crate::service::validator::Validator;

/// How the itemized side of a total rule is measured
#[derive(Debug, Clone, Copy)]
enum PartMeasure {
    Count,
    Sum(&'static str),
}

/// Itemized facts in `part_categories` must agree with `total_field` stated elsewhere in the domain
#[derive(Debug, Clone, Copy)]
struct TotalRule {
    domain: Domain,
    name: &'static str,
    part_categories: &'static [&'static str],
    measure: PartMeasure,
    total_field: &'static str,
}

const TOTAL_RULES: &[TotalRule] = &[
    TotalRule {
        domain: Domain::Applications,
        name: "application_count",
        part_categories: &["erp", "crm", "custom_apps", "saas"],
        measure: PartMeasure::Count,
        total_field: "total_applications",
    },
    TotalRule {
        domain: Domain::Infrastructure,
        name: "server_count",
        part_categories: &["compute"],
        measure: PartMeasure::Sum("server_count"),
        total_field: "total_servers",
    },
    TotalRule {
        domain: Domain::Network,
        name: "site_count",
        part_categories: &["wan"],
        measure: PartMeasure::Sum("site_count"),
        total_field: "total_sites",
    },
];

#[derive(Debug, Clone)]
pub struct DomainInput {
    pub domain: Domain,
    pub checkpoints: Vec<Checkpoint>,
    pub categories: Vec<CategoryValidationResult>,
    pub facts: Vec<Fact>,
    pub gaps: Vec<Gap>,
    pub evidence: Vec<(FactId, EvidenceVerdict)>,
}

pub struct DomainValidator {
    threshold: f64,
    agreement_ratio: f64,
    agreement_warning_ratio: f64,
    penalties: PenaltyConfig,
}

impl DomainValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.completeness_threshold,
            agreement_ratio: config.agreement_ratio,
            agreement_warning_ratio: config.agreement_warning_ratio,
            penalties: config.penalties.clone(),
        }
    }

    fn tier_penalty(&self, tier: ImportanceTier) -> f64 {
        match tier {
            ImportanceTier::Critical => self.penalties.incomplete_critical,
            ImportanceTier::High => self.penalties.incomplete_high,
            ImportanceTier::Medium => self.penalties.incomplete_medium,
            ImportanceTier::Low => self.penalties.incomplete_low,
        }
    }

    fn check_total(&self, rule: &TotalRule, facts: &[Fact]) -> Option<(ConsistencyCheck, FactId)> {
        let total_fact = facts.iter().find(|f| f.numeric_detail(rule.total_field).is_some())?;
        let stated = total_fact.numeric_detail(rule.total_field)?;

        let parts: Vec<&Fact> = facts
            .iter()
            .filter(|f| rule.part_categories.contains(&f.category.as_str()))
            .filter(|f| match rule.measure {
                PartMeasure::Count => true,
                PartMeasure::Sum(field) => f.numeric_detail(field).is_some(),
            })
            .collect();
        if parts.is_empty() {
            return None;
        }
        let itemized = match rule.measure {
            PartMeasure::Count => parts.len() as f64,
            PartMeasure::Sum(field) => parts.iter().filter_map(|f| f.numeric_detail(field)).sum(),
        };

        let agreement = agreement(stated, itemized);
        let (is_consistent, severity) = if agreement < self.agreement_ratio {
            (false, FlagSeverity::Error)
        } else if agreement < self.agreement_warning_ratio {
            (true, FlagSeverity::Warning)
        } else {
            (true, FlagSeverity::Info)
        };

        let mut affected: Vec<FactId> = vec![total_fact.id.clone()];
        affected.extend(parts.iter().map(|f| f.id.clone()));

        let check = ConsistencyCheck {
            name: rule.name.to_string(),
            domains: vec![rule.domain],
            expected: format!("{} (stated {})", stated, rule.total_field),
            actual: format!("{} itemized", itemized),
            is_consistent,
            severity,
            message: format!(
                "Stated {} {} vs {} itemized in {} ({}% agreement)",
                rule.total_field,
                stated,
                itemized,
                rule.part_categories.join("/"),
                percent(agreement)
            ),
            confidence: 1.0,
            affected_fact_ids: affected,
        };
        Some((check, total_fact.id.clone()))
    }
}

/// Ratio of the smaller to the larger value, 1.0 when both are zero
pub fn agreement(a: f64, b: f64) -> f64 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    if high <= 0.0 { 1.0 } else { (low / high).max(0.0) }
}

/// Whole percentage, rounded down
pub fn percent(ratio: f64) -> i64 {
    (ratio * 100.0).floor() as i64
}

#[async_trait]
impl Validator for DomainValidator {
    type Input = DomainInput;
    type Output = DomainValidationResult;

    async fn validate(&self, input: DomainInput) -> DomainValidationResult {
        let DomainInput {
            domain,
            checkpoints,
            categories,
            facts,
            gaps,
            evidence,
        } = input;

        let mut score = 1.0_f64;
        let mut issues = Vec::new();
        let mut flags = Vec::new();
        let mut fact_flags = Vec::new();
        let mut checks = Vec::new();

        for checkpoint in &checkpoints {
            let result = categories.iter().find(|c| c.category == checkpoint.category);
            let item_count = result.map(|r| r.item_count).unwrap_or(0);
            let is_complete = result
                .map(|r| r.is_complete)
                .unwrap_or(checkpoint.min_items == 0);

            if checkpoint.is_mandatory() && item_count == 0 {
                score -= self.penalties.missing_mandatory_category;
                let issue = format!("Required category '{}' has no facts", checkpoint.category);
                flags.push(
                    Flag::new(
                        FlagSeverity::Warning,
                        FlagCategory::Completeness,
                        FlagSource::Domain,
                        issue.clone(),
                    )
                    .with_suggestion(format!(
                        "Re-extract {} or declare it as a gap",
                        checkpoint.category
                    )),
                );
                issues.push(issue);
            }
            if !is_complete {
                score -= self.tier_penalty(checkpoint.importance);
                issues.push(format!(
                    "Category '{}' incomplete ({} of at least {} items)",
                    checkpoint.category, item_count, checkpoint.min_items
                ));
            }
        }

        for rule in TOTAL_RULES.iter().filter(|r| r.domain == domain) {
            let Some((check, total_fact_id)) = self.check_total(rule, &facts) else {
                continue;
            };
            if check.severity >= FlagSeverity::Warning {
                let penalty = if check.is_consistent {
                    self.penalties.numeric_warning
                } else {
                    self.penalties.numeric_inconsistency
                };
                score -= penalty;
                issues.push(check.message.clone());
                fact_flags.push((
                    total_fact_id,
                    Flag::new(
                        check.severity,
                        FlagCategory::Consistency,
                        FlagSource::Domain,
                        check.message.clone(),
                    )
                    .with_suggestion("Reconcile the stated total with the itemized facts"),
                ));
            }
            checks.push(check);
        }

        for gap in &gaps {
            score -= self.penalties.declared_gap;
            let issue = format!("Declared gap in '{}': {}", gap.category, gap.description);
            flags.push(Flag::new(
                FlagSeverity::Info,
                FlagCategory::Completeness,
                FlagSource::Domain,
                issue.clone(),
            ));
            issues.push(issue);
        }

        let unverified = evidence
            .iter()
            .filter(|(_, verdict)| *verdict != EvidenceVerdict::Verified)
            .count();
        if unverified > 0 {
            let penalty = (unverified as f64 * self.penalties.unverified_evidence)
                .min(self.penalties.unverified_evidence_cap);
            score -= penalty;
            issues.push(format!("{} facts with unverified evidence", unverified));
        }

        let completeness_score = score.clamp(0.0, 1.0);

        let gated: Vec<&Checkpoint> = checkpoints.iter().filter(|c| c.min_items > 0).collect();
        let none_complete = !gated.is_empty()
            && gated.iter().all(|c| {
                !categories
                    .iter()
                    .any(|r| r.category == c.category && r.is_complete)
            });
        let requires_rerun = completeness_score < self.threshold || none_complete;

        let rerun_guidance = requires_rerun.then(|| {
            let mut guidance = RerunGuidance::default();
            for result in categories.iter().filter(|c| !c.is_complete) {
                guidance.categories.push(result.category.clone());
                for missing in &result.missing_items {
                    if !guidance.missing_items.contains(missing) {
                        guidance.missing_items.push(missing.clone());
                    }
                }
            }
            for check in checks.iter().filter(|c| !c.is_consistent) {
                if let Some(rule) = TOTAL_RULES.iter().find(|r| r.name == check.name) {
                    for category in rule.part_categories {
                        if !guidance.categories.iter().any(|c| c == category) {
                            guidance.categories.push(category.to_string());
                        }
                    }
                }
            }
            guidance.existing_items = facts
                .iter()
                .filter(|f| guidance.categories.contains(&f.category))
                .map(|f| f.item.clone())
                .collect();
            guidance.notes = issues.clone();
            guidance
        });

        tracing::info!(
            domain = %domain,
            completeness_score = completeness_score,
            requires_rerun = requires_rerun,
            issues = issues.len(),
            "Domain validated"
        );

        DomainValidationResult {
            domain,
            completeness_score,
            requires_rerun,
            rerun_guidance,
            issues,
            checks,
            fact_flags,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Recommendation;
    use crate::service::checkpoints::CheckpointRegistry;
    use crate::service::testing::{create_test_fact, details};
    use serde_json::json;

    fn create_test_category(domain: Domain, category: &str, count: usize, complete: bool) -> CategoryValidationResult {
        CategoryValidationResult {
            domain,
            category: category.to_string(),
            item_count: count,
            is_complete: complete,
            confidence: 1.0,
            missing_items: if complete { vec![] } else { vec![category.to_string()] },
            recommendation: if complete { Recommendation::Pass } else { Recommendation::Retry },
            within_retry_bound: true,
            degraded: false,
            fact_flags: vec![],
            flags: vec![],
        }
    }

    fn create_test_input(domain: Domain, categories: Vec<CategoryValidationResult>, facts: Vec<Fact>) -> DomainInput {
        DomainInput {
            domain,
            checkpoints: CheckpointRegistry::builtin()
                .for_domain(domain)
                .into_iter()
                .cloned()
                .collect(),
            categories,
            facts,
            gaps: vec![],
            evidence: vec![],
        }
    }

    fn complete_applications() -> Vec<CategoryValidationResult> {
        ["erp", "crm", "custom_apps", "saas", "application_inventory"]
            .iter()
            .map(|c| create_test_category(Domain::Applications, c, 1, true))
            .collect()
    }

    fn create_test_apps(count: usize, stated_total: i64) -> Vec<Fact> {
        let mut facts: Vec<Fact> = (0..count)
            .map(|i| {
                Fact::from_new(create_test_fact(
                    Domain::Applications,
                    "custom_apps",
                    &format!("App {}", i),
                    details(&[]),
                ))
            })
            .collect();
        facts.push(Fact::from_new(create_test_fact(
            Domain::Applications,
            "application_inventory",
            "Application inventory",
            details(&[("total_applications", json!(stated_total))]),
        )));
        facts
    }

    #[tokio::test]
    async fn test_all_categories_below_minimum_requires_rerun() {
        let validator = DomainValidator::new(&PipelineConfig::default());
        let categories = ["hosting", "compute", "storage", "backup_dr", "cloud"]
            .iter()
            .map(|c| {
                let min_zero = matches!(*c, "storage" | "cloud");
                create_test_category(Domain::Infrastructure, c, 0, min_zero)
            })
            .collect();
        let result = validator
            .validate(create_test_input(Domain::Infrastructure, categories, vec![]))
            .await;

        assert!(result.requires_rerun);
        assert!(result.completeness_score < 0.7);
        let guidance = result.rerun_guidance.unwrap();
        assert!(guidance.categories.contains(&"backup_dr".to_string()));
        assert!(guidance.missing_items.contains(&"hosting".to_string()));
        assert_eq!(result.flags.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_domain_scores_full() {
        let validator = DomainValidator::new(&PipelineConfig::default());
        let result = validator
            .validate(create_test_input(
                Domain::Applications,
                complete_applications(),
                create_test_apps(10, 10),
            ))
            .await;
        assert_eq!(result.completeness_score, 1.0);
        assert!(!result.requires_rerun);
        assert!(result.rerun_guidance.is_none());
        assert!(result.checks[0].is_consistent);
    }

    #[tokio::test]
    async fn test_stated_total_disagreeing_with_items_is_inconsistent() {
        let validator = DomainValidator::new(&PipelineConfig::default());
        let result = validator
            .validate(create_test_input(
                Domain::Applications,
                complete_applications(),
                create_test_apps(30, 47),
            ))
            .await;
        let check = &result.checks[0];
        assert!(!check.is_consistent);
        assert_eq!(check.severity, FlagSeverity::Error);
        assert!(check.message.contains("47") && check.message.contains("30"));
        assert!((result.completeness_score - 0.85).abs() < 1e-9);
        assert_eq!(result.fact_flags.len(), 1);
        assert_eq!(result.fact_flags[0].1.severity, FlagSeverity::Error);
    }

    #[tokio::test]
    async fn test_near_agreement_is_a_warning() {
        let validator = DomainValidator::new(&PipelineConfig::default());
        let result = validator
            .validate(create_test_input(
                Domain::Applications,
                complete_applications(),
                create_test_apps(46, 50),
            ))
            .await;
        let check = &result.checks[0];
        assert!(check.is_consistent);
        assert_eq!(check.severity, FlagSeverity::Warning);
        assert!((result.completeness_score - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gaps_and_unverified_evidence_are_deducted() {
        let validator = DomainValidator::new(&PipelineConfig::default());
        let mut input = create_test_input(Domain::Applications, complete_applications(), vec![]);
        input.gaps = vec![Gap {
            domain: Domain::Applications,
            category: "saas".to_string(),
            description: "SaaS list not provided".to_string(),
        }];
        input.evidence = (0..6)
            .map(|i| (format!("f{}", i), EvidenceVerdict::PartialMatch))
            .collect();
        let result = validator.validate(input).await;
        // one gap (0.05) plus unverified evidence capped at 0.20
        assert!((result.completeness_score - 0.75).abs() < 1e-9);
        assert!(!result.requires_rerun);
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn test_agreement_ratio() {
        assert!((agreement(141.0, 98.0) - 0.695).abs() < 0.001);
        assert_eq!(agreement(0.0, 0.0), 1.0);
        assert_eq!(agreement(10.0, 0.0), 0.0);
    }
}
