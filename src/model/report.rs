//! Per-layer results and the aggregate pipeline report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::consistency::ConsistencyCheck;
use super::escalation::EscalationRecord;
use super::fact::{Domain, FactId};
use super::validation::Flag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Pass,
    Retry,
}

/// Layer 1 outcome for one (domain, category)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CategoryValidationResult {
    pub domain: Domain,
    pub category: String,
    pub item_count: usize,
    pub is_complete: bool,
    pub confidence: f64,
    pub missing_items: Vec<String>,
    pub recommendation: Recommendation,
    /// Missing-item count is within the retryable bound
    pub within_retry_bound: bool,
    /// Semantic review timed out or was unavailable
    pub degraded: bool,
    /// Issues raised against individual facts of the category
    #[serde(skip)]
    pub fact_flags: Vec<(FactId, Flag)>,
    /// Issues raised against the category as a whole
    pub flags: Vec<Flag>,
}

/// Exactly what the retry controller should ask the extractor for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RerunGuidance {
    pub categories: Vec<String>,
    pub existing_items: Vec<String>,
    pub missing_items: Vec<String>,
    pub notes: Vec<String>,
}

impl RerunGuidance {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.missing_items.is_empty()
    }
}

/// Layer 2 outcome for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DomainValidationResult {
    pub domain: Domain,
    pub completeness_score: f64,
    pub requires_rerun: bool,
    pub rerun_guidance: Option<RerunGuidance>,
    pub issues: Vec<String>,
    pub checks: Vec<ConsistencyCheck>,
    #[serde(skip)]
    pub fact_flags: Vec<(FactId, Flag)>,
    pub flags: Vec<Flag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DomainVerdict {
    OverallValid,
    RequiresRerun,
    HumanReviewNeeded,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DomainReport {
    pub domain: Domain,
    pub verdict: DomainVerdict,
    pub completeness_score: f64,
    pub attempts: u32,
    pub fact_count: usize,
    pub categories: Vec<CategoryValidationResult>,
    pub adversarial_findings: usize,
    pub escalation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub domains: Vec<DomainReport>,
    pub consistency_checks: Vec<ConsistencyCheck>,
    pub escalations: Vec<EscalationRecord>,
}

impl PipelineReport {
    pub fn domain(&self, domain: Domain) -> Option<&DomainReport> {
        self.domains.iter().find(|d| d.domain == domain)
    }
}
