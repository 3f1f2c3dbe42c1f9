//! Results of intra- and cross-domain consistency rules

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::fact::{Domain, FactId};
use super::validation::FlagSeverity;

/// Outcome of one consistency rule, with the expected range alongside the observed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConsistencyCheck {
    pub name: String,
    pub domains: Vec<Domain>,
    pub expected: String,
    pub actual: String,
    pub is_consistent: bool,
    pub severity: FlagSeverity,
    pub message: String,
    /// 1.0 for deterministic rules, lower for holistic review findings
    pub confidence: f64,
    #[serde(default)]
    pub affected_fact_ids: Vec<FactId>,
}

impl ConsistencyCheck {
    pub fn touches(&self, domain: Domain) -> bool {
        self.domains.contains(&domain)
    }
}
