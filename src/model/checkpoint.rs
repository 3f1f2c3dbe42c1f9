//! Operator-maintained completeness expectations per (domain, category)

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::fact::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceTier {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Checkpoint {
    pub domain: Domain,
    pub category: String,
    #[serde(default)]
    pub min_items: usize,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default = "default_tier")]
    pub importance: ImportanceTier,
}

fn default_tier() -> ImportanceTier {
    ImportanceTier::Medium
}

impl Checkpoint {
    pub fn new(domain: Domain, category: &str, min_items: usize, importance: ImportanceTier) -> Self {
        Self {
            domain,
            category: category.to_string(),
            min_items,
            max_items: None,
            required_fields: Vec::new(),
            importance,
        }
    }

    pub fn with_max(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Critical categories must be present for the domain to be complete
    pub fn is_mandatory(&self) -> bool {
        self.importance == ImportanceTier::Critical
    }
}
