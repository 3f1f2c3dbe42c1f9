//! Request and response contracts for the semantic-review capability
//!
//! Responses are structured JSON. Anything that does not parse into these
//! shapes is treated as "no additional signal" by callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::fact::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    /// Is the enumeration of a category complete?
    Completeness,
    /// Narrative consistency across domains
    Holistic,
    /// Skeptical pass over provisionally trusted facts
    Adversarial,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewRequest {
    pub mode: ReviewMode,
    pub domain: Option<Domain>,
    pub category: Option<String>,
    pub excerpt: String,
    pub extracted_items: Vec<String>,
    pub checklist: Vec<String>,
}

/// Completeness verdict for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompletenessVerdict {
    pub is_complete: bool,
    #[serde(default)]
    pub missing_items: Vec<String>,
    #[serde(default = "default_verdict_confidence")]
    pub confidence: f64,
}

fn default_verdict_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MissingData,
    Inconsistency,
    SuspiciousValue,
    CoverageGap,
    EvidenceQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ReviewFinding {
    pub kind: FindingKind,
    pub description: String,
    #[serde(default = "default_verdict_confidence")]
    pub confidence: f64,
    /// Fact the finding refers to, when the reviewer can name one
    #[serde(default)]
    pub fact_id: Option<String>,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewFindings {
    #[serde(default)]
    pub findings: Vec<ReviewFinding>,
}

/// JSON schema a remote reviewer must answer with for the given mode
pub fn response_schema(mode: ReviewMode) -> serde_json::Value {
    let schema = match mode {
        ReviewMode::Completeness => schemars::schema_for!(CompletenessVerdict),
        ReviewMode::Holistic | ReviewMode::Adversarial => schemars::schema_for!(ReviewFindings),
    };
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}
