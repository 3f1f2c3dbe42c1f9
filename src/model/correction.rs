//! Human corrections and the derived-value changes they cause

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::fact::FactId;
use super::validation::{Flag, ValidationStatus};

/// Correction payload as submitted by a reviewer
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CorrectionRequest {
    pub fields: BTreeMap<String, serde_json::Value>,
    pub reason: String,
    pub author: String,
    #[serde(default)]
    pub new_evidence: Option<String>,
}

/// Immutable record of one applied correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CorrectionRecord {
    pub id: Uuid,
    pub fact_id: FactId,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    /// Values of the touched fields before the correction
    pub original_values: BTreeMap<String, serde_json::Value>,
    pub corrected_values: BTreeMap<String, serde_json::Value>,
    pub reason: String,
    pub new_evidence: Option<String>,
}

/// Change to a derived aggregate caused by a correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RippleEffect {
    pub field: String,
    pub old_value: f64,
    pub new_value: f64,
    pub reason: String,
    pub affected_fact_ids: Vec<FactId>,
}

/// Structured result returned once a correction is durable
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CorrectionResult {
    pub record: CorrectionRecord,
    pub status: ValidationStatus,
    pub ripple_effects: Vec<RippleEffect>,
    pub new_flags: Vec<Flag>,
    /// Submitted keys that matched no correctable field
    pub ignored_fields: Vec<String>,
}
