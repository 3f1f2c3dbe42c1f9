use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::fact::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Normal,
    High,
}

/// Hand-off to human review once automation gives up on a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EscalationRecord {
    pub id: Uuid,
    pub domain: Domain,
    pub attempts: u32,
    pub remaining_issues: Vec<String>,
    pub suggested_actions: Vec<String>,
    pub priority: ReviewPriority,
    /// Set when an operator aborted the retry loop
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}
