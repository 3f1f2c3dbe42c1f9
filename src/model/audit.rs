//! Append-only audit trail entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::fact::{Domain, FactId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    FactIngested,
    FactMerged,
    StateUpdated,
    FlagAdded,
    FlagResolved,
    ValidationRunStarted,
    ValidationRunCompleted,
    DomainAttempt,
    ReextractionRequested,
    DomainEscalated,
    ConsistencyChecked,
    CorrectionRequested,
    CorrectionRecorded,
    CorrectionApplied,
    RippleApplied,
    HumanConfirmed,
    HumanRejected,
    DocumentRegistered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    /// Global append order
    pub sequence: u64,
    /// Monotonic per-fact order, present when the entry targets a fact
    pub fact_sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub fact_id: Option<FactId>,
    pub domain: Option<Domain>,
    pub actor: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub details: serde_json::Value,
}

/// Entry contents before the store assigns sequence numbers
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub fact_id: Option<FactId>,
    pub domain: Option<Domain>,
    pub actor: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor: impl Into<String>) -> Self {
        Self {
            action,
            fact_id: None,
            domain: None,
            actor: actor.into(),
            previous_state: None,
            new_state: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn fact(mut self, fact_id: &str) -> Self {
        self.fact_id = Some(fact_id.to_string());
        self
    }

    pub fn domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn states(
        mut self,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        self.previous_state = previous;
        self.new_state = new;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Filter for audit export
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub fact_id: Option<FactId>,
    pub domain: Option<Domain>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref fact_id) = self.fact_id {
            if entry.fact_id.as_ref() != Some(fact_id) {
                return false;
            }
        }
        if let Some(domain) = self.domain {
            if entry.domain != Some(domain) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}
