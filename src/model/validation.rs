//! Validation state, flags and evidence verdicts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::fact::FactId;

/// Effective confidence of a human-confirmed fact
pub const CONFIRMED_CONFIDENCE: f64 = 0.95;
/// Effective confidence of a human-corrected fact
pub const CORRECTED_CONFIDENCE: f64 = 1.0;

/// Status of a fact in the review lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Extracted,
    AiValidated,
    HumanPending,
    HumanConfirmed,
    HumanCorrected,
    HumanRejected,
}

impl ValidationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ValidationStatus::HumanConfirmed
                | ValidationStatus::HumanCorrected
                | ValidationStatus::HumanRejected
        )
    }

    /// Whether the lifecycle permits moving from `self` to `next`
    ///
    /// Humans may act on any non-terminal fact. Terminal facts only accept a new
    /// correction, which appends history rather than rewriting it.
    pub fn can_transition_to(&self, next: ValidationStatus) -> bool {
        use ValidationStatus::*;
        match (self, next) {
            (Extracted, AiValidated | HumanPending) => true,
            (AiValidated, AiValidated | HumanPending) => true,
            (HumanPending, AiValidated | HumanPending) => true,
            (current, HumanConfirmed | HumanCorrected | HumanRejected) if !current.is_terminal() => {
                true
            }
            (HumanConfirmed | HumanCorrected | HumanRejected, HumanCorrected) => true,
            _ => false,
        }
    }
}

/// Flag severity, totally ordered INFO < WARNING < ERROR < CRITICAL
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::str::FromStr for FlagSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(FlagSeverity::Info),
            "warning" => Ok(FlagSeverity::Warning),
            "error" => Ok(FlagSeverity::Error),
            "critical" => Ok(FlagSeverity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlagCategory {
    Evidence,
    Completeness,
    Consistency,
    Manual,
}

/// Pipeline stage that raised a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    Evidence,
    Category,
    Domain,
    CrossDomain,
    Adversarial,
    Correction,
    Manual,
}

/// A single issue raised against a fact or a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Flag {
    pub id: Uuid,
    pub severity: FlagSeverity,
    pub category: FlagCategory,
    pub source: FlagSource,
    pub message: String,
    pub suggestion: Option<String>,
    /// Weight in aggregate confidence, below 1.0 for speculative findings
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Flag {
    pub fn new(
        severity: FlagSeverity,
        category: FlagCategory,
        source: FlagSource,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            category,
            source,
            message: message.into(),
            suggestion: None,
            weight: 1.0,
            created_at: Utc::now(),
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Mark resolved; a flag is never removed
    pub fn resolve(&mut self, resolver: &str) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_by = Some(resolver.to_string());
            self.resolved_at = Some(Utc::now());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceVerdict {
    Verified,
    PartialMatch,
    NotFound,
}

/// Outcome of matching a quote against its source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EvidenceVerification {
    pub verdict: EvidenceVerdict,
    pub score: f64,
    /// Closest text found in the document, for human review
    pub best_match: Option<String>,
}

/// Per-fact validation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ValidationState {
    pub fact_id: FactId,
    pub status: ValidationStatus,
    pub ai_confidence: f64,
    /// Flags in the order their producing stage ran
    pub flags: Vec<Flag>,
    pub evidence: Option<EvidenceVerification>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub last_correction: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl ValidationState {
    pub fn new(fact_id: FactId) -> Self {
        Self {
            fact_id,
            status: ValidationStatus::Extracted,
            ai_confidence: 0.0,
            flags: Vec::new(),
            evidence: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            last_correction: None,
            updated_at: Utc::now(),
        }
    }

    pub fn effective_confidence(&self) -> f64 {
        effective_confidence(self.status, self.ai_confidence)
    }

    pub fn open_flags(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter().filter(|f| !f.resolved)
    }

    pub fn max_open_severity(&self) -> Option<FlagSeverity> {
        self.open_flags().map(|f| f.severity).max()
    }

    pub fn has_open_at_least(&self, severity: FlagSeverity) -> bool {
        self.open_flags().any(|f| f.severity >= severity)
    }
}

/// Confidence as reported downstream, a pure function of status and AI confidence
pub fn effective_confidence(status: ValidationStatus, ai_confidence: f64) -> f64 {
    match status {
        ValidationStatus::HumanConfirmed => CONFIRMED_CONFIDENCE,
        ValidationStatus::HumanCorrected => CORRECTED_CONFIDENCE,
        ValidationStatus::HumanRejected => 0.0,
        _ => ai_confidence.clamp(0.0, 1.0),
    }
}
