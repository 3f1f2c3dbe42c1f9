pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod consistency;
pub mod correction;
pub mod escalation;
pub mod fact;
pub mod report;
pub mod review;
pub mod validation;

pub use audit::{AuditAction, AuditEntry, AuditEvent, AuditFilter};
pub use checkpoint::{Checkpoint, ImportanceTier};
pub use config::{Band, Config, PenaltyConfig, PipelineConfig};
pub use consistency::ConsistencyCheck;
pub use correction::{CorrectionRecord, CorrectionRequest, CorrectionResult, RippleEffect};
pub use escalation::{EscalationRecord, ReviewPriority};
pub use fact::{Details, Domain, Fact, FactId, Gap, NewFact, numeric_value};
pub use report::{
    CategoryValidationResult, DomainReport, DomainValidationResult, DomainVerdict,
    PipelineReport, Recommendation, RerunGuidance,
};
pub use review::{
    CompletenessVerdict, FindingKind, ReviewFinding, ReviewFindings, ReviewMode, ReviewRequest,
};
pub use validation::{
    EvidenceVerdict, EvidenceVerification, Flag, FlagCategory, FlagSeverity, FlagSource,
    ValidationState, ValidationStatus, effective_confidence,
};
