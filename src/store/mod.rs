//! In-process stores for one analysis run
//!
//! Every mutable object is versioned. Writers read a version, compute, and
//! commit only if the version is unchanged; callers retry from the read step
//! on `VersionConflict`.

pub mod audit;
pub mod correction;
pub mod validation;

pub use audit::AuditStore;
pub use correction::CorrectionStore;
pub use validation::{
    CorrectionCommit, DeriveFn, DerivedChange, DerivedDelta, MergeOutcome, ValidationStore,
};

use crate::model::ValidationStatus;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Fact {fact_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        fact_id: String,
        from: ValidationStatus,
        to: ValidationStatus,
    },
}

/// Value paired with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn initial(value: T) -> Self {
        Self { version: 1, value }
    }
}
