//! Append-only audit log
//!
//! The log is the source of historical truth: every state mutation writes the
//! full new `ValidationState` snapshot, so any past state can be rebuilt by
//! replaying entries up to an instant.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::model::{AuditEntry, AuditEvent, AuditFilter, FactId, ValidationState};

#[derive(Default)]
struct AuditLog {
    entries: Vec<AuditEntry>,
    fact_sequences: HashMap<FactId, u64>,
}

impl AuditLog {
    fn push(&mut self, event: AuditEvent) -> AuditEntry {
        let sequence = self.entries.len() as u64 + 1;
        let fact_sequence = event.fact_id.as_ref().map(|id| {
            let counter = self.fact_sequences.entry(id.clone()).or_insert(0);
            *counter += 1;
            *counter
        });

        let entry = AuditEntry {
            sequence,
            fact_sequence,
            timestamp: Utc::now(),
            action: event.action,
            fact_id: event.fact_id,
            domain: event.domain,
            actor: event.actor,
            previous_state: event.previous_state,
            new_state: event.new_state,
            details: event.details,
        };
        self.entries.push(entry.clone());
        entry
    }
}

/// Append-only store of audit entries
#[derive(Default)]
pub struct AuditStore {
    log: RwLock<AuditLog>,
}

impl AuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, event: AuditEvent) -> AuditEntry {
        self.log.write().await.push(event)
    }

    /// Append several events contiguously
    pub async fn append_all(&self, events: Vec<AuditEvent>) -> Vec<AuditEntry> {
        let mut log = self.log.write().await;
        events.into_iter().map(|e| log.push(e)).collect()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries matching the filter, in append order
    pub async fn export(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.log
            .read()
            .await
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Entries appended after the given global sequence, for incremental streaming
    pub async fn since(&self, sequence: u64) -> Vec<AuditEntry> {
        let log = self.log.read().await;
        let start = (sequence as usize).min(log.entries.len());
        log.entries[start..].to_vec()
    }

    /// Rebuild a fact's validation state as it was at `at`
    pub async fn replay_state(&self, fact_id: &str, at: DateTime<Utc>) -> Option<ValidationState> {
        let log = self.log.read().await;
        log.entries
            .iter()
            .filter(|e| e.fact_id.as_deref() == Some(fact_id) && e.timestamp <= at)
            .filter_map(|e| e.new_state.as_ref())
            .filter_map(|snapshot| serde_json::from_value::<ValidationState>(snapshot.clone()).ok())
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuditAction, Domain, ValidationStatus};
    use serde_json::json;

    fn snapshot(status: ValidationStatus) -> serde_json::Value {
        let mut state = ValidationState::new("fact-1".to_string());
        state.status = status;
        serde_json::to_value(state).unwrap()
    }

    #[tokio::test]
    async fn test_per_fact_sequence_is_monotonic() {
        let store = AuditStore::new();
        store
            .append(AuditEvent::new(AuditAction::FactIngested, "extractor").fact("a"))
            .await;
        store
            .append(AuditEvent::new(AuditAction::ValidationRunStarted, "pipeline"))
            .await;
        store
            .append(AuditEvent::new(AuditAction::FactIngested, "extractor").fact("b"))
            .await;
        let last = store
            .append(AuditEvent::new(AuditAction::StateUpdated, "pipeline").fact("a"))
            .await;

        assert_eq!(last.sequence, 4);
        assert_eq!(last.fact_sequence, Some(2));

        let only_a = store
            .export(&AuditFilter {
                fact_id: Some("a".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].fact_sequence, Some(1));
    }

    #[tokio::test]
    async fn test_replay_returns_state_at_instant() {
        let store = AuditStore::new();
        store
            .append(
                AuditEvent::new(AuditAction::FactIngested, "extractor")
                    .fact("fact-1")
                    .states(None, Some(snapshot(ValidationStatus::Extracted))),
            )
            .await;
        let middle = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .append(
                AuditEvent::new(AuditAction::HumanConfirmed, "alice")
                    .fact("fact-1")
                    .states(
                        Some(snapshot(ValidationStatus::Extracted)),
                        Some(snapshot(ValidationStatus::HumanConfirmed)),
                    ),
            )
            .await;

        let then = store.replay_state("fact-1", middle).await.unwrap();
        assert_eq!(then.status, ValidationStatus::Extracted);
        let now = store.replay_state("fact-1", Utc::now()).await.unwrap();
        assert_eq!(now.status, ValidationStatus::HumanConfirmed);
        assert!(store.replay_state("unknown", Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn test_filter_by_domain_and_since() {
        let store = AuditStore::new();
        store
            .append_all(vec![
                AuditEvent::new(AuditAction::DomainAttempt, "pipeline")
                    .domain(Domain::Network)
                    .details(json!({ "attempt": 1 })),
                AuditEvent::new(AuditAction::DomainAttempt, "pipeline").domain(Domain::Applications),
            ])
            .await;

        let network = store
            .export(&AuditFilter {
                domain: Some(Domain::Network),
                ..Default::default()
            })
            .await;
        assert_eq!(network.len(), 1);
        assert_eq!(store.since(1).await.len(), 1);
        assert!(store.since(10).await.is_empty());
    }
}
