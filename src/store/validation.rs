//! Facts, their validation states and the derived values computed from them

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuditStore, StoreError, Versioned};
use crate::model::{
    AuditAction, AuditEvent, ConsistencyCheck, Domain, EscalationRecord, Fact, FactId, Flag, Gap,
    NewFact, ValidationState,
};

/// Result of merging a re-extracted batch into the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub added: Vec<FactId>,
    pub duplicates: usize,
}

/// Recomputes every derived value from a fact set
pub type DeriveFn = fn(&[Fact]) -> BTreeMap<String, f64>;

/// Amount a correction moves one derived value by
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedDelta {
    pub key: String,
    pub delta: f64,
}

/// A derived value before and after a correction's delta
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedChange {
    pub key: String,
    pub old_value: f64,
    pub new_value: f64,
}

/// Everything one correction replaces, each part guarded by the version it was read at
#[derive(Debug, Clone)]
pub struct CorrectionCommit {
    pub fact_version: u64,
    pub fact: Fact,
    pub state_version: u64,
    pub state: ValidationState,
    pub derived_deltas: Vec<DerivedDelta>,
}

#[derive(Default)]
struct Inner {
    facts: HashMap<FactId, Versioned<Fact>>,
    states: HashMap<FactId, Versioned<ValidationState>>,
    dedup: HashMap<String, FactId>,
    documents: HashMap<String, String>,
    gaps: Vec<Gap>,
    domain_flags: BTreeMap<Domain, Vec<Flag>>,
    derived: HashMap<String, Versioned<f64>>,
    checks: Vec<ConsistencyCheck>,
    checks_run: Option<Uuid>,
    escalations: Vec<EscalationRecord>,
}

/// Lock-protected handle threaded through every pipeline component
pub struct ValidationStore {
    inner: RwLock<Inner>,
    audit: Arc<AuditStore>,
}

fn snapshot(state: &ValidationState) -> Option<serde_json::Value> {
    serde_json::to_value(state).ok()
}

/// Facts in a stable order (domain, category, creation time)
fn sorted_facts(inner: &Inner) -> Vec<Fact> {
    let mut facts: Vec<Fact> = inner.facts.values().map(|v| v.value.clone()).collect();
    facts.sort_by(|a, b| {
        (a.domain, &a.category, a.created_at, &a.id).cmp(&(
            b.domain,
            &b.category,
            b.created_at,
            &b.id,
        ))
    });
    facts
}

fn bump_derived(inner: &mut Inner, key: &str, value: f64) {
    let version = inner.derived.get(key).map(|v| v.version).unwrap_or(0) + 1;
    inner
        .derived
        .insert(key.to_string(), Versioned { version, value });
}

impl ValidationStore {
    pub fn new(audit: Arc<AuditStore>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            audit,
        }
    }

    pub fn audit(&self) -> &Arc<AuditStore> {
        &self.audit
    }

    /// Insert a fact unless its dedup key is already known
    ///
    /// Returns the fact id and whether a new fact was created.
    pub async fn ingest(&self, new: NewFact, actor: &str) -> (FactId, bool) {
        let mut inner = self.inner.write().await;
        self.insert_locked(&mut inner, new, AuditAction::FactIngested, actor)
            .await
    }

    /// Merge a re-extracted batch, deduplicating against existing facts
    pub async fn merge_batch(&self, batch: Vec<NewFact>, actor: &str) -> MergeOutcome {
        let mut inner = self.inner.write().await;
        let mut outcome = MergeOutcome::default();
        for new in batch {
            let (id, created) = self
                .insert_locked(&mut inner, new, AuditAction::FactMerged, actor)
                .await;
            if created {
                outcome.added.push(id);
            } else {
                outcome.duplicates += 1;
            }
        }
        outcome
    }

    async fn insert_locked(
        &self,
        inner: &mut Inner,
        new: NewFact,
        action: AuditAction,
        actor: &str,
    ) -> (FactId, bool) {
        let fact = Fact::from_new(new);
        let key = fact.dedup_key();
        let known = inner
            .dedup
            .get(&key)
            .cloned()
            .or_else(|| inner.facts.contains_key(&fact.id).then(|| fact.id.clone()));
        if let Some(existing) = known {
            let differs = inner.facts.get(&existing).is_some_and(|stored| {
                stored.value.details != fact.details
                    || stored.value.evidence_quote != fact.evidence_quote
            });
            if differs {
                tracing::info!(
                    fact_id = %existing,
                    item = %fact.item,
                    "Duplicate fact with different content ignored, stored fact kept"
                );
            } else {
                tracing::debug!(fact_id = %existing, "Duplicate fact ignored");
            }
            return (existing, false);
        }

        let id = fact.id.clone();
        let state = ValidationState::new(id.clone());
        let event = AuditEvent::new(action, actor)
            .fact(&id)
            .domain(fact.domain)
            .states(None, snapshot(&state))
            .details(serde_json::json!({
                "category": fact.category,
                "item": fact.item,
                "source_document_ref": fact.source_document_ref,
            }));

        inner.dedup.insert(key, id.clone());
        inner.facts.insert(id.clone(), Versioned::initial(fact));
        inner.states.insert(id.clone(), Versioned::initial(state));
        self.audit.append(event).await;
        (id, true)
    }

    pub async fn fact(&self, id: &str) -> Result<Versioned<Fact>, StoreError> {
        self.inner
            .read()
            .await
            .facts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// All facts in a stable order (domain, category, creation time)
    pub async fn facts(&self) -> Vec<Fact> {
        sorted_facts(&*self.inner.read().await)
    }

    pub async fn facts_in_domain(&self, domain: Domain) -> Vec<Fact> {
        self.facts()
            .await
            .into_iter()
            .filter(|f| f.domain == domain)
            .collect()
    }

    pub async fn state(&self, id: &str) -> Result<Versioned<ValidationState>, StoreError> {
        self.inner
            .read()
            .await
            .states
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn states(&self) -> Vec<ValidationState> {
        self.inner
            .read()
            .await
            .states
            .values()
            .map(|v| v.value.clone())
            .collect()
    }

    /// Write a new state if the stored version still equals `expected_version`
    pub async fn commit_state(
        &self,
        id: &str,
        expected_version: u64,
        new_state: ValidationState,
        action: AuditAction,
        actor: &str,
        details: serde_json::Value,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let domain = inner.facts.get(id).map(|f| f.value.domain);
        let current = inner
            .states
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                key: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        check_transition(&current.value, &new_state)?;

        let previous = snapshot(&current.value);
        let mut new_state = new_state;
        new_state.updated_at = chrono::Utc::now();
        let new_snapshot = snapshot(&new_state);
        current.version += 1;
        current.value = new_state;
        let version = current.version;

        let mut event = AuditEvent::new(action, actor)
            .fact(id)
            .states(previous, new_snapshot)
            .details(details);
        if let Some(domain) = domain {
            event = event.domain(domain);
        }
        self.audit.append(event).await;
        Ok(version)
    }

    /// Read-modify-write a state, retrying from the read on version conflicts
    pub async fn update_state<F>(
        &self,
        id: &str,
        action: AuditAction,
        actor: &str,
        details: serde_json::Value,
        max_retries: u32,
        mut mutate: F,
    ) -> Result<ValidationState, StoreError>
    where
        F: FnMut(&mut ValidationState) -> Result<(), StoreError> + Send,
    {
        let mut attempt = 0;
        loop {
            let current = self.state(id).await?;
            let mut next = current.value.clone();
            mutate(&mut next)?;
            match self
                .commit_state(id, current.version, next.clone(), action, actor, details.clone())
                .await
            {
                Ok(_) => return Ok(next),
                Err(StoreError::VersionConflict { .. }) if attempt < max_retries => {
                    attempt += 1;
                    tracing::debug!(fact_id = %id, attempt = attempt, "State version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Atomically replace a fact and its state and move the derived values
    /// the correction ripples into, all under one write lock
    ///
    /// A derived value that was never computed is first derived from the live
    /// facts (already corrected), so its old value is that minus the delta.
    /// Changes are returned in the order of `derived_deltas`.
    pub async fn commit_correction(
        &self,
        id: &str,
        commit: CorrectionCommit,
        derive: DeriveFn,
        actor: &str,
        details: serde_json::Value,
    ) -> Result<Vec<DerivedChange>, StoreError> {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;

        let fact = inner
            .facts
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let state = inner
            .states
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if fact.version != commit.fact_version {
            return Err(StoreError::VersionConflict {
                key: format!("fact:{}", id),
                expected: commit.fact_version,
                actual: fact.version,
            });
        }
        if state.version != commit.state_version {
            return Err(StoreError::VersionConflict {
                key: format!("state:{}", id),
                expected: commit.state_version,
                actual: state.version,
            });
        }
        check_transition(&state.value, &commit.state)?;

        let CorrectionCommit {
            fact: new_fact,
            state: mut new_state,
            derived_deltas,
            ..
        } = commit;
        let domain = new_fact.domain;
        let previous = snapshot(&state.value);
        new_state.updated_at = chrono::Utc::now();
        let new_snapshot = snapshot(&new_state);

        // The original key keeps pointing here so re-extraction of the
        // uncorrected item stays a duplicate
        let new_key = new_fact.dedup_key();
        if new_key != fact.value.dedup_key() {
            inner.dedup.entry(new_key).or_insert_with(|| id.to_string());
        }

        if let Some(fact) = inner.facts.get_mut(id) {
            fact.version += 1;
            fact.value = new_fact;
        }
        if let Some(state) = inner.states.get_mut(id) {
            state.version += 1;
            state.value = new_state;
        }

        let mut recomputed: Option<BTreeMap<String, f64>> = None;
        let mut changes = Vec::with_capacity(derived_deltas.len());
        for DerivedDelta { key, delta } in derived_deltas {
            let (old_value, new_value) = match inner.derived.get(&key) {
                Some(current) => (current.value, current.value + delta),
                None => {
                    let values = recomputed.get_or_insert_with(|| derive(&sorted_facts(inner)));
                    let new_value = values.get(&key).copied().unwrap_or(delta);
                    (new_value - delta, new_value)
                }
            };
            bump_derived(inner, &key, new_value);
            changes.push(DerivedChange {
                key,
                old_value,
                new_value,
            });
        }

        self.audit
            .append(
                AuditEvent::new(AuditAction::CorrectionApplied, actor)
                    .fact(id)
                    .domain(domain)
                    .states(previous, new_snapshot)
                    .details(details),
            )
            .await;
        Ok(changes)
    }

    pub async fn register_document(&self, reference: &str, content: String, actor: &str) {
        let length = content.len();
        self.inner
            .write()
            .await
            .documents
            .insert(reference.to_string(), content);
        self.audit
            .append(
                AuditEvent::new(AuditAction::DocumentRegistered, actor)
                    .details(serde_json::json!({ "reference": reference, "length": length })),
            )
            .await;
    }

    pub async fn document(&self, reference: &str) -> Option<String> {
        self.inner.read().await.documents.get(reference).cloned()
    }

    pub async fn documents(&self) -> HashMap<String, String> {
        self.inner.read().await.documents.clone()
    }

    pub async fn record_gap(&self, gap: Gap) {
        self.inner.write().await.gaps.push(gap);
    }

    pub async fn gaps_for(&self, domain: Domain) -> Vec<Gap> {
        self.inner
            .read()
            .await
            .gaps
            .iter()
            .filter(|g| g.domain == domain)
            .cloned()
            .collect()
    }

    /// Append domain-level flags (issues not attributable to a single fact)
    pub async fn add_domain_flags(&self, domain: Domain, flags: Vec<Flag>, actor: &str) {
        if flags.is_empty() {
            return;
        }
        let details = serde_json::to_value(&flags).unwrap_or_default();
        self.inner
            .write()
            .await
            .domain_flags
            .entry(domain)
            .or_default()
            .extend(flags);
        self.audit
            .append(
                AuditEvent::new(AuditAction::FlagAdded, actor)
                    .domain(domain)
                    .details(details),
            )
            .await;
    }

    pub async fn domain_flags(&self, domain: Domain) -> Vec<Flag> {
        self.inner
            .read()
            .await
            .domain_flags
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn derived(&self, key: &str) -> Option<Versioned<f64>> {
        self.inner.read().await.derived.get(key).cloned()
    }

    /// Recompute every derived value from the live facts under one write lock
    ///
    /// Returns the facts the values were computed from.
    pub async fn recompute_derived(&self, derive: DeriveFn) -> (Vec<Fact>, BTreeMap<String, f64>) {
        let mut inner = self.inner.write().await;
        let facts = sorted_facts(&inner);
        let values = derive(&facts);
        for (key, value) in &values {
            bump_derived(&mut inner, key, *value);
        }
        (facts, values)
    }

    /// Overwrite derived values with stated totals
    #[cfg(test)]
    pub async fn replace_derived(&self, values: BTreeMap<String, f64>) {
        let mut inner = self.inner.write().await;
        for (key, value) in values {
            bump_derived(&mut inner, &key, value);
        }
    }

    pub async fn derived_values(&self) -> BTreeMap<String, f64> {
        self.inner
            .read()
            .await
            .derived
            .iter()
            .map(|(k, v)| (k.clone(), v.value))
            .collect()
    }

    /// Replace the current checks with those of a run; earlier runs stay in the audit log
    pub async fn record_checks(&self, run_id: Uuid, checks: Vec<ConsistencyCheck>, actor: &str) {
        let details = serde_json::json!({ "run_id": run_id, "checks": checks });
        {
            let mut inner = self.inner.write().await;
            inner.checks = checks;
            inner.checks_run = Some(run_id);
        }
        self.audit
            .append(AuditEvent::new(AuditAction::ConsistencyChecked, actor).details(details))
            .await;
    }

    /// Checks of the latest run, with that run's id
    pub async fn consistency_checks(&self) -> (Option<Uuid>, Vec<ConsistencyCheck>) {
        let inner = self.inner.read().await;
        (inner.checks_run, inner.checks.clone())
    }

    pub async fn record_escalation(&self, record: EscalationRecord, actor: &str) {
        let details = serde_json::to_value(&record).unwrap_or_default();
        let domain = record.domain;
        self.inner.write().await.escalations.push(record);
        self.audit
            .append(
                AuditEvent::new(AuditAction::DomainEscalated, actor)
                    .domain(domain)
                    .details(details),
            )
            .await;
    }

    pub async fn escalations(&self) -> Vec<EscalationRecord> {
        self.inner.read().await.escalations.clone()
    }
}

fn check_transition(current: &ValidationState, next: &ValidationState) -> Result<(), StoreError> {
    if current.status != next.status && !current.status.can_transition_to(next.status) {
        return Err(StoreError::InvalidTransition {
            fact_id: current.fact_id.clone(),
            from: current.status,
            to: next.status,
        });
    }
    Ok(())
}
