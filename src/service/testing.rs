//! Deterministic collaborators and builders shared by service tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{Details, Domain, NewFact, ReviewMode, ReviewRequest};
use crate::service::extraction::{ExtractionCollaborator, ExtractionError, ReextractionRequest};
use crate::service::reviewer::{ReviewerError, SemanticReviewer};
use crate::store::{AuditStore, ValidationStore};

/// Reviewer answering from a fixed script, keyed by mode and optionally category
#[derive(Default)]
pub struct ScriptedReviewer {
    by_mode: HashMap<ReviewMode, serde_json::Value>,
    by_category: HashMap<String, serde_json::Value>,
    requests: Mutex<Vec<ReviewRequest>>,
}

impl ScriptedReviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completeness(mut self, response: serde_json::Value) -> Self {
        self.by_mode.insert(ReviewMode::Completeness, response);
        self
    }

    pub fn with_category(mut self, category: &str, response: serde_json::Value) -> Self {
        self.by_category.insert(category.to_string(), response);
        self
    }

    pub fn with_holistic(mut self, response: serde_json::Value) -> Self {
        self.by_mode.insert(ReviewMode::Holistic, response);
        self
    }

    pub fn with_adversarial(mut self, response: serde_json::Value) -> Self {
        self.by_mode.insert(ReviewMode::Adversarial, response);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_for(&self, mode: ReviewMode) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.mode == mode)
            .count()
    }
}

#[async_trait]
impl SemanticReviewer for ScriptedReviewer {
    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewerError> {
        self.requests.lock().unwrap().push(request.clone());
        let scripted = request
            .category
            .as_ref()
            .filter(|_| request.mode == ReviewMode::Completeness)
            .and_then(|c| self.by_category.get(c))
            .or_else(|| self.by_mode.get(&request.mode));
        Ok(scripted.cloned().unwrap_or(serde_json::Value::Null))
    }
}

/// Reviewer that answers only after a delay, for timeout paths
pub struct SlowReviewer {
    delay: Duration,
}

impl SlowReviewer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl SemanticReviewer for SlowReviewer {
    async fn review(&self, _request: &ReviewRequest) -> Result<serde_json::Value, ReviewerError> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({ "is_complete": true }))
    }
}

/// Extractor replaying queued batches, then empty batches
#[derive(Default)]
pub struct ScriptedExtractor {
    batches: Mutex<VecDeque<Vec<NewFact>>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(self, batch: Vec<NewFact>) -> Self {
        self.batches.lock().unwrap().push_back(batch);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionCollaborator for ScriptedExtractor {
    async fn reextract(&self, _request: &ReextractionRequest) -> Result<Vec<NewFact>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}

pub const TEST_DOCUMENT: &str = "doc-1";

pub fn create_test_fact(domain: Domain, category: &str, item: &str, details: Details) -> NewFact {
    NewFact {
        domain,
        category: category.to_string(),
        item: item.to_string(),
        details,
        evidence_quote: item.to_string(),
        source_document_ref: TEST_DOCUMENT.to_string(),
        entity: None,
    }
}

pub fn details(pairs: &[(&str, serde_json::Value)]) -> Details {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn create_test_store() -> Arc<ValidationStore> {
    Arc::new(ValidationStore::new(Arc::new(AuditStore::new())))
}
