//! Correction history, one immutable record per applied correction

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{CorrectionRecord, FactId};

#[derive(Default)]
pub struct CorrectionStore {
    records: RwLock<HashMap<FactId, Vec<CorrectionRecord>>>,
}

impl CorrectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, record: CorrectionRecord) {
        self.records
            .write()
            .await
            .entry(record.fact_id.clone())
            .or_default()
            .push(record);
    }

    /// All corrections of a fact, oldest first
    pub async fn history(&self, fact_id: &str) -> Vec<CorrectionRecord> {
        self.records
            .read()
            .await
            .get(fact_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get(&self, id: Uuid) -> Option<CorrectionRecord> {
        self.records
            .read()
            .await
            .values()
            .flatten()
            .find(|r| r.id == id)
            .cloned()
    }
}
