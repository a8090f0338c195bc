// In-process run store

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::{sort_newest_first, validate_run_id, RunStore, StoreError};
use crate::models::run::{RunOverview, RunRecord};

/// Thread-safe in-memory run store
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    records: Arc<DashMap<String, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        validate_run_id(&record.id)?;
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<RunRecord, StoreError> {
        validate_run_id(id)?;
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<RunOverview>, StoreError> {
        let mut overviews: Vec<RunOverview> = self
            .records
            .iter()
            .map(|entry| RunOverview::from(entry.value()))
            .collect();
        sort_newest_first(&mut overviews);
        Ok(overviews)
    }
}
