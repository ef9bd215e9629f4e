use crate::services::mode_registry::Mode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record {0} already exists")]
    Duplicate(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A completed analysis, as handed to the store after a successful batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub filename: String,
    pub question: String,
    pub answer: String,
    pub mode: Mode,
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filters for [`AnalysisStore::query`]. Unset fields match everything.
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone, Default)]
pub struct AnalysisQuery {
    pub project_id: Option<String>,
    pub mode: Option<Mode>,
    pub limit: Option<usize>,
}

#[cfg_attr(not(test), allow(dead_code))]
impl AnalysisQuery {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, record: &AnalysisRecord) -> bool {
        let project_ok = match &self.project_id {
            Some(project) => record.project_id.as_deref() == Some(project.as_str()),
            None => true,
        };
        project_ok && self.mode.is_none_or(|mode| mode == record.mode)
    }
}

/// Persistence for completed batch analyses. The relay only writes; `get` and
/// `query` are the read side for whatever backend serves stored results.
#[cfg_attr(not(test), allow(dead_code))]
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn put(&self, record: AnalysisRecord) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError>;

    /// Matching records, newest first.
    async fn query(&self, filter: &AnalysisQuery) -> Result<Vec<AnalysisRecord>, StoreError>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, AnalysisRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn put(&self, record: AnalysisRecord) -> Result<Uuid, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        let id = record.id;
        records.insert(id, record);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn query(&self, filter: &AnalysisQuery) -> Result<Vec<AnalysisRecord>, StoreError> {
        let records = self.records.read().await;
        let mut found: Vec<AnalysisRecord> = records.values().filter(|r| filter.matches(r)).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }
}
