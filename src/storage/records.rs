//! Record store port
//!
//! Records are the accumulated (group, series) results of each table. The
//! pipeline only ever creates a record or relabels one; bookkeeping beyond
//! that belongs to the host.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Identifier and sequence position of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: String,
    /// 1-based position within the table
    pub position: u32,
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub position: u32,
    pub group: String,
    pub series: String,
}

#[derive(Debug, Clone, Error)]
pub enum RecordError {
    #[error("record {id} not found in table {table_key}")]
    NotFound { table_key: String, id: String },
    #[error("record store rejected the change: {0}")]
    Rejected(String),
}

/// Record mutation callbacks supplied by the host
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a record to a table
    async fn create_record(
        &self,
        table_key: &str,
        group: &str,
        series: &str,
    ) -> Result<RecordRef, RecordError>;

    /// Replace the labels of an existing record
    async fn update_record(
        &self,
        table_key: &str,
        id: &str,
        group: &str,
        series: &str,
    ) -> Result<(), RecordError>;
}

/// Process-local record store
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table's records in position order
    pub fn records(&self, table_key: &str) -> Vec<Record> {
        self.tables.lock().get(table_key).cloned().unwrap_or_default()
    }

    /// Number of records across all tables
    pub fn len(&self) -> usize {
        self.tables.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_record(
        &self,
        table_key: &str,
        group: &str,
        series: &str,
    ) -> Result<RecordRef, RecordError> {
        if table_key.trim().is_empty() {
            return Err(RecordError::Rejected("table key is empty".to_string()));
        }

        let mut tables = self.tables.lock();
        let table = tables.entry(table_key.to_string()).or_default();

        let record = Record {
            id: Uuid::new_v4().to_string(),
            position: table.len() as u32 + 1,
            group: group.to_string(),
            series: series.to_string(),
        };
        debug!(
            "Created record #{} in '{}': {} / {}",
            record.position, table_key, group, series
        );

        let reference = RecordRef {
            id: record.id.clone(),
            position: record.position,
        };
        table.push(record);
        Ok(reference)
    }

    async fn update_record(
        &self,
        table_key: &str,
        id: &str,
        group: &str,
        series: &str,
    ) -> Result<(), RecordError> {
        let mut tables = self.tables.lock();
        let record = tables
            .get_mut(table_key)
            .and_then(|t| t.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| RecordError::NotFound {
                table_key: table_key.to_string(),
                id: id.to_string(),
            })?;

        record.group = group.to_string();
        record.series = series.to_string();
        debug!("Updated record #{} in '{}'", record.position, table_key);
        Ok(())
    }
}
