//! Persisted per-video analysis results
//!
//! Stands in for the application's metadata table: the orchestrator saves one row
//! per successful video, the sweeper deletes rows by id once their output expires.

use crate::{RecordId, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use patient_video_common::ProcessingOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// A saved outcome row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub tag: Option<String>,
    pub outcome: ProcessingOutcome,
}

/// Result persistence trait
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist one outcome and return its row id
    async fn save_result(
        &self,
        outcome: &ProcessingOutcome,
        tag: Option<&str>,
    ) -> StorageResult<RecordId>;

    /// Fetch a row by id
    async fn get_result(&self, id: &RecordId) -> StorageResult<StoredResult>;

    /// Delete rows by id. Unknown ids are ignored; returns the number deleted.
    async fn delete_records(&self, ids: &[RecordId]) -> StorageResult<usize>;
}

fn new_row(outcome: &ProcessingOutcome, tag: Option<&str>) -> StoredResult {
    StoredResult {
        id: RecordId::generate(),
        created_at: Utc::now(),
        tag: tag.map(str::to_string),
        outcome: outcome.clone(),
    }
}

/// Process-local result store
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    rows: RwLock<HashMap<RecordId, StoredResult>>,
}

impl InMemoryResultStore {
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<StoredResult> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(
        &self,
        outcome: &ProcessingOutcome,
        tag: Option<&str>,
    ) -> StorageResult<RecordId> {
        let row = new_row(outcome, tag);
        let id = row.id.clone();
        self.rows.write().await.insert(id.clone(), row);
        Ok(id)
    }

    async fn get_result(&self, id: &RecordId) -> StorageResult<StoredResult> {
        self.rows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn delete_records(&self, ids: &[RecordId]) -> StorageResult<usize> {
        let mut rows = self.rows.write().await;
        Ok(ids.iter().filter(|id| rows.remove(id).is_some()).count())
    }
}

/// Reject ids that could escape the store directory
pub(crate) fn document_path(dir: &Path, id: &str) -> StorageResult<PathBuf> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(StorageError::NotFound(id.to_string()));
    }
    Ok(dir.join(format!("{id}.json")))
}

/// Write a JSON document via a temporary file and rename
pub(crate) async fn write_document<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub(crate) async fn remove_if_present(path: &Path) -> StorageResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// One JSON document per row under a directory
#[derive(Debug, Clone)]
pub struct JsonResultStore {
    dir: PathBuf,
}

impl JsonResultStore {
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait::async_trait]
impl ResultStore for JsonResultStore {
    async fn save_result(
        &self,
        outcome: &ProcessingOutcome,
        tag: Option<&str>,
    ) -> StorageResult<RecordId> {
        let row = new_row(outcome, tag);
        let path = document_path(&self.dir, &row.id.0)?;
        write_document(&path, &row).await?;
        debug!("Saved result {} to {}", row.id, path.display());
        Ok(row.id)
    }

    async fn get_result(&self, id: &RecordId) -> StorageResult<StoredResult> {
        let path = document_path(&self.dir, &id.0)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete_records(&self, ids: &[RecordId]) -> StorageResult<usize> {
        let mut deleted = 0;
        for id in ids {
            let Ok(path) = document_path(&self.dir, &id.0) else {
                continue;
            };
            if remove_if_present(&path).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
