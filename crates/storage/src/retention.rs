//! Retention records for encoded output files

use crate::result_store::{document_path, remove_if_present, write_document};
use crate::{RecordId, StorageError, StorageResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// One output file and when it may be deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionRecord {
    pub id: String,
    pub output_path: PathBuf,
    pub video_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Metadata row to delete together with the file
    pub record_id: Option<RecordId>,
}

impl RetentionRecord {
    pub fn new(
        output_path: impl Into<PathBuf>,
        video_path: impl Into<PathBuf>,
        ttl_secs: u64,
        record_id: Option<RecordId>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            output_path: output_path.into(),
            video_path: video_path.into(),
            created_at: Utc::now(),
            ttl_secs,
            record_id,
        }
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        self.created_at
            .checked_add_signed(ChronoDuration::seconds(ttl.min(i64::MAX / 1000)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Retention record persistence trait
#[async_trait::async_trait]
pub trait RetentionStore: Send + Sync {
    async fn insert(&self, record: RetentionRecord) -> StorageResult<()>;

    async fn list(&self) -> StorageResult<Vec<RetentionRecord>>;

    /// Remove a record; returns false when it was already gone
    async fn remove(&self, id: &str) -> StorageResult<bool>;

    /// Records whose TTL has elapsed at `now`
    async fn list_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<RetentionRecord>> {
        let mut expired: Vec<_> = self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.is_expired(now))
            .collect();
        expired.sort_by_key(|r| r.created_at);
        Ok(expired)
    }
}

/// Process-local retention store
#[derive(Debug, Default)]
pub struct InMemoryRetentionStore {
    records: RwLock<HashMap<String, RetentionRecord>>,
}

#[async_trait::async_trait]
impl RetentionStore for InMemoryRetentionStore {
    async fn insert(&self, record: RetentionRecord) -> StorageResult<()> {
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<RetentionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn remove(&self, id: &str) -> StorageResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

/// One JSON document per record under a directory
#[derive(Debug, Clone)]
pub struct JsonRetentionStore {
    dir: PathBuf,
}

impl JsonRetentionStore {
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
impl RetentionStore for JsonRetentionStore {
    async fn insert(&self, record: RetentionRecord) -> StorageResult<()> {
        let path = document_path(&self.dir, &record.id)?;
        write_document(&path, &record).await?;
        debug!("Recorded retention for {}", record.output_path.display());
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<RetentionRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                // removed by a concurrent sweep
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<RetentionRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable retention record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }

    async fn remove(&self, id: &str) -> StorageResult<bool> {
        match document_path(&self.dir, id) {
            Ok(path) => remove_if_present(&path).await,
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
