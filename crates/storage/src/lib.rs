//! Persistence and retention for analysis outputs
//!
//! - **Result store**: one metadata row per successfully processed video
//! - **Retention store**: one record per encoded output file, with its TTL
//! - **Sweeper**: background job deleting expired outputs, their records and rows
//!
//! Both stores come as in-memory implementations (tests, embedding) and JSON
//! directory implementations (one document per record, shared between the
//! `process` and `sweep` CLI runs).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use patient_video_storage::{InMemoryRetentionStore, RetentionSweeper};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let records = Arc::new(InMemoryRetentionStore::default());
//!     let sweeper = RetentionSweeper::new(records, std::time::Duration::from_secs(7 * 24 * 3600));
//!     let report = sweeper.sweep_once(chrono::Utc::now()).await?;
//!     println!("removed {} files", report.files_removed);
//!     Ok(())
//! }
//! ```

use patient_video_common::ProcessingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub mod result_store;
pub mod retention;
pub mod sweeper;

pub use result_store::{InMemoryResultStore, JsonResultStore, ResultStore, StoredResult};
pub use retention::{InMemoryRetentionStore, JsonRetentionStore, RetentionRecord, RetentionStore};
pub use sweeper::{RetentionSweeper, SweepReport};

/// Default output retention: 7 days
pub const DEFAULT_RETENTION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<StorageError> for ProcessingError {
    fn from(err: StorageError) -> Self {
        ProcessingError::Other(format!("storage: {err}"))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Identifier of a persisted metadata row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    #[must_use]
    pub fn generate() -> Self {
        RecordId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Output lifetime in seconds
    pub ttl_secs: u64,

    /// Root of the annotated output tree (scanned for orphans)
    pub output_root: Option<PathBuf>,

    /// Directory holding JSON retention records
    pub records_dir: Option<PathBuf>,

    /// Seconds between sweeps in watch mode
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: std::env::var("PATIENT_VIDEO_RETENTION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETENTION_TTL_SECS),
            output_root: std::env::var("PATIENT_VIDEO_OUTPUT_ROOT").ok().map(PathBuf::from),
            records_dir: std::env::var("PATIENT_VIDEO_RECORDS_DIR").ok().map(PathBuf::from),
            sweep_interval_secs: std::env::var("PATIENT_VIDEO_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
        }
    }
}
