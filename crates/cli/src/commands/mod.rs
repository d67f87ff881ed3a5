pub mod process;
pub mod sweep;

use anyhow::{Context as _, Result};
use clap::ValueEnum;
use patient_video_storage::{JsonResultStore, JsonRetentionStore};
use std::path::Path;

/// How results are printed on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Jsonl,
}

/// Result rows and retention records share one records directory
pub async fn open_stores(records_dir: &Path) -> Result<(JsonResultStore, JsonRetentionStore)> {
    let results = JsonResultStore::open(records_dir.join("results"))
        .await
        .with_context(|| format!("Failed to open result store in {}", records_dir.display()))?;
    let retention = JsonRetentionStore::open(records_dir.join("retention"))
        .await
        .with_context(|| format!("Failed to open retention store in {}", records_dir.display()))?;
    Ok((results, retention))
}
