//! Background cleanup of expired analysis outputs

use crate::{RetentionStore, ResultStore, StorageError, StorageResult};
use crate::result_store::remove_if_present;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired output files deleted through their record
    pub files_removed: usize,
    /// Expired records whose file was already gone
    pub files_missing: usize,
    pub records_removed: usize,
    /// Metadata rows deleted from the result store
    pub rows_deleted: usize,
    /// Files removed by the output-root scan
    pub orphans_removed: usize,
    /// Files, rows, records or scan entries that could not be handled
    pub errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Deletes expired outputs, their retention records and metadata rows
pub struct RetentionSweeper {
    records: Arc<dyn RetentionStore>,
    results: Option<Arc<dyn ResultStore>>,
    ttl: Duration,
    output_root: Option<PathBuf>,
    scan_exclude: Option<PathBuf>,
}

impl RetentionSweeper {
    pub fn new(records: Arc<dyn RetentionStore>, ttl: Duration) -> Self {
        Self {
            records,
            results: None,
            ttl,
            output_root: None,
            scan_exclude: None,
        }
    }

    #[must_use]
    pub fn with_result_store(mut self, results: Arc<dyn ResultStore>) -> Self {
        self.results = Some(results);
        self
    }

    /// Also delete any file under `root` older than the TTL
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    /// Directory skipped by the output-root scan (e.g. the records directory)
    #[must_use]
    pub fn with_scan_exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scan_exclude = Some(dir.into());
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run one sweep as of `now`
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> StorageResult<SweepReport> {
        let mut report = SweepReport::default();

        for record in self.records.list_expired(now).await? {
            match remove_if_present(&record.output_path).await {
                Ok(true) => report.files_removed += 1,
                Ok(false) => {
                    debug!("Output already gone: {}", record.output_path.display());
                    report.files_missing += 1;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", record.output_path.display(), e);
                    report.errors += 1;
                    continue;
                }
            }

            if let (Some(results), Some(row)) = (&self.results, &record.record_id) {
                match results.delete_records(std::slice::from_ref(row)).await {
                    Ok(n) => report.rows_deleted += n,
                    Err(e) => {
                        warn!("Failed to delete metadata row {}: {}", row, e);
                        report.errors += 1;
                        continue;
                    }
                }
            }

            match self.records.remove(&record.id).await {
                Ok(true) => report.records_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove retention record {}: {}", record.id, e);
                    report.errors += 1;
                }
            }
        }

        if let Some(root) = &self.output_root {
            let (removed, errors) = self.sweep_output_root(root, now).await?;
            report.orphans_removed = removed;
            report.errors += errors;
        }

        if report.is_empty() {
            debug!("Retention sweep: nothing to do");
        } else {
            info!(
                "Retention sweep: {} files, {} records, {} rows, {} orphans removed ({} errors)",
                report.files_removed,
                report.records_removed,
                report.rows_deleted,
                report.orphans_removed,
                report.errors
            );
        }
        Ok(report)
    }

    /// Returns `(files removed, entries that could not be inspected or deleted)`
    async fn sweep_output_root(
        &self,
        root: &Path,
        now: DateTime<Utc>,
    ) -> StorageResult<(usize, usize)> {
        let Some(cutoff) = SystemTime::from(now).checked_sub(self.ttl) else {
            return Ok((0, 0));
        };
        let root = root.to_path_buf();
        let exclude = self.scan_exclude.clone();

        let scan = tokio::task::spawn_blocking(move || {
            let mut scan = StaleScan::default();
            scan.collect(&root, exclude.as_deref(), cutoff);
            scan
        })
        .await
        .map_err(|e| StorageError::Other(format!("output scan panicked: {e}")))?;

        let mut removed = 0;
        let mut errors = scan.errors;
        let mut seen = HashSet::new();
        for path in scan.stale {
            if !seen.insert(path.clone()) {
                continue;
            }
            match remove_if_present(&path).await {
                Ok(true) => {
                    debug!("Removed stale output {}", path.display());
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to delete stale output {}: {}", path.display(), e);
                    errors += 1;
                }
            }
        }
        Ok((removed, errors))
    }

    /// Sweep every `interval` until `cancel` fires. Returns the number of sweeps run.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweeps = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Retention sweeper stopping after {} sweeps", sweeps);
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        warn!("Retention sweep failed: {}", e);
                    }
                    sweeps += 1;
                }
            }
        }
        sweeps
    }
}

/// Recursive walk of the output root. One bad entry never stops the walk.
#[derive(Debug, Default)]
struct StaleScan {
    stale: Vec<PathBuf>,
    errors: usize,
}

impl StaleScan {
    fn collect(&mut self, dir: &Path, exclude: Option<&Path>, cutoff: SystemTime) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => return self.note(dir, &e),
        };

        for entry in entries {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if exclude.is_some_and(|ex| path == ex) {
                        continue;
                    }
                    self.visit(&path, exclude, cutoff);
                }
                Err(e) => self.note(dir, &e),
            }
        }
    }

    fn visit(&mut self, path: &Path, exclude: Option<&Path>, cutoff: SystemTime) {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => return self.note(path, &e),
        };
        if meta.is_dir() {
            self.collect(path, exclude, cutoff);
        } else if meta.is_file() {
            match meta.modified() {
                Ok(modified) if modified < cutoff => self.stale.push(path.to_path_buf()),
                Ok(_) => {}
                Err(e) => self.note(path, &e),
            }
        }
    }

    /// Entries deleted under our feet are already swept
    fn note(&mut self, path: &Path, err: &std::io::Error) {
        if err.kind() == std::io::ErrorKind::NotFound {
            debug!("{} vanished during scan", path.display());
        } else {
            warn!("Cannot scan {}: {}", path.display(), err);
            self.errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryResultStore, InMemoryRetentionStore, RetentionRecord};
    use chrono::Duration as ChronoDuration;
    use patient_video_common::ProcessingOutcome;

    const TTL: u64 = 60;

    async fn setup() -> (
        tempfile::TempDir,
        Arc<InMemoryRetentionStore>,
        Arc<InMemoryResultStore>,
        RetentionSweeper,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(InMemoryRetentionStore::default());
        let results = Arc::new(InMemoryResultStore::default());
        let sweeper = RetentionSweeper::new(records.clone(), Duration::from_secs(TTL))
            .with_result_store(results.clone());
        (dir, records, results, sweeper)
    }

    async fn register(
        records: &InMemoryRetentionStore,
        results: &InMemoryResultStore,
        path: PathBuf,
        age_secs: i64,
    ) -> RetentionRecord {
        let row = results
            .save_result(&ProcessingOutcome::completed("in.y4m", Some(path.clone()), vec![], 1, 0.1), None)
            .await
            .unwrap();
        let record = RetentionRecord::new(path, "in.y4m", TTL, Some(row))
            .with_created_at(Utc::now() - ChronoDuration::seconds(age_secs));
        records.insert(record.clone()).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_only() {
        let (dir, records, results, sweeper) = setup().await;
        let old = dir.path().join("old.y4m");
        let new = dir.path().join("new.y4m");
        std::fs::write(&old, b"x").unwrap();
        std::fs::write(&new, b"x").unwrap();
        register(&records, &results, old.clone(), 120).await;
        register(&records, &results, new.clone(), 5).await;

        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.rows_deleted, 1);
        assert!(!old.exists());
        assert!(new.exists());
        assert_eq!(records.list().await.unwrap().len(), 1);
        assert_eq!(results.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (dir, records, results, sweeper) = setup().await;
        let old = dir.path().join("old.y4m");
        std::fs::write(&old, b"x").unwrap();
        register(&records, &results, old, 120).await;

        let first = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(first.records_removed, 1);
        let second = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_still_removes_record() {
        let (dir, records, results, sweeper) = setup().await;
        register(&records, &results, dir.path().join("vanished.y4m"), 120).await;

        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.files_removed, 0);
        assert_eq!(report.files_missing, 1);
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.rows_deleted, 1);
        assert!(records.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_output_root_scan_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ward").join("bed4");
        let records_dir = dir.path().join("records");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(&records_dir).unwrap();
        std::fs::write(nested.join("a_VD_processed_20240101000000.y4m"), b"x").unwrap();
        std::fs::write(dir.path().join("b.y4m"), b"x").unwrap();
        std::fs::write(records_dir.join("keep.json"), b"{}").unwrap();

        let sweeper = RetentionSweeper::new(
            Arc::new(InMemoryRetentionStore::default()),
            Duration::from_secs(TTL),
        )
        .with_output_root(dir.path())
        .with_scan_exclude(&records_dir);

        // files are fresh right now
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.orphans_removed, 0);

        // and stale two TTLs from now
        let later = Utc::now() + ChronoDuration::seconds(2 * TTL as i64);
        let report = sweeper.sweep_once(later).await.unwrap();
        assert_eq!(report.orphans_removed, 2);
        assert!(records_dir.join("keep.json").exists());
        assert!(!dir.path().join("b.y4m").exists());
    }

    /// Records that can be listed but never removed
    struct StickyRecords(InMemoryRetentionStore);

    #[async_trait::async_trait]
    impl RetentionStore for StickyRecords {
        async fn insert(&self, record: RetentionRecord) -> StorageResult<()> {
            self.0.insert(record).await
        }

        async fn list(&self) -> StorageResult<Vec<RetentionRecord>> {
            self.0.list().await
        }

        async fn remove(&self, _id: &str) -> StorageResult<bool> {
            Err(StorageError::Other("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_record_removal_failure_does_not_stop_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = StickyRecords(InMemoryRetentionStore::default());
        for name in ["a.y4m", "b.y4m"] {
            let path = dir.path().join(name);
            std::fs::write(&path, b"x").unwrap();
            let record = RetentionRecord::new(path, "in.y4m", TTL, None)
                .with_created_at(Utc::now() - ChronoDuration::seconds(120));
            store.insert(record).await.unwrap();
        }

        let sweeper = RetentionSweeper::new(Arc::new(store), Duration::from_secs(TTL));
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.records_removed, 0);
        assert_eq!(report.errors, 2);
    }

    #[test]
    fn test_entry_vanishing_mid_scan_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.y4m");
        std::fs::write(&path, b"x").unwrap();
        std::fs::remove_file(&path).unwrap();

        let mut scan = StaleScan::default();
        scan.visit(&path, None, SystemTime::now() + Duration::from_secs(TTL));
        assert!(scan.stale.is_empty());
        assert_eq!(scan.errors, 0);
    }

    #[tokio::test]
    async fn test_unscannable_root_keeps_record_counts() {
        let (dir, records, results, sweeper) = setup().await;
        let old = dir.path().join("old.y4m");
        std::fs::write(&old, b"x").unwrap();
        register(&records, &results, old, 120).await;

        // a plain file where a directory is expected cannot be listed
        let bogus_root = dir.path().join("not-a-dir");
        std::fs::write(&bogus_root, b"x").unwrap();
        let sweeper = sweeper.with_output_root(&bogus_root);

        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.orphans_removed, 0);
        assert_eq!(report.errors, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (_dir, _records, _results, sweeper) = setup().await;
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        let sweeps = sweeper.run(Duration::from_millis(10), cancel).await;
        assert!(sweeps >= 1);
    }
}
