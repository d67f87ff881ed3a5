//! Integration tests for the JSON-directory stores and the sweeper
//!
//! These mirror how the CLI uses storage: a `process` run writes outputs and
//! records, a later `sweep` run (a fresh set of store handles over the same
//! directories) cleans them up.

use chrono::{Duration as ChronoDuration, Utc};
use patient_video_common::{ActionResult, ProcessingOutcome};
use patient_video_storage::*;
use std::sync::Arc;
use std::time::Duration;

const TTL_SECS: u64 = 3600;

#[tokio::test]
async fn test_process_then_sweep_across_store_handles() {
    let root = tempfile::tempdir().expect("tempdir");
    let outputs = root.path().join("outputs");
    let records_dir = root.path().join("records");
    let results_dir = root.path().join("results");
    std::fs::create_dir_all(&outputs).unwrap();

    // "process" run
    {
        let results = JsonResultStore::open(&results_dir).await.unwrap();
        let records = JsonRetentionStore::open(&records_dir).await.unwrap();

        for (name, age) in [("expired.y4m", 2 * TTL_SECS as i64), ("fresh.y4m", 10)] {
            let output = outputs.join(name);
            std::fs::write(&output, b"YUV4MPEG2").unwrap();
            let outcome = ProcessingOutcome::completed(
                "ward.y4m",
                Some(output.clone()),
                vec![ActionResult::new(0.0, 3.0, "Interictal")],
                60,
                3.0,
            );
            let row = results.save_result(&outcome, Some("bed-4")).await.unwrap();
            let record = RetentionRecord::new(&output, "ward.y4m", TTL_SECS, Some(row))
                .with_created_at(Utc::now() - ChronoDuration::seconds(age));
            records.insert(record).await.unwrap();
        }
    }

    // "sweep" run
    let results = Arc::new(JsonResultStore::open(&results_dir).await.unwrap());
    let records = Arc::new(JsonRetentionStore::open(&records_dir).await.unwrap());
    let sweeper = RetentionSweeper::new(records.clone(), Duration::from_secs(TTL_SECS))
        .with_result_store(results.clone());

    let report = sweeper.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.files_removed, 1);
    assert_eq!(report.records_removed, 1);
    assert_eq!(report.rows_deleted, 1);
    assert_eq!(report.errors, 0);

    assert!(!outputs.join("expired.y4m").exists());
    assert!(outputs.join("fresh.y4m").exists());

    let remaining = records.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].output_path, outputs.join("fresh.y4m"));

    // running again changes nothing
    assert!(sweeper.sweep_once(Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_records_dir_inside_output_root_survives_scan() {
    let root = tempfile::tempdir().expect("tempdir");
    let records_dir = root.path().join(".records");
    let records = Arc::new(JsonRetentionStore::open(&records_dir).await.unwrap());

    let output = root.path().join("clip_VD_processed_20240101000000.y4m");
    std::fs::write(&output, b"x").unwrap();
    records
        .insert(RetentionRecord::new(&output, "clip.y4m", TTL_SECS, None))
        .await
        .unwrap();

    let sweeper = RetentionSweeper::new(records.clone(), Duration::from_secs(TTL_SECS))
        .with_output_root(root.path())
        .with_scan_exclude(&records_dir);

    let far_future = Utc::now() + ChronoDuration::seconds(3 * TTL_SECS as i64);
    let report = sweeper.sweep_once(far_future).await.unwrap();

    // the record path removes the file first, the scan finds nothing left
    assert_eq!(report.files_removed, 1);
    assert_eq!(report.records_removed, 1);
    assert_eq!(report.orphans_removed, 0);
    assert!(records_dir.exists());
}
