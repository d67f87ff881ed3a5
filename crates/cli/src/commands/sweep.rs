//! `sweep` - delete expired outputs, their retention records and result rows

use super::{open_stores, OutputFormat};
use anyhow::{Context as _, Result};
use clap::Args;
use patient_video_storage::{RetentionConfig, RetentionSweeper, SweepReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args)]
pub struct SweepCommand {
    /// Directory holding result rows and retention records
    /// (default: $PATIENT_VIDEO_RECORDS_DIR)
    #[arg(long)]
    records_dir: Option<PathBuf>,

    /// Also delete any file under this directory older than the TTL
    /// (default: $PATIENT_VIDEO_OUTPUT_ROOT)
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Output lifetime in seconds (default: $PATIENT_VIDEO_RETENTION_TTL_SECS or 7 days)
    #[arg(long)]
    ttl_secs: Option<u64>,

    /// Keep running, sweeping every --interval-secs
    #[arg(long)]
    watch: bool,

    /// Seconds between sweeps in watch mode (default: $PATIENT_VIDEO_SWEEP_INTERVAL_SECS or 3600)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl SweepCommand {
    /// Flags win over the environment-derived defaults
    fn resolve(&self) -> Result<RetentionConfig> {
        let mut config = RetentionConfig::default();
        if let Some(dir) = &self.records_dir {
            config.records_dir = Some(dir.clone());
        }
        if let Some(root) = &self.output_root {
            config.output_root = Some(root.clone());
        }
        if let Some(ttl) = self.ttl_secs {
            config.ttl_secs = ttl;
        }
        if let Some(secs) = self.interval_secs {
            config.sweep_interval_secs = secs;
        }

        if config.records_dir.is_none() {
            anyhow::bail!("No records directory: pass --records-dir or set PATIENT_VIDEO_RECORDS_DIR");
        }
        if config.ttl_secs == 0 {
            anyhow::bail!("--ttl-secs must be greater than 0");
        }
        if config.sweep_interval_secs == 0 {
            anyhow::bail!("--interval-secs must be greater than 0");
        }
        Ok(config)
    }

    pub async fn execute(self) -> Result<()> {
        let config = self.resolve()?;
        let records_dir = config
            .records_dir
            .clone()
            .context("records directory missing")?;
        let (results, retention) = open_stores(&records_dir).await?;

        let mut sweeper =
            RetentionSweeper::new(Arc::new(retention), Duration::from_secs(config.ttl_secs))
                .with_result_store(Arc::new(results))
                .with_scan_exclude(&records_dir);
        if let Some(root) = &config.output_root {
            sweeper = sweeper.with_output_root(root);
        }

        info!(
            "Sweeping {} (ttl {}s{})",
            records_dir.display(),
            config.ttl_secs,
            config
                .output_root
                .as_ref()
                .map(|r| format!(", output root {}", r.display()))
                .unwrap_or_default()
        );

        if !self.watch {
            let report = sweeper
                .sweep_once(chrono::Utc::now())
                .await
                .context("Sweep failed")?;
            print_report(&report, self.format);
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping sweeper");
                stop.cancel();
            }
        });

        let interval = Duration::from_secs(config.sweep_interval_secs);
        info!("Watching, sweep every {}s", interval.as_secs());
        let sweeps = sweeper.run(interval, cancel).await;
        info!("Sweeper ran {} times", sweeps);
        Ok(())
    }
}

fn print_report(report: &SweepReport, format: OutputFormat) {
    match format {
        OutputFormat::Jsonl => println!(
            "{}",
            serde_json::json!({
                "type": "sweep",
                "files_removed": report.files_removed,
                "files_missing": report.files_missing,
                "records_removed": report.records_removed,
                "rows_deleted": report.rows_deleted,
                "orphans_removed": report.orphans_removed,
                "errors": report.errors,
            })
        ),
        OutputFormat::Text => println!(
            "Removed {} files ({} already gone), {} records, {} result rows, {} stale files; {} errors",
            report.files_removed,
            report.files_missing,
            report.records_removed,
            report.rows_deleted,
            report.orphans_removed,
            report.errors
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        cmd: SweepCommand,
    }

    #[test]
    fn test_flags_win() {
        let cmd = Wrapper::try_parse_from([
            "sweep",
            "--records-dir",
            "/var/records",
            "--ttl-secs",
            "120",
            "--interval-secs",
            "5",
        ])
        .unwrap()
        .cmd;
        let config = cmd.resolve().unwrap();
        assert_eq!(config.records_dir, Some(PathBuf::from("/var/records")));
        assert_eq!(config.ttl_secs, 120);
        assert_eq!(config.sweep_interval_secs, 5);
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let cmd = Wrapper::try_parse_from(["sweep", "--records-dir", "/r", "--ttl-secs", "0"])
            .unwrap()
            .cmd;
        assert!(cmd.resolve().is_err());
    }

    #[tokio::test]
    async fn test_single_sweep_runs() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records");
        let cmd = Wrapper::try_parse_from([
            "sweep",
            "--records-dir",
            records.to_str().unwrap(),
            "--output-root",
            dir.path().to_str().unwrap(),
        ])
        .unwrap()
        .cmd;
        cmd.execute().await.unwrap();
        assert!(records.join("retention").is_dir());
    }
}
