//! `process` - analyse a batch of videos

use super::{open_stores, OutputFormat};
use anyhow::{Context as _, Result};
use clap::Args;
use patient_video_codec::BackendKind;
use patient_video_common::{ProcessingOutcome, VideoJob};
use patient_video_orchestrator::{AnalysisConfig, ClassifierKind, DetectorKind, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Args)]
pub struct ProcessCommand {
    /// Input video files
    #[arg(value_name = "FILES", required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for annotated output videos (none are written when omitted)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Maximum videos processed at once (0 = one per CPU)
    #[arg(long)]
    max_workers: Option<usize>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cancel any single video after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Classify every N processed frames
    #[arg(long)]
    classify_every: Option<u64>,

    /// Video backend: y4m or ffmpeg
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Detector: foreground or onnx
    #[arg(long)]
    detector: Option<DetectorKind>,

    /// ONNX detector model (implies --detector onnx)
    #[arg(long)]
    detector_model: Option<PathBuf>,

    /// Classifier: motion or onnx
    #[arg(long)]
    classifier: Option<ClassifierKind>,

    /// ONNX classifier model (implies --classifier onnx)
    #[arg(long)]
    classifier_model: Option<PathBuf>,

    /// Persist results and register outputs for retention in this directory
    #[arg(long)]
    records_dir: Option<PathBuf>,

    /// Tag stored with every result
    #[arg(long)]
    tag: Option<String>,
}

impl ProcessCommand {
    /// Defaults, then the YAML file, then environment, then flags
    fn build_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };
        config
            .apply_env_overrides()
            .context("Invalid PATIENT_VIDEO_* environment override")?;
        self.apply_flags(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply_flags(&self, config: &mut AnalysisConfig) {
        if let Some(n) = self.max_workers {
            config.max_workers = n;
        }
        if let Some(secs) = self.timeout_secs {
            config.job_timeout_secs = Some(secs);
        }
        if let Some(n) = self.classify_every {
            config.classify_every_n_frames = n;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(kind) = self.detector {
            config.models.detector = kind;
        }
        if let Some(path) = &self.detector_model {
            config.models.detector = DetectorKind::Onnx;
            config.models.detector_path = Some(path.clone());
        }
        if let Some(kind) = self.classifier {
            config.models.classifier = kind;
        }
        if let Some(path) = &self.classifier_model {
            config.models.classifier = ClassifierKind::Onnx;
            config.models.classifier_path = Some(path.clone());
        }
    }

    fn jobs(&self) -> Vec<VideoJob> {
        self.inputs
            .iter()
            .map(|path| {
                let mut job = VideoJob::new(path);
                if let Some(dir) = &self.output_dir {
                    job = job.with_output_dir(dir);
                }
                if let Some(tag) = &self.tag {
                    job = job.with_tag(tag);
                }
                job
            })
            .collect()
    }

    pub async fn execute(self) -> Result<()> {
        let config = self.build_config()?;
        let max_workers = config.max_workers;

        info!("=== patient-video process ===");
        info!("Input files: {}", self.inputs.len());
        if let Some(dir) = &self.output_dir {
            info!("Output directory: {}", dir.display());
        }

        let mut orchestrator = Orchestrator::new(config).context("Failed to set up orchestrator")?;
        if let Some(records_dir) = &self.records_dir {
            let (results, retention) = open_stores(records_dir).await?;
            orchestrator = orchestrator
                .with_result_store(Arc::new(results))
                .with_retention_store(Arc::new(retention));
            info!("Recording results in {}", records_dir.display());
        }

        let mut progress = orchestrator.subscribe_progress();
        let progress_task = tokio::spawn(async move {
            while let Some(event) = progress.recv().await {
                if event.percent % 10 == 0 {
                    info!("{}: {}%", event.video_path.display(), event.percent);
                } else {
                    debug!("{}: {}%", event.video_path.display(), event.percent);
                }
            }
        });

        let stop = orchestrator.stop_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current frames");
                stop.cancel();
            }
        });

        let start_time = Instant::now();
        let outcomes = orchestrator.process_videos(self.jobs(), max_workers).await;
        drop(orchestrator);
        // all senders are gone once the orchestrator is dropped
        let _ = progress_task.await;

        let total = outcomes.len();
        let failed = outcomes.iter().filter(|o| !o.success).count();
        for outcome in &outcomes {
            print_outcome(outcome, self.format)?;
        }

        let total_time = start_time.elapsed().as_secs_f64();
        match self.format {
            OutputFormat::Jsonl => println!(
                "{}",
                serde_json::json!({
                    "type": "summary",
                    "total_files": total,
                    "succeeded": total - failed,
                    "failed": failed,
                    "total_time_s": total_time,
                })
            ),
            OutputFormat::Text => {
                info!("=== Processing Complete ===");
                info!("Total files: {}", total);
                info!("Succeeded: {}", total - failed);
                info!("Failed: {}", failed);
                info!("Total time: {:.2}s", total_time);
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} of {total} videos failed");
        }
        Ok(())
    }
}

fn print_outcome(outcome: &ProcessingOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Jsonl => {
            let line = serde_json::to_string(outcome).context("Failed to serialise outcome")?;
            println!("{line}");
        }
        OutputFormat::Text => {
            let mark = if outcome.success { "✓" } else { "✗" };
            println!(
                "{} {} - {} ({} frames, {:.1}s)",
                mark,
                outcome.video_path.display(),
                outcome.message,
                outcome.frames_processed,
                outcome.duration_secs
            );
            if let Some(output) = &outcome.output_path {
                println!("    output: {}", output.display());
            }
            for result in &outcome.results {
                println!("    {}  {}", result.time_range_label(), result.label);
            }
        }
    }
    Ok(())
}
