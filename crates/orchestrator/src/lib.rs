//! Concurrent patient video analysis
//!
//! Turns a batch of [`VideoJob`]s into isolated [`PerVideoTask`]s and runs them
//! on a bounded pool of blocking workers. One outcome comes back per job, in
//! completion order; a failing video never takes its siblings down.
//!
//! ```rust,no_run
//! use patient_video_common::VideoJob;
//! use patient_video_orchestrator::{AnalysisConfig, Orchestrator};
//!
//! # async fn run() -> patient_video_common::Result<()> {
//! let orchestrator = Orchestrator::new(AnalysisConfig::default())?;
//! let jobs = vec![VideoJob::new("bed4_night.y4m").with_output_dir("out")];
//! for outcome in orchestrator.process_videos(jobs, 4).await {
//!     println!("{}: {}", outcome.video_path.display(), outcome.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod models;
pub mod task;

pub use config::{AnalysisConfig, ModelsConfig};
pub use models::{ClassifierKind, DetectorKind, ModelRegistry};
pub use task::{output_file_name, PerVideoTask, TaskContext, TaskPhase, OUTPUT_MARKER};

use patient_video_codec::{open_backend, VideoBackend};
use patient_video_common::{ProcessingOutcome, ProgressEvent, Result, VideoJob};
use patient_video_storage::{RetentionRecord, RetentionStore, ResultStore};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs video jobs under a bounded worker budget
pub struct Orchestrator {
    config: Arc<AnalysisConfig>,
    models: ModelRegistry,
    backend: Arc<dyn VideoBackend>,
    results: Option<Arc<dyn ResultStore>>,
    retention: Option<Arc<dyn RetentionStore>>,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    stop: CancellationToken,
}

impl Orchestrator {
    /// Validate `config` and resolve its backend and models
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let models = ModelRegistry::from_config(&config)?;
        Self::with_models(config, models)
    }

    /// Use caller-supplied models instead of the ones named in `config`
    pub fn with_models(config: AnalysisConfig, models: ModelRegistry) -> Result<Self> {
        config.validate()?;
        let backend = open_backend(config.backend)?;
        info!(
            "Orchestrator ready: backend={}, max_workers={}, classify every {} frames",
            backend.name(),
            config.resolved_max_workers(),
            config.classify_every_n_frames
        );
        Ok(Self {
            config: Arc::new(config),
            models,
            backend,
            results: None,
            retention: None,
            progress: None,
            stop: CancellationToken::new(),
        })
    }

    /// Save every successful outcome
    #[must_use]
    pub fn with_result_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.results = Some(store);
        self
    }

    /// Register every written output for expiry
    #[must_use]
    pub fn with_retention_store(mut self, store: Arc<dyn RetentionStore>) -> Self {
        self.retention = Some(store);
        self
    }

    /// Stream `{video_path, percent}` events while processing
    pub fn subscribe_progress(&mut self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.progress = Some(tx);
        rx
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Ask running tasks to stop at their next frame
    pub fn stop(&self) {
        info!("Stop requested");
        self.stop.cancel();
    }

    /// Token that fires when [`Orchestrator::stop`] is called
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// `min(max_workers, jobs)`, at least one; 0 workers means one per CPU
    #[must_use]
    pub fn effective_workers(&self, max_workers: usize, jobs: usize) -> usize {
        let max_workers = if max_workers == 0 {
            self.config.resolved_max_workers()
        } else {
            max_workers
        };
        max_workers.min(jobs).max(1)
    }

    /// Process `paths`, writing annotated videos to `output_dir` when given
    pub async fn process_paths(
        &self,
        paths: Vec<PathBuf>,
        output_dir: Option<PathBuf>,
        max_workers: usize,
    ) -> Vec<ProcessingOutcome> {
        let jobs = paths
            .into_iter()
            .map(|path| {
                let job = VideoJob::new(path);
                match &output_dir {
                    Some(dir) => job.with_output_dir(dir),
                    None => job,
                }
            })
            .collect();
        self.process_videos(jobs, max_workers).await
    }

    /// Run every job and return one outcome each, in completion order
    pub async fn process_videos(
        &self,
        jobs: Vec<VideoJob>,
        max_workers: usize,
    ) -> Vec<ProcessingOutcome> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let total = jobs.len();
        let workers = self.effective_workers(max_workers, total);
        let semaphore = Arc::new(Semaphore::new(workers));
        let started = Instant::now();
        info!("=== Processing {} videos on {} workers ===", total, workers);

        let ctx = TaskContext {
            config: Arc::clone(&self.config),
            models: self.models.clone(),
            backend: Arc::clone(&self.backend),
            stop: self.stop.clone(),
            progress: self.progress.clone(),
        };

        let mut set = JoinSet::new();
        let mut paths = HashMap::with_capacity(total);
        for job in jobs {
            let path = job.path.clone();
            let semaphore = Arc::clone(&semaphore);
            let ctx = ctx.clone();
            let results = self.results.clone();
            let retention = self.retention.clone();
            let ttl_secs = self.config.retention_ttl_seconds;

            let handle = set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ProcessingOutcome::failed(&job.path, "worker pool closed");
                };
                let video_path = job.path.clone();
                let tag = job.tag.clone();

                let outcome = match tokio::task::spawn_blocking(move || {
                    PerVideoTask::new(job, ctx).run()
                })
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Worker for {} panicked: {}", video_path.display(), e);
                        ProcessingOutcome::failed(&video_path, format!("worker panicked: {e}"))
                    }
                };

                persist(&outcome, tag.as_deref(), results, retention, ttl_secs).await;
                outcome
            });
            paths.insert(handle.id(), path);
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(e) => {
                    let path = paths.get(&e.id()).cloned().unwrap_or_default();
                    error!("Task for {} aborted: {}", path.display(), e);
                    outcomes.push(ProcessingOutcome::failed(path, format!("task aborted: {e}")));
                }
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            "=== Processed {} videos in {:.2}s: {} succeeded, {} failed or cancelled ===",
            total,
            started.elapsed().as_secs_f64(),
            succeeded,
            total - succeeded
        );
        outcomes
    }
}

/// Save the outcome and register its output for expiry. Failures are logged only.
async fn persist(
    outcome: &ProcessingOutcome,
    tag: Option<&str>,
    results: Option<Arc<dyn ResultStore>>,
    retention: Option<Arc<dyn RetentionStore>>,
    ttl_secs: u64,
) {
    if !outcome.success {
        return;
    }

    let record_id = match &results {
        Some(store) => match store.save_result(outcome, tag).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to save result for {}: {}", outcome.video_path.display(), e);
                None
            }
        },
        None => None,
    };

    if let (Some(store), Some(output)) = (&retention, &outcome.output_path) {
        let record = RetentionRecord::new(output, &outcome.video_path, ttl_secs, record_id);
        if let Err(e) = store.insert(record).await {
            warn!("Failed to register {} for retention: {}", output.display(), e);
        }
    }
}
