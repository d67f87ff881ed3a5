//! Single-video pipeline
//!
//! decode → preprocess → detect → track → crop buffer → periodic classify →
//! annotate → encode. Everything mutable lives in [`PerVideoTask`], which runs
//! on exactly one blocking worker thread.

use crate::config::AnalysisConfig;
use crate::models::ModelRegistry;
use chrono::{DateTime, Local};
use image::RgbImage;
use patient_video_action::{crop_patch, ClipScheduler, CropBuffer};
use patient_video_codec::{
    DecodedFrame, FrameEvent, FrameSource, VideoBackend, VideoWriter,
};
use patient_video_common::{
    ActionResult, ProcessingError, ProcessingOutcome, ProgressEvent, Result, VideoDims, VideoJob,
};
use patient_video_detection::{annotate_frame, TrackDecision, TrackingPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Marker between the source stem and the timestamp in output names
pub const OUTPUT_MARKER: &str = "_VD_processed_";

/// `{stem}_VD_processed_{YYYYmmddHHMMSS}_{suffix}.{ext}`
#[must_use]
pub fn output_file_name(source: &Path, at: DateTime<Local>, suffix: &str, extension: &str) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("video");
    format!(
        "{stem}{OUTPUT_MARKER}{}_{suffix}.{extension}",
        at.format("%Y%m%d%H%M%S")
    )
}

/// Random suffix keeping concurrent outputs of the same source apart
fn unique_suffix() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Lifecycle of one video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Opening,
    Streaming,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

/// Read-only pieces shared by every task of a run
#[derive(Clone)]
pub struct TaskContext {
    pub config: Arc<AnalysisConfig>,
    pub models: ModelRegistry,
    pub backend: Arc<dyn VideoBackend>,
    pub stop: CancellationToken,
    pub progress: Option<UnboundedSender<ProgressEvent>>,
}

/// Per-video mutable state, reset at every video boundary except `output_frames`
struct TaskState {
    tracker: TrackingPolicy,
    frame_count: u64,
    crop_buffer: CropBuffer,
    output_frames: Vec<RgbImage>,
    video_dims: Option<VideoDims>,
}

impl TaskState {
    fn new(crop_capacity: usize) -> Self {
        Self {
            tracker: TrackingPolicy::new(),
            frame_count: 0,
            crop_buffer: CropBuffer::new(crop_capacity),
            output_frames: Vec::new(),
            video_dims: None,
        }
    }

    fn reset_video(&mut self) {
        self.tracker.reset();
        self.frame_count = 0;
        self.crop_buffer.clear();
    }
}

/// Runs one [`VideoJob`] to a [`ProcessingOutcome`]
pub struct PerVideoTask {
    job: VideoJob,
    ctx: TaskContext,
    phase: TaskPhase,
    state: TaskState,
    results: Vec<ActionResult>,
    frames_read: u64,
    fps: f64,
    total_frames: Option<u64>,
    last_percent: Option<u8>,
    deadline: Option<Instant>,
}

impl PerVideoTask {
    pub fn new(job: VideoJob, ctx: TaskContext) -> Self {
        let crop_capacity = usize::try_from(ctx.config.classify_every_n_frames).unwrap_or(usize::MAX);
        let fps = ctx.config.default_fps;
        Self {
            job,
            ctx,
            phase: TaskPhase::Opening,
            state: TaskState::new(crop_capacity),
            results: Vec::new(),
            frames_read: 0,
            fps,
            total_frames: None,
            last_percent: None,
            deadline: None,
        }
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Run to completion. Never fails: errors become a failed outcome.
    pub fn run(mut self) -> ProcessingOutcome {
        let started = Instant::now();
        self.deadline = self.ctx.config.job_timeout().map(|t| started + t);
        info!("Processing {}", self.job.path.display());

        match self.execute() {
            Ok(outcome) => {
                self.enter(TaskPhase::Done);
                self.emit_progress(100);
                info!(
                    "Finished {} in {:.2}s: {} frames, {} results",
                    self.job.path.display(),
                    started.elapsed().as_secs_f64(),
                    outcome.frames_processed,
                    outcome.results.len()
                );
                outcome
            }
            Err(e) if e.is_cancelled() => {
                self.enter(TaskPhase::Cancelled);
                info!("Cancelled {} after {} frames", self.job.path.display(), self.frames_read);
                ProcessingOutcome::cancelled(&self.job.path)
            }
            Err(e) => {
                self.enter(TaskPhase::Failed);
                warn!("Failed {}: {}", self.job.path.display(), e);
                ProcessingOutcome::from_error(&self.job.path, &e)
            }
        }
    }

    fn execute(&mut self) -> Result<ProcessingOutcome> {
        self.check_stop()?;

        let config = Arc::clone(&self.ctx.config);
        let source = FrameSource::open(self.ctx.backend.as_ref(), &self.job.path, config.letterbox())?;
        let info = source.info();
        if let Some(fps) = info.fps.filter(|f| f.is_finite() && *f > 0.0) {
            self.fps = fps;
        }
        self.total_frames = info.frame_count.filter(|&n| n > 0);
        let scheduler = ClipScheduler::new(
            config.classify_every_n_frames,
            self.fps,
            config.clip_duration_secs,
        );
        debug!(
            "Opened {} ({}, {:.2} fps, {:?} frames)",
            self.job.path.display(),
            info.dims,
            self.fps,
            self.total_frames
        );

        self.enter(TaskPhase::Streaming);
        for event in source {
            self.check_stop()?;
            match event {
                FrameEvent::Frame(decoded) => self.process_frame(decoded, &scheduler),
                FrameEvent::VideoBoundary { dims } => {
                    debug!(
                        "Video boundary in {} after {} frames ({})",
                        self.job.path.display(),
                        self.state.frame_count,
                        dims
                    );
                    if self.state.video_dims.is_none() && dims.is_valid() {
                        self.state.video_dims = Some(dims);
                    }
                    self.log_tracking();
                    self.state.reset_video();
                }
                FrameEvent::StreamExhausted => break,
            }
        }

        self.enter(TaskPhase::Finalizing);
        self.finalize()
    }

    fn process_frame(&mut self, decoded: DecodedFrame, scheduler: &ClipScheduler) {
        let config = &self.ctx.config;
        if self.state.video_dims.is_none() {
            self.state.video_dims = Some(decoded.dims);
        }

        let detections = match self.ctx.models.detector().detect(&decoded.frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!(
                    "Detection failed on frame {} of {}: {}",
                    decoded.index,
                    self.job.path.display(),
                    e
                );
                Vec::new()
            }
        };

        let original_size = decoded.frame.original_size();
        let decision = self
            .state
            .tracker
            .update(&detections, &decoded.frame.letterbox, original_size);
        if decision == TrackDecision::NoSubject {
            debug!("No subject in frame {}", decoded.index);
        }

        let mut frame = decoded.frame.original;
        let subject = decision.subject();
        self.state
            .crop_buffer
            .push(crop_patch(&frame, subject.as_ref(), config.crop_size));
        if let Some(subject) = subject {
            annotate_frame(&mut frame, &subject, config.line_thickness);
        }
        self.state.output_frames.push(frame);

        self.state.frame_count += 1;
        self.frames_read += 1;

        if scheduler.should_fire(self.state.frame_count, self.state.crop_buffer.len()) {
            let clip = self.state.crop_buffer.take();
            let (start, end) = scheduler.window(self.state.frame_count);
            match self.ctx.models.classifier().classify_batch(&clip) {
                Ok(label) => {
                    debug!("{:.1}-{:.1}s: {}", start, end, label);
                    self.results.push(ActionResult::new(start, end, label));
                }
                Err(e) => warn!(
                    "Classification failed for {:.1}-{:.1}s of {}: {}",
                    start,
                    end,
                    self.job.path.display(),
                    e
                ),
            }
        }

        if let Some(total) = self.total_frames {
            let percent = (self.state.frame_count.saturating_mul(100) / total).min(100);
            self.emit_progress(u8::try_from(percent).unwrap_or(100));
        }
    }

    fn finalize(&mut self) -> Result<ProcessingOutcome> {
        self.log_tracking();
        if self.state.output_frames.is_empty() {
            return Err(ProcessingError::unreadable(
                &self.job.path,
                "no frames could be read",
            ));
        }
        debug_assert_eq!(self.state.output_frames.len() as u64, self.frames_read);

        let duration = self.frames_read as f64 / self.fps;
        if self.results.is_empty() {
            self.results.push(ActionResult::placeholder(duration));
        }

        let output_path = match self.job.output_dir.clone() {
            Some(dir) => {
                self.check_stop()?;
                Some(self.write_output(&dir)?)
            }
            None => None,
        };

        Ok(ProcessingOutcome::completed(
            &self.job.path,
            output_path,
            std::mem::take(&mut self.results),
            self.frames_read,
            duration,
        ))
    }

    fn write_output(&mut self, dir: &Path) -> Result<PathBuf> {
        let writer = VideoWriter::new(Arc::clone(&self.ctx.backend));
        let name = output_file_name(
            &self.job.path,
            Local::now(),
            &unique_suffix(),
            writer.output_extension(),
        );
        let output_path = dir.join(name);
        let dims = self.state.video_dims.unwrap_or(VideoDims::new(0, 0));
        let frames = std::mem::take(&mut self.state.output_frames);

        let bytes = writer.write(&output_path, &frames, dims, self.fps)?;
        info!(
            "Wrote {} frames to {} ({} bytes)",
            frames.len(),
            output_path.display(),
            bytes
        );
        Ok(output_path)
    }

    fn log_tracking(&self) {
        let stats = self.state.tracker.stats();
        debug!(
            "Tracking {}: {} fresh, {} coasted, {} without subject",
            self.job.path.display(),
            stats.fresh,
            stats.coasted,
            stats.missed
        );
    }

    fn enter(&mut self, phase: TaskPhase) {
        debug!("{}: {:?} -> {:?}", self.job.path.display(), self.phase, phase);
        self.phase = phase;
    }

    fn check_stop(&self) -> Result<()> {
        if self.ctx.stop.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            warn!("Timeout reached for {}", self.job.path.display());
            return Err(ProcessingError::Cancelled);
        }
        Ok(())
    }

    /// Send only when the integer percentage moves forward
    fn emit_progress(&mut self, percent: u8) {
        if self.last_percent.is_some_and(|last| percent <= last) {
            return;
        }
        self.last_percent = Some(percent);
        if let Some(tx) = &self.ctx.progress {
            // receiver gone means nobody is listening
            let _ = tx.send(ProgressEvent {
                video_path: self.job.path.clone(),
                percent,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_output_file_name() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let name = output_file_name(Path::new("/data/bed 4/night.y4m"), at, "a1b2c3d4", "y4m");
        assert_eq!(name, "night_VD_processed_20240309070501_a1b2c3d4.y4m");

        let name = output_file_name(Path::new("/"), at, "x", "mp4");
        assert!(name.starts_with("video_VD_processed_"));
    }

    #[test]
    fn test_unique_suffix() {
        let a = unique_suffix();
        assert_eq!(a.len(), 8);
        assert_ne!(a, unique_suffix());
    }
}
