/// Common types shared by the patient video analysis crates
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Label used when the classifier never fired for a video
pub const NO_ACTIVITY_LABEL: &str = "no activity detected";

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Video unreadable: {path}: {reason}")]
    VideoUnreadable { path: PathBuf, reason: String },

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Output file is missing or empty: {0}")]
    EmptyOutputFile(PathBuf),

    #[error("cancelled")]
    Cancelled,

    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupted file: {0}")]
    CorruptedFile(String),

    #[error("FFmpeg error: {0}")]
    FFmpegError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ProcessingError {
    pub fn unreadable(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        ProcessingError::VideoUnreadable {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Cancellation is an outcome state rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessingError::Cancelled)
    }
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Pixel dimensions of a decoded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoDims {
    pub width: u32,
    pub height: u32,
}

impl VideoDims {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Error out unless both edges are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ProcessingError::InvalidDimensions {
                width: self.width,
                height: self.height,
            })
        }
    }
}

impl fmt::Display for VideoDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single video submitted for analysis. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoJob {
    pub path: PathBuf,
    /// Directory for the annotated output video; no video is written when absent
    pub output_dir: Option<PathBuf>,
    /// Owner or tag carried through to persistence
    pub tag: Option<String>,
}

impl VideoJob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output_dir: None,
            tag: None,
        }
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// A labelled time window produced by the action classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub start_secs: f64,
    pub end_secs: f64,
    pub label: String,
}

impl ActionResult {
    pub fn new(start_secs: f64, end_secs: f64, label: impl Into<String>) -> Self {
        Self {
            start_secs,
            end_secs,
            label: label.into(),
        }
    }

    /// Placeholder spanning the whole video
    #[must_use]
    pub fn placeholder(duration_secs: f64) -> Self {
        Self::new(0.0, duration_secs, NO_ACTIVITY_LABEL)
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.label == NO_ACTIVITY_LABEL
    }

    /// Human readable window, e.g. `0.0-3.0s`
    #[must_use]
    pub fn time_range_label(&self) -> String {
        format!("{:.1}-{:.1}s", self.start_secs, self.end_secs)
    }
}

/// Terminal state of a processed video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Result of processing a single video. Always produced, even on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub video_path: PathBuf,
    pub success: bool,
    pub status: OutcomeStatus,
    pub output_path: Option<PathBuf>,
    pub results: Vec<ActionResult>,
    pub message: String,
    pub frames_processed: u64,
    pub duration_secs: f64,
}

impl ProcessingOutcome {
    pub fn completed(
        video_path: impl Into<PathBuf>,
        output_path: Option<PathBuf>,
        results: Vec<ActionResult>,
        frames_processed: u64,
        duration_secs: f64,
    ) -> Self {
        Self {
            video_path: video_path.into(),
            success: true,
            status: OutcomeStatus::Completed,
            output_path,
            results,
            message: "processed".to_string(),
            frames_processed,
            duration_secs,
        }
    }

    pub fn failed(video_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            video_path: video_path.into(),
            success: false,
            status: OutcomeStatus::Failed,
            output_path: None,
            results: Vec::new(),
            message: message.into(),
            frames_processed: 0,
            duration_secs: 0.0,
        }
    }

    pub fn cancelled(video_path: impl Into<PathBuf>) -> Self {
        Self {
            status: OutcomeStatus::Cancelled,
            message: "cancelled".to_string(),
            ..Self::failed(video_path, "cancelled")
        }
    }

    /// Map a task error onto an outcome, keeping cancellation distinct
    pub fn from_error(video_path: impl Into<PathBuf>, err: &ProcessingError) -> Self {
        if err.is_cancelled() {
            Self::cancelled(video_path)
        } else {
            Self::failed(video_path, err.to_string())
        }
    }
}

/// Progress notification for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub video_path: PathBuf,
    pub percent: u8,
}
