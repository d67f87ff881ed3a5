//! Analysis configuration
//!
//! Layered as: defaults, then an optional YAML file, then `PATIENT_VIDEO_*`
//! environment variables, then whatever the caller sets explicitly (CLI flags).

use crate::models::{ClassifierKind, DetectorKind};
use patient_video_codec::{BackendKind, Letterbox};
use patient_video_common::{ProcessingError, Result};
use patient_video_detection::DetectorConfig;
use patient_video_storage::DEFAULT_RETENTION_TTL_SECS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Prefix of every recognised environment variable
pub const ENV_PREFIX: &str = "PATIENT_VIDEO_";

/// Which models to load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub detector: DetectorKind,
    pub detector_path: Option<PathBuf>,
    pub classifier: ClassifierKind,
    pub classifier_path: Option<PathBuf>,
    /// Luma contrast (0-1) the foreground detector needs to call a pixel subject
    pub foreground_min_contrast: f32,
    /// Motion score (0-1) above which the motion classifier reports a seizure
    pub motion_threshold: f32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            detector_path: None,
            classifier: ClassifierKind::default(),
            classifier_path: None,
            foreground_min_contrast: 0.25,
            motion_threshold: 0.08,
        }
    }
}

/// Everything a run of the orchestrator needs to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Concurrent videos; 0 means one per CPU
    pub max_workers: usize,
    pub classify_every_n_frames: u64,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Detector input edge length
    pub input_size: u32,
    pub stride: u32,
    /// Pad to a stride multiple rather than the full square
    pub letterbox_auto: bool,
    pub pad_color: u8,
    /// Box outline width in pixels
    pub line_thickness: u32,
    /// Edge length of classifier patches
    pub crop_size: u32,
    /// Used when the container does not declare a frame rate
    pub default_fps: f64,
    /// Seconds covered by one classified clip; `classify_every_n_frames / fps` when unset
    pub clip_duration_secs: Option<f64>,
    pub job_timeout_secs: Option<u64>,
    pub retention_ttl_seconds: u64,
    pub sweep_interval_secs: u64,
    pub backend: BackendKind,
    pub models: ModelsConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            classify_every_n_frames: 60,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 5,
            input_size: 640,
            stride: 32,
            letterbox_auto: true,
            pad_color: 114,
            line_thickness: 5,
            crop_size: 112,
            default_fps: 20.0,
            clip_duration_secs: None,
            job_timeout_secs: None,
            retention_ttl_seconds: DEFAULT_RETENTION_TTL_SECS,
            sweep_interval_secs: 3600,
            backend: BackendKind::default(),
            models: ModelsConfig::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ProcessingError::InvalidConfig(format!("{ENV_PREFIX}{key}={value}: {e}")))
}

impl AnalysisConfig {
    /// Load from a YAML file; missing keys keep their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProcessingError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ProcessingError::InvalidConfig(format!("invalid YAML config: {e}")))
    }

    /// Apply `PATIENT_VIDEO_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from `lookup`, which receives keys without the prefix
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MAX_WORKERS") {
            self.max_workers = parse_var("MAX_WORKERS", &v)?;
        }
        if let Some(v) = get("CLASSIFY_EVERY_N_FRAMES") {
            self.classify_every_n_frames = parse_var("CLASSIFY_EVERY_N_FRAMES", &v)?;
        }
        if let Some(v) = get("CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_var("CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("IOU_THRESHOLD") {
            self.iou_threshold = parse_var("IOU_THRESHOLD", &v)?;
        }
        if let Some(v) = get("JOB_TIMEOUT_SECS") {
            self.job_timeout_secs = Some(parse_var("JOB_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("RETENTION_TTL_SECS") {
            self.retention_ttl_seconds = parse_var("RETENTION_TTL_SECS", &v)?;
        }
        if let Some(v) = get("SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_var("SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = get("DETECTOR") {
            self.models.detector = v.parse()?;
        }
        if let Some(v) = get("DETECTOR_MODEL") {
            self.models.detector_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CLASSIFIER") {
            self.models.classifier = v.parse()?;
        }
        if let Some(v) = get("CLASSIFIER_MODEL") {
            self.models.classifier_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ProcessingError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {v}"
                )))
            }
        };
        let nonzero = |name: &str, v: u64| {
            if v > 0 {
                Ok(())
            } else {
                Err(ProcessingError::InvalidConfig(format!("{name} must be greater than 0")))
            }
        };

        unit("confidence_threshold", self.confidence_threshold)?;
        unit("iou_threshold", self.iou_threshold)?;
        unit("models.foreground_min_contrast", self.models.foreground_min_contrast)?;
        unit("models.motion_threshold", self.models.motion_threshold)?;
        nonzero("classify_every_n_frames", self.classify_every_n_frames)?;
        nonzero("max_detections", self.max_detections as u64)?;
        nonzero("input_size", u64::from(self.input_size))?;
        nonzero("stride", u64::from(self.stride))?;
        nonzero("crop_size", u64::from(self.crop_size))?;
        nonzero("retention_ttl_seconds", self.retention_ttl_seconds)?;
        nonzero("sweep_interval_secs", self.sweep_interval_secs)?;

        if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
            return Err(ProcessingError::InvalidConfig(format!(
                "default_fps must be positive, got {}",
                self.default_fps
            )));
        }
        if let Some(secs) = self.clip_duration_secs {
            if !(secs.is_finite() && secs >= 0.0) {
                return Err(ProcessingError::InvalidConfig(format!(
                    "clip_duration_secs must be non-negative, got {secs}"
                )));
            }
        }
        if self.models.detector == DetectorKind::Onnx && self.models.detector_path.is_none() {
            return Err(ProcessingError::InvalidConfig(
                "onnx detector selected without models.detector_path".to_string(),
            ));
        }
        if self.models.classifier == ClassifierKind::Onnx && self.models.classifier_path.is_none() {
            return Err(ProcessingError::InvalidConfig(
                "onnx classifier selected without models.classifier_path".to_string(),
            ));
        }
        debug!("Configuration validated: {:?}", self);
        Ok(())
    }

    /// Worker count with the "one per CPU" default resolved
    #[must_use]
    pub fn resolved_max_workers(&self) -> usize {
        if self.max_workers == 0 {
            num_cpus::get()
        } else {
            self.max_workers
        }
    }

    #[must_use]
    pub fn letterbox(&self) -> Letterbox {
        Letterbox {
            target: self.input_size,
            stride: self.stride,
            auto: self.letterbox_auto,
            pad_color: self.pad_color,
        }
    }

    #[must_use]
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
            ..DetectorConfig::default()
        }
    }

    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn retention_ttl(&self) -> Duration {
        Duration::from_secs(self.retention_ttl_seconds)
    }
}
