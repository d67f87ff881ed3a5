//! Model registry
//!
//! Detector and classifier are chosen by kind once at startup and shared,
//! read-only, by every video task.

use crate::config::AnalysisConfig;
use patient_video_action::{Classifier, MotionClassifier, MotionClassifierConfig};
use patient_video_common::{ProcessingError, Result};
use patient_video_detection::{Detector, ForegroundDetector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Available detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Contrast-based foreground box, needs no model file
    #[default]
    Foreground,
    /// YOLO export run through ONNX Runtime
    Onnx,
}

/// Available clip classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Frame-difference heuristic, needs no model file
    #[default]
    Motion,
    /// 3D CNN run through ONNX Runtime
    Onnx,
}

impl std::str::FromStr for DetectorKind {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "foreground" => Ok(Self::Foreground),
            "onnx" | "yolo" => Ok(Self::Onnx),
            other => Err(ProcessingError::InvalidConfig(format!(
                "unknown detector '{other}' (expected foreground or onnx)"
            ))),
        }
    }
}

impl std::str::FromStr for ClassifierKind {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "motion" => Ok(Self::Motion),
            "onnx" => Ok(Self::Onnx),
            other => Err(ProcessingError::InvalidConfig(format!(
                "unknown classifier '{other}' (expected motion or onnx)"
            ))),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Foreground => "foreground",
            Self::Onnx => "onnx",
        })
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Motion => "motion",
            Self::Onnx => "onnx",
        })
    }
}

/// The resolved detector and classifier
#[derive(Clone)]
pub struct ModelRegistry {
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("detector", &self.detector.name())
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

impl ModelRegistry {
    /// Use already constructed models
    pub fn new(detector: Arc<dyn Detector>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            detector,
            classifier,
        }
    }

    /// Build the models named in `config.models`
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let detector = resolve_detector(config)?;
        let classifier = resolve_classifier(config)?;
        info!(
            "Models resolved: detector={}, classifier={}",
            detector.name(),
            classifier.name()
        );
        Ok(Self::new(detector, classifier))
    }

    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }
}

fn resolve_detector(config: &AnalysisConfig) -> Result<Arc<dyn Detector>> {
    match config.models.detector {
        DetectorKind::Foreground => Ok(Arc::new(
            ForegroundDetector::new(config.detector_config())
                .with_min_contrast(config.models.foreground_min_contrast),
        )),
        DetectorKind::Onnx => load_onnx_detector(config),
    }
}

fn resolve_classifier(config: &AnalysisConfig) -> Result<Arc<dyn Classifier>> {
    match config.models.classifier {
        ClassifierKind::Motion => Ok(Arc::new(MotionClassifier::new(MotionClassifierConfig {
            seizure_threshold: config.models.motion_threshold,
            patch_size: config.crop_size,
            ..MotionClassifierConfig::default()
        }))),
        ClassifierKind::Onnx => load_onnx_classifier(config),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx_detector(config: &AnalysisConfig) -> Result<Arc<dyn Detector>> {
    let path = config.models.detector_path.as_deref().ok_or_else(|| {
        ProcessingError::InvalidConfig("onnx detector needs models.detector_path".to_string())
    })?;
    let detector =
        patient_video_detection::onnx::OnnxDetector::load(path, config.detector_config())?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_detector(_config: &AnalysisConfig) -> Result<Arc<dyn Detector>> {
    Err(ProcessingError::InvalidConfig(
        "onnx detector requested but this build lacks the `onnx` feature".to_string(),
    ))
}

#[cfg(feature = "onnx")]
fn load_onnx_classifier(config: &AnalysisConfig) -> Result<Arc<dyn Classifier>> {
    let path = config.models.classifier_path.as_deref().ok_or_else(|| {
        ProcessingError::InvalidConfig("onnx classifier needs models.classifier_path".to_string())
    })?;
    let classifier = patient_video_action::onnx::OnnxClassifier::load(path, config.crop_size)?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_classifier(_config: &AnalysisConfig) -> Result<Arc<dyn Classifier>> {
    Err(ProcessingError::InvalidConfig(
        "onnx classifier requested but this build lacks the `onnx` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Foreground".parse::<DetectorKind>().unwrap(), DetectorKind::Foreground);
        assert_eq!("yolo".parse::<DetectorKind>().unwrap(), DetectorKind::Onnx);
        assert_eq!("motion".parse::<ClassifierKind>().unwrap(), ClassifierKind::Motion);
        assert!("resnet".parse::<ClassifierKind>().is_err());
        assert_eq!(DetectorKind::Onnx.to_string(), "onnx");
    }

    #[test]
    fn test_default_registry() {
        let registry = ModelRegistry::from_config(&AnalysisConfig::default()).unwrap();
        assert_eq!(registry.detector().name(), "foreground");
        assert_eq!(registry.classifier().name(), "motion-heuristic");
    }

    #[test]
    fn test_onnx_detector_needs_a_model() {
        let mut config = AnalysisConfig::default();
        config.models.detector = DetectorKind::Onnx;
        assert!(ModelRegistry::from_config(&config).is_err());
    }
}
