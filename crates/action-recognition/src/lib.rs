//! Periodic patient state classification
//!
//! Cropped patches around the tracked patient are buffered per video and handed
//! to a [`Classifier`] as one short clip every N frames.
//!
//! # Features
//! - Bounded crop buffer ([`CropBuffer`]) with fixed-size patches
//! - Frame-count trigger and clip time window ([`ClipScheduler`])
//! - Motion-energy heuristic classifier (no ML model required)
//! - 3D-CNN clip classifier on ONNX Runtime (`onnx` feature)
//!
//! # Labels
//! - **Seizure**: clip shows ictal movement
//! - **Interictal**: everything else

pub mod buffer;
pub mod motion;
pub mod schedule;

#[cfg(feature = "onnx")]
pub mod onnx;

use image::RgbImage;
use patient_video_common::ProcessingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use buffer::{crop_patch, CropBuffer};
pub use motion::{MotionClassifier, MotionClassifierConfig};
pub use schedule::ClipScheduler;

/// Classification errors
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Empty clip: nothing to classify")]
    EmptyClip,
    #[error("Patch size mismatch: expected {expected}x{expected}, got {width}x{height}")]
    PatchSize {
        expected: u32,
        width: u32,
        height: u32,
    },
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference error: {0}")]
    Inference(String),
}

impl From<ClassificationError> for ProcessingError {
    fn from(err: ClassificationError) -> Self {
        ProcessingError::Classification(err.to_string())
    }
}

/// Patient state categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum PatientState {
    Seizure,
    Interictal,
}

impl PatientState {
    /// Map the model's argmax class index onto a state
    #[must_use]
    pub fn from_class_index(index: usize) -> Self {
        if index == 1 {
            PatientState::Seizure
        } else {
            PatientState::Interictal
        }
    }
}

impl std::fmt::Display for PatientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatientState::Seizure => write!(f, "Seizure"),
            PatientState::Interictal => write!(f, "Interictal"),
        }
    }
}

/// Batched clip classifier capability
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Label one clip of equally sized patches, oldest first
    fn classify_batch(&self, patches: &[RgbImage]) -> Result<String, ClassificationError>;
}
