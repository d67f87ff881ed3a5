//! Patient localisation
//!
//! A [`Detector`] turns a letterboxed frame into candidate boxes in model input
//! coordinates. [`TrackingPolicy`] picks the primary box per frame, maps it back
//! to source pixels and coasts on the last known box when the detector misses.
//!
//! # Features
//! - Confidence filtering and class-aware non-maximum suppression (NMS)
//! - Inverse letterbox mapping with clipping ([`scale_coords`])
//! - Box annotation in the output palette colour
//! - Contrast-based foreground detector needing no model files
//! - YOLO (v5 and v8 output layouts) on ONNX Runtime (`onnx` feature)

pub mod annotate;
pub mod foreground;
pub mod geometry;
pub mod tracking;

#[cfg(feature = "onnx")]
pub mod onnx;

use patient_video_codec::PreprocessedFrame;
use patient_video_common::ProcessingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use annotate::{annotate_frame, BOX_COLOR};
pub use foreground::ForegroundDetector;
pub use geometry::{scale_coords, PixelBox};
pub use tracking::{TrackDecision, TrackingPolicy};

/// Detection thresholds shared by every detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum confidence score (0-1)
    pub confidence_threshold: f32,
    /// `IoU` threshold for NMS (0-1)
    pub iou_threshold: f32,
    /// Maximum boxes kept after NMS
    pub max_detections: usize,
    /// Keep only these class ids (None = all)
    pub classes: Option<Vec<usize>>,
    /// Suppress across classes instead of per class
    pub agnostic_nms: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 5,
            classes: None,
            agnostic_nms: false,
        }
    }
}

/// Candidate box in model input coordinates (corner format)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
}

impl DetectionBox {
    #[must_use]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: usize) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score,
            class_id,
        }
    }

    /// Build from center format (cx, cy, w, h)
    #[must_use]
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, score: f32, class_id: usize) -> Self {
        Self::new(
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
            score,
            class_id,
        )
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Calculate Intersection over Union (`IoU`) with another box
    #[must_use]
    #[inline]
    pub fn iou(&self, other: &DetectionBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Error types for detection
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Unexpected model output: {0}")]
    OutputShape(String),
}

impl From<DetectionError> for ProcessingError {
    fn from(err: DetectionError) -> Self {
        ProcessingError::Detection(err.to_string())
    }
}

/// Single-frame detector capability
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Boxes for one frame, NMS already applied, best first
    fn detect(&self, frame: &PreprocessedFrame) -> Result<Vec<DetectionBox>, DetectionError>;
}

/// Drop low-confidence and filtered-out candidates, then apply NMS
#[must_use]
pub fn filter_and_suppress(
    candidates: Vec<DetectionBox>,
    config: &DetectorConfig,
) -> Vec<DetectionBox> {
    let candidates: Vec<DetectionBox> = candidates
        .into_iter()
        .filter(|b| b.score > config.confidence_threshold)
        .filter(|b| {
            config
                .classes
                .as_ref()
                .map_or(true, |classes| classes.contains(&b.class_id))
        })
        .collect();
    debug!("Raw detections before NMS: {}", candidates.len());
    non_max_suppression(candidates, config)
}

/// Greedy NMS, best score first, truncated to `max_detections`
#[must_use]
pub fn non_max_suppression(
    mut detections: Vec<DetectionBox>,
    config: &DetectorConfig,
) -> Vec<DetectionBox> {
    // Sort by confidence (highest first)
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::with_capacity(detections.len().min(config.max_detections));

    while !detections.is_empty() && keep.len() < config.max_detections {
        // remove(0) keeps the remaining candidates sorted
        let current = detections.remove(0);

        detections.retain(|det| {
            (!config.agnostic_nms && det.class_id != current.class_id)
                || det.iou(&current) <= config.iou_threshold
        });

        keep.push(current);
    }

    debug!("Detections after NMS: {}", keep.len());
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = DetectionBox::new(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        let b = DetectionBox::new(5.0, 0.0, 15.0, 10.0, 0.8, 0);
        let iou = a.iou(&b);
        // 50 / 150
        assert!((iou - 1.0 / 3.0).abs() < 1e-6);

        let far = DetectionBox::new(100.0, 100.0, 110.0, 110.0, 0.8, 0);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_from_center() {
        let b = DetectionBox::from_center(50.0, 40.0, 20.0, 10.0, 0.5, 0);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (40.0, 35.0, 60.0, 45.0));
        assert_eq!(b.center(), (50.0, 40.0));
        assert_eq!(b.area(), 200.0);
    }

    #[test]
    fn test_nms_suppresses_overlaps_per_class() {
        let config = DetectorConfig::default();
        let boxes = vec![
            DetectionBox::new(0.0, 0.0, 10.0, 10.0, 0.7, 0),
            DetectionBox::new(1.0, 1.0, 10.0, 10.0, 0.9, 0),
            DetectionBox::new(1.0, 1.0, 10.0, 10.0, 0.8, 1),
            DetectionBox::new(50.0, 50.0, 60.0, 60.0, 0.6, 0),
        ];
        let kept = non_max_suppression(boxes, &config);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].class_id, 1);
        assert_eq!(kept[2].score, 0.6);
    }

    #[test]
    fn test_nms_agnostic_and_max_detections() {
        let config = DetectorConfig {
            agnostic_nms: true,
            max_detections: 1,
            ..DetectorConfig::default()
        };
        let boxes = vec![
            DetectionBox::new(1.0, 1.0, 10.0, 10.0, 0.8, 1),
            DetectionBox::new(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            DetectionBox::new(50.0, 50.0, 60.0, 60.0, 0.6, 0),
        ];
        let kept = non_max_suppression(boxes, &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_id, 0);
    }

    #[test]
    fn test_filter_thresholds_and_classes() {
        let config = DetectorConfig {
            classes: Some(vec![0]),
            ..DetectorConfig::default()
        };
        let boxes = vec![
            DetectionBox::new(0.0, 0.0, 10.0, 10.0, 0.25, 0),
            DetectionBox::new(20.0, 20.0, 30.0, 30.0, 0.3, 0),
            DetectionBox::new(40.0, 40.0, 50.0, 50.0, 0.9, 2),
        ];
        let kept = filter_and_suppress(boxes, &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.3);
    }

    #[test]
    fn test_detection_error_maps_to_processing_error() {
        let err: ProcessingError = DetectionError::Inference("boom".to_string()).into();
        assert!(matches!(err, ProcessingError::Detection(msg) if msg.contains("boom")));
    }
}
