//! YOLO detector on ONNX Runtime
//!
//! Accepts both common export layouts:
//! - v8 style `(1, 4 + classes, anchors)` with class scores only
//! - v5 style `(1, anchors, 5 + classes)` with an objectness column

use crate::{filter_and_suppress, DetectionBox, DetectionError, Detector, DetectorConfig};
use ndarray::Axis;
use ort::{session::Session, value::TensorRef};
use patient_video_codec::PreprocessedFrame;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

pub struct OnnxDetector {
    session: Mutex<Session>,
    config: DetectorConfig,
}

impl OnnxDetector {
    /// Load an exported YOLO model
    pub fn load(model_path: &Path, config: DetectorConfig) -> Result<Self, DetectionError> {
        info!("Loading YOLO model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

        info!("YOLO model loaded successfully");
        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &str {
        "yolo-onnx"
    }

    fn detect(&self, frame: &PreprocessedFrame) -> Result<Vec<DetectionBox>, DetectionError> {
        let input = frame.tensor.view().insert_axis(Axis(0));
        let input_tensor = TensorRef::from_array_view(input)
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            DetectionError::Inference(format!("Failed to extract tensor: {e}"))
        })?;
        debug!("ONNX output shape: {:?}", shape);

        let candidates = decode_yolo_output(shape.as_ref(), data, self.config.confidence_threshold)?;
        Ok(filter_and_suppress(candidates, &self.config))
    }
}

/// Decode raw YOLO output into center-converted candidate boxes.
///
/// Only candidates scoring above `conf_threshold` are returned.
pub fn decode_yolo_output(
    dims: &[i64],
    data: &[f32],
    conf_threshold: f32,
) -> Result<Vec<DetectionBox>, DetectionError> {
    if dims.len() != 3 || dims[0] != 1 {
        return Err(DetectionError::OutputShape(format!(
            "expected (1, a, b) output, got {dims:?}"
        )));
    }
    let (a, b) = (dims[1] as usize, dims[2] as usize);
    if data.len() < a * b {
        return Err(DetectionError::OutputShape(format!(
            "output holds {} values, shape needs {}",
            data.len(),
            a * b
        )));
    }

    let mut candidates = Vec::new();

    if a < b {
        // v8: features x anchors, data[feature * anchors + anchor]
        let (features, anchors) = (a, b);
        if features < 5 {
            return Err(DetectionError::OutputShape(format!("{features} features per anchor")));
        }
        let get = |feature: usize, anchor: usize| data[feature * anchors + anchor];

        for anchor in 0..anchors {
            let (class_id, score) = (4..features)
                .map(|f| (f - 4, get(f, anchor)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score > conf_threshold {
                candidates.push(DetectionBox::from_center(
                    get(0, anchor),
                    get(1, anchor),
                    get(2, anchor),
                    get(3, anchor),
                    score,
                    class_id,
                ));
            }
        }
    } else {
        // v5: anchors x (box, objectness, classes)
        let (anchors, features) = (a, b);
        if features < 6 {
            return Err(DetectionError::OutputShape(format!("{features} features per anchor")));
        }

        for row in data[..anchors * features].chunks_exact(features) {
            let objectness = row[4];
            if objectness <= conf_threshold {
                continue;
            }
            let (class_id, class_score) = row[5..]
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            let score = objectness * class_score;
            if score > conf_threshold {
                candidates.push(DetectionBox::from_center(
                    row[0], row[1], row[2], row[3], score, class_id,
                ));
            }
        }
    }

    Ok(candidates)
}
