//! 3D-CNN clip classifier on ONNX Runtime
//!
//! Input is `(1, 3, T, S, S)` float32 with raw 0-255 values, channels in BGR
//! order; output logits are argmax-mapped through [`PatientState::from_class_index`].

use crate::{ClassificationError, Classifier, PatientState};
use image::RgbImage;
use ndarray::Array5;
use ort::{session::Session, value::TensorRef};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

pub struct OnnxClassifier {
    session: Mutex<Session>,
    patch_size: u32,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path, patch_size: u32) -> Result<Self, ClassificationError> {
        info!("Loading clip classifier from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| ClassificationError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| ClassificationError::ModelLoad(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            patch_size,
        })
    }

    fn clip_tensor(&self, patches: &[RgbImage]) -> Result<Array5<f32>, ClassificationError> {
        let size = self.patch_size as usize;
        let mut input = Array5::<f32>::zeros((1, 3, patches.len(), size, size));

        for (t, patch) in patches.iter().enumerate() {
            if patch.dimensions() != (self.patch_size, self.patch_size) {
                return Err(ClassificationError::PatchSize {
                    expected: self.patch_size,
                    width: patch.width(),
                    height: patch.height(),
                });
            }
            for (x, y, pixel) in patch.enumerate_pixels() {
                let [r, g, b] = pixel.0;
                input[[0, 0, t, y as usize, x as usize]] = f32::from(b);
                input[[0, 1, t, y as usize, x as usize]] = f32::from(g);
                input[[0, 2, t, y as usize, x as usize]] = f32::from(r);
            }
        }
        Ok(input)
    }
}

/// Index of the largest logit (first on ties)
fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None::<(usize, f32)>, |best, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        "clip-onnx"
    }

    fn classify_batch(&self, patches: &[RgbImage]) -> Result<String, ClassificationError> {
        if patches.is_empty() {
            return Err(ClassificationError::EmptyClip);
        }
        let input = self.clip_tensor(patches)?;
        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassificationError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassificationError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ClassificationError::Inference(e.to_string()))?;

        let (shape, logits) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            ClassificationError::Inference(format!("Failed to extract tensor: {e}"))
        })?;
        debug!("Classifier output shape: {:?}", shape);

        let class = argmax(logits)
            .ok_or_else(|| ClassificationError::Inference("empty classifier output".to_string()))?;
        Ok(PatientState::from_class_index(class).to_string())
    }
}
