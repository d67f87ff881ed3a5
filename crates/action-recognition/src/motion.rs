/// Heuristic clip classifier based on inter-frame pixel change
use crate::{ClassificationError, Classifier, PatientState};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for the motion heuristic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionClassifierConfig {
    /// Mean normalised frame difference (0-1) above which a clip counts as a seizure
    pub seizure_threshold: f32,
    /// Compare every Nth pixel
    pub sample_step: usize,
    /// Expected patch edge length
    pub patch_size: u32,
}

impl Default for MotionClassifierConfig {
    fn default() -> Self {
        Self {
            seizure_threshold: 0.08,
            sample_step: 4,
            patch_size: 112,
        }
    }
}

/// Labels a clip by how much consecutive patches differ
#[derive(Debug, Clone, Default)]
pub struct MotionClassifier {
    config: MotionClassifierConfig,
}

impl MotionClassifier {
    #[must_use]
    pub fn new(config: MotionClassifierConfig) -> Self {
        Self { config }
    }

    /// Mean absolute difference between consecutive patches, normalised to 0-1
    pub fn motion_score(&self, patches: &[RgbImage]) -> Result<f32, ClassificationError> {
        if patches.is_empty() {
            return Err(ClassificationError::EmptyClip);
        }
        let expected = self.config.patch_size;
        if let Some(bad) = patches.iter().find(|p| p.dimensions() != (expected, expected)) {
            return Err(ClassificationError::PatchSize {
                expected,
                width: bad.width(),
                height: bad.height(),
            });
        }
        if patches.len() < 2 {
            return Ok(0.0);
        }

        let step = self.config.sample_step.max(1);
        let mut total = 0.0f32;
        for pair in patches.windows(2) {
            let mut diff = 0u64;
            let mut count = 0u64;
            for (p1, p2) in pair[0].pixels().step_by(step).zip(pair[1].pixels().step_by(step)) {
                for (c1, c2) in p1.0.iter().zip(p2.0.iter()) {
                    diff += u64::from(c1.abs_diff(*c2));
                    count += 1;
                }
            }
            if count > 0 {
                total += diff as f32 / count as f32 / 255.0;
            }
        }

        Ok((total / (patches.len() - 1) as f32).clamp(0.0, 1.0))
    }
}

impl Classifier for MotionClassifier {
    fn name(&self) -> &str {
        "motion-heuristic"
    }

    fn classify_batch(&self, patches: &[RgbImage]) -> Result<String, ClassificationError> {
        let score = self.motion_score(patches)?;
        let state = if score > self.config.seizure_threshold {
            PatientState::Seizure
        } else {
            PatientState::Interictal
        };
        debug!(
            "Motion score {:.3} over {} patches -> {}",
            score,
            patches.len(),
            state
        );
        Ok(state.to_string())
    }
}
