/// Model-free detector: the bounding box of pixels that stand out from the
/// frame's mean luminance.
///
/// Useful for fixed ward cameras with a plain background and as the default
/// when no ONNX model is configured.
use crate::{filter_and_suppress, DetectionBox, DetectionError, Detector, DetectorConfig};
use patient_video_codec::PreprocessedFrame;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ForegroundDetector {
    config: DetectorConfig,
    /// Minimum |luma - mean| (0-1) for a foreground pixel
    min_contrast: f32,
    /// Minimum foreground share of the frame area
    min_area_fraction: f32,
}

impl ForegroundDetector {
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            min_contrast: 0.25,
            min_area_fraction: 0.002,
        }
    }

    #[must_use]
    pub fn with_min_contrast(mut self, min_contrast: f32) -> Self {
        self.min_contrast = min_contrast;
        self
    }
}

impl Detector for ForegroundDetector {
    fn name(&self) -> &str {
        "foreground"
    }

    fn detect(&self, frame: &PreprocessedFrame) -> Result<Vec<DetectionBox>, DetectionError> {
        let tensor = &frame.tensor;
        let (channels, height, width) = tensor.dim();
        if channels != 3 {
            return Err(DetectionError::OutputShape(format!(
                "expected 3 channel input, got {channels}"
            )));
        }

        // Image area inside the letterbox padding
        let info = &frame.letterbox;
        let (ow, oh) = frame.original_size();
        let x0 = info.pad_left as usize;
        let y0 = info.pad_top as usize;
        let x_end = (x0 + (ow as f32 * info.ratio).round() as usize).min(width);
        let y_end = (y0 + (oh as f32 * info.ratio).round() as usize).min(height);
        if x_end <= x0 || y_end <= y0 {
            return Ok(Vec::new());
        }

        let luma = |y: usize, x: usize| {
            0.299 * tensor[[0, y, x]] + 0.587 * tensor[[1, y, x]] + 0.114 * tensor[[2, y, x]]
        };

        let area = ((x_end - x0) * (y_end - y0)) as f32;
        let mut sum = 0.0f32;
        for y in y0..y_end {
            for x in x0..x_end {
                sum += luma(y, x);
            }
        }
        let mean = sum / area;

        let mut count = 0usize;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);
        for y in y0..y_end {
            for x in x0..x_end {
                if (luma(y, x) - mean).abs() > self.min_contrast {
                    count += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if count == 0 || (count as f32) < self.min_area_fraction * area {
            return Ok(Vec::new());
        }

        let box_area = ((max_x - min_x + 1) * (max_y - min_y + 1)) as f32;
        let density = count as f32 / box_area;
        debug!(
            "Foreground: {} px, box {}..{} x {}..{}, density {:.2}",
            count, min_x, max_x, min_y, max_y, density
        );

        let candidate = DetectionBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
            density,
            0,
        );
        Ok(filter_and_suppress(vec![candidate], &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use patient_video_codec::Letterbox;

    fn letterbox() -> Letterbox {
        Letterbox {
            target: 64,
            ..Letterbox::default()
        }
    }

    #[test]
    fn test_finds_bright_square() {
        let mut image = RgbImage::new(64, 64);
        for y in 20..30 {
            for x in 8..18 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let frame = letterbox().preprocess(image);
        let detector = ForegroundDetector::new(DetectorConfig::default());

        let boxes = detector.detect(&frame).unwrap();
        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (8.0, 20.0, 18.0, 30.0));
        assert!((b.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_blank_frame_has_no_detection() {
        let frame = letterbox().preprocess(RgbImage::new(64, 48));
        let detector = ForegroundDetector::new(DetectorConfig::default());
        assert!(detector.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_padding_is_ignored() {
        // 64x32 frame gets 16px grey bands; a black frame must stay empty
        let frame = Letterbox {
            auto: false,
            ..letterbox()
        }
        .preprocess(RgbImage::new(64, 32));
        assert_eq!(frame.letterbox.pad_top, 16);
        let detector = ForegroundDetector::new(DetectorConfig::default()).with_min_contrast(0.1);
        assert!(detector.detect(&frame).unwrap().is_empty());
    }
}
