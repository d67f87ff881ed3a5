/// Mapping between model input and source frame coordinates
use crate::DetectionBox;
use patient_video_codec::LetterboxInfo;
use serde::{Deserialize, Serialize};

/// Box in source frame pixels (corner format, `x2`/`y2` exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    #[must_use]
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clip to a `width` x `height` frame
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        }
    }
}

/// Rescale a box from letterboxed model input to the original frame.
///
/// Removes the padding, divides by the letterbox gain, clips to the frame and
/// rounds to whole pixels.
#[must_use]
pub fn scale_coords(
    detection: &DetectionBox,
    letterbox: &LetterboxInfo,
    original: (u32, u32),
) -> PixelBox {
    let (w0, h0) = (original.0 as f32, original.1 as f32);
    let (w1, h1) = (letterbox.input_width as f32, letterbox.input_height as f32);

    let gain = (h1 / h0).min(w1 / w0);
    let pad_x = (w1 - w0 * gain) / 2.0;
    let pad_y = (h1 - h0 * gain) / 2.0;

    let map = |v: f32, pad: f32, limit: f32| ((v - pad) / gain).clamp(0.0, limit).round() as u32;

    PixelBox {
        x1: map(detection.x1, pad_x, w0),
        y1: map(detection.y1, pad_y, h0),
        x2: map(detection.x2, pad_x, w0),
        y2: map(detection.y2, pad_y, h0),
    }
}
