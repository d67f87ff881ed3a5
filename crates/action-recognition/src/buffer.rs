/// Crop extraction and the per-video patch buffer
use image::{imageops, RgbImage};
use patient_video_detection::PixelBox;
use std::collections::VecDeque;
use tracing::debug;

/// Cut `subject` out of `frame` and resize it to a `size` x `size` patch.
///
/// Without a usable subject box the whole frame is resized instead.
#[must_use]
pub fn crop_patch(frame: &RgbImage, subject: Option<&PixelBox>, size: u32) -> RgbImage {
    let region = subject
        .map(|b| b.clamp_to(frame.width(), frame.height()))
        .filter(|b| !b.is_empty());

    match region {
        Some(b) => {
            let region = imageops::crop_imm(frame, b.x1, b.y1, b.width(), b.height()).to_image();
            imageops::resize(&region, size, size, imageops::FilterType::Triangle)
        }
        None => imageops::resize(frame, size, size, imageops::FilterType::Triangle),
    }
}

/// Bounded FIFO of patches awaiting classification.
///
/// When full, the oldest patch is dropped to make room.
#[derive(Debug)]
pub struct CropBuffer {
    patches: VecDeque<RgbImage>,
    capacity: usize,
    dropped: u64,
}

impl CropBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            patches: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, patch: RgbImage) {
        if self.patches.len() == self.capacity {
            self.patches.pop_front();
            self.dropped += 1;
            debug!("Crop buffer full ({}), dropped oldest patch", self.capacity);
        }
        self.patches.push_back(patch);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Patches dropped for lack of room since creation
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Remove and return all buffered patches, oldest first
    pub fn take(&mut self) -> Vec<RgbImage> {
        self.patches.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.patches.clear();
    }
}
