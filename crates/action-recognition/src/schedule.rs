/// When to classify and which time window a clip covers
use serde::{Deserialize, Serialize};

/// Fires every `every_n_frames` processed frames.
///
/// The covered window ends at `frame_count / fps` and spans `clip_secs`,
/// clamped so it never starts before zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipScheduler {
    every_n_frames: u64,
    fps: f64,
    clip_secs: f64,
}

impl ClipScheduler {
    /// `clip_secs` defaults to the trigger period (`every_n_frames / fps`)
    #[must_use]
    pub fn new(every_n_frames: u64, fps: f64, clip_secs: Option<f64>) -> Self {
        let every_n_frames = every_n_frames.max(1);
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
        let clip_secs = clip_secs
            .filter(|s| s.is_finite() && *s >= 0.0)
            .unwrap_or(every_n_frames as f64 / fps);
        Self {
            every_n_frames,
            fps,
            clip_secs,
        }
    }

    #[must_use]
    pub fn fps(&self) -> f64 {
        self.fps
    }

    #[must_use]
    pub fn every_n_frames(&self) -> u64 {
        self.every_n_frames
    }

    /// `frame_count` counts frames processed so far, including the current one
    #[must_use]
    pub fn should_fire(&self, frame_count: u64, buffered: usize) -> bool {
        frame_count > 0 && frame_count % self.every_n_frames == 0 && buffered > 0
    }

    /// Time window (seconds) of a clip ending at `frame_count`
    #[must_use]
    pub fn window(&self, frame_count: u64) -> (f64, f64) {
        let end = self.seconds(frame_count);
        ((end - self.clip_secs).max(0.0), end)
    }

    #[must_use]
    pub fn seconds(&self, frames: u64) -> f64 {
        frames as f64 / self.fps
    }
}
