/// Per-video subject tracking with last-box fallback
use crate::geometry::{scale_coords, PixelBox};
use crate::DetectionBox;
use patient_video_codec::LetterboxInfo;

/// Outcome of one tracking step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDecision {
    /// Detector found the subject this frame
    Fresh(PixelBox),
    /// Detector missed; reusing the last known box
    Coasting(PixelBox),
    /// Detector missed and nothing to fall back on
    NoSubject,
}

impl TrackDecision {
    #[must_use]
    pub fn subject(&self) -> Option<PixelBox> {
        match self {
            TrackDecision::Fresh(b) | TrackDecision::Coasting(b) => Some(*b),
            TrackDecision::NoSubject => None,
        }
    }
}

/// Counters for one video
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingStats {
    pub fresh: u64,
    pub coasted: u64,
    pub missed: u64,
}

/// Fresh detection beats coasting, coasting beats no subject.
///
/// Owned by exactly one video task; reset at every video boundary.
#[derive(Debug, Default)]
pub struct TrackingPolicy {
    last_box: Option<PixelBox>,
    stats: TrackingStats,
}

impl TrackingPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one frame given that frame's detections.
    ///
    /// The highest-scoring box wins (first one on ties). It is rescaled to
    /// `original` (width, height) pixels and remembered for later misses.
    pub fn update(
        &mut self,
        detections: &[DetectionBox],
        letterbox: &LetterboxInfo,
        original: (u32, u32),
    ) -> TrackDecision {
        let best = detections.iter().fold(None::<&DetectionBox>, |best, det| match best {
            Some(b) if b.score >= det.score => Some(b),
            _ => Some(det),
        });

        match (best, self.last_box) {
            (Some(det), _) => {
                let scaled = scale_coords(det, letterbox, original);
                self.last_box = Some(scaled);
                self.stats.fresh += 1;
                TrackDecision::Fresh(scaled)
            }
            (None, Some(last)) => {
                self.stats.coasted += 1;
                TrackDecision::Coasting(last)
            }
            (None, None) => {
                self.stats.missed += 1;
                TrackDecision::NoSubject
            }
        }
    }

    #[must_use]
    pub fn last_box(&self) -> Option<PixelBox> {
        self.last_box
    }

    #[must_use]
    pub fn stats(&self) -> TrackingStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.last_box = None;
        self.stats = TrackingStats::default();
    }
}
