/// Lazy frame source over one video
use crate::preprocess::{Letterbox, PreprocessedFrame};
use crate::{CaptureInfo, VideoBackend, VideoCapture};
use image::RgbImage;
use patient_video_common::{ProcessingError, Result, VideoDims};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Give up on a stream after this many corrupt frames in a row
const MAX_CONSECUTIVE_CORRUPT: u32 = 32;

/// One decoded and preprocessed frame
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Zero-based index among yielded frames
    pub index: u64,
    pub is_first: bool,
    pub dims: VideoDims,
    pub frame: PreprocessedFrame,
}

/// Events produced by a [`FrameSource`]
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Frame(DecodedFrame),
    /// The video ended; carries the last measured dimensions
    VideoBoundary { dims: VideoDims },
    StreamExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Streaming,
    BoundaryEmitted,
    Done,
}

/// Forward-only, non-restartable sequence of [`FrameEvent`]s.
///
/// Opening probes the first frame so that unreadable inputs fail before any
/// event is produced. Corrupt frames are skipped with a warning.
pub struct FrameSource {
    path: PathBuf,
    capture: Box<dyn VideoCapture>,
    letterbox: Letterbox,
    info: CaptureInfo,
    pending: Option<RgbImage>,
    last_dims: VideoDims,
    yielded: u64,
    skipped: u64,
    state: SourceState,
}

impl FrameSource {
    pub fn open(backend: &dyn VideoBackend, path: &Path, letterbox: Letterbox) -> Result<Self> {
        if !path.is_file() {
            return Err(ProcessingError::unreadable(path, "file does not exist"));
        }

        let capture = backend.open_capture(path).map_err(|e| match e {
            ProcessingError::VideoUnreadable { .. } => e,
            other => ProcessingError::unreadable(path, other.to_string()),
        })?;
        let info = capture.info();

        let mut source = Self {
            path: path.to_path_buf(),
            capture,
            letterbox,
            info,
            pending: None,
            last_dims: info.dims,
            yielded: 0,
            skipped: 0,
            state: SourceState::Streaming,
        };

        match source.read_next() {
            Some(first) => source.pending = Some(first),
            None => {
                return Err(ProcessingError::unreadable(
                    path,
                    "no frames could be decoded",
                ))
            }
        }

        debug!(
            "Frame source ready: {} via {} ({}, fps {:?})",
            path.display(),
            backend.name(),
            info.dims,
            info.fps
        );
        Ok(source)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn info(&self) -> CaptureInfo {
        self.info
    }

    /// Frames handed out so far
    #[must_use]
    pub fn frames_yielded(&self) -> u64 {
        self.yielded
    }

    /// Corrupt frames skipped so far
    #[must_use]
    pub fn frames_skipped(&self) -> u64 {
        self.skipped
    }

    fn read_next(&mut self) -> Option<RgbImage> {
        let mut consecutive = 0;
        loop {
            match self.capture.read_frame() {
                Ok(frame) => return frame,
                Err(ProcessingError::CorruptedFile(reason)) => {
                    self.skipped += 1;
                    consecutive += 1;
                    warn!("Skipping corrupt frame in {}: {}", self.path.display(), reason);
                    if consecutive >= MAX_CONSECUTIVE_CORRUPT {
                        warn!(
                            "{} consecutive corrupt frames in {}, ending stream",
                            consecutive,
                            self.path.display()
                        );
                        return None;
                    }
                }
                Err(e) => {
                    warn!(
                        "Decode error in {} after {} frames, ending stream: {}",
                        self.path.display(),
                        self.yielded,
                        e
                    );
                    return None;
                }
            }
        }
    }
}

impl Iterator for FrameSource {
    type Item = FrameEvent;

    fn next(&mut self) -> Option<FrameEvent> {
        match self.state {
            SourceState::Streaming => {
                let frame = match self.pending.take() {
                    Some(frame) => Some(frame),
                    None => self.read_next(),
                };
                match frame {
                    Some(image) => {
                        let dims = VideoDims::new(image.width(), image.height());
                        self.last_dims = dims;
                        let index = self.yielded;
                        self.yielded += 1;
                        Some(FrameEvent::Frame(DecodedFrame {
                            index,
                            is_first: index == 0,
                            dims,
                            frame: self.letterbox.preprocess(image),
                        }))
                    }
                    None => {
                        self.state = SourceState::BoundaryEmitted;
                        Some(FrameEvent::VideoBoundary {
                            dims: self.last_dims,
                        })
                    }
                }
            }
            SourceState::BoundaryEmitted => {
                self.state = SourceState::Done;
                Some(FrameEvent::StreamExhausted)
            }
            SourceState::Done => None,
        }
    }
}
