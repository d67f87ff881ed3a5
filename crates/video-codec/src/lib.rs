/// Video capture, preprocessing and encoding
///
/// Decoding and encoding go through the [`VideoBackend`] trait so the pipeline
/// does not care which container it is reading:
/// 1. **Y4M** (default, pure Rust): raw YUV4MPEG2 streams
/// 2. **FFmpeg** (`ffmpeg` feature): any container libavformat understands, H.264 mp4 output
pub mod preprocess;
pub mod source;
pub mod writer;
pub mod y4m;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use image::RgbImage;
use patient_video_common::{ProcessingError, Result, VideoDims};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use preprocess::{Letterbox, LetterboxInfo, PreprocessedFrame};
pub use source::{DecodedFrame, FrameEvent, FrameSource};
pub use writer::VideoWriter;
pub use y4m::Y4mBackend;

/// Stream properties reported when a capture is opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureInfo {
    pub dims: VideoDims,
    /// Source frame rate, if the container declares one
    pub fps: Option<f64>,
    /// Frame count estimate, if the container exposes one
    pub frame_count: Option<u64>,
}

/// A lazily decoding, forward-only video handle
pub trait VideoCapture: Send {
    fn info(&self) -> CaptureInfo;

    /// Decode the next frame as packed RGB.
    ///
    /// Returns `Ok(None)` at end of stream. A `CorruptedFile` error means that one
    /// frame was unusable and the capture is positioned after it.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// A frame sink for one output file
pub trait VideoEncoder: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush pending data and release the underlying file
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Factory for captures and encoders of one container family
pub trait VideoBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extension (without dot) of encoded outputs
    fn output_extension(&self) -> &'static str;

    fn open_capture(&self, path: &Path) -> Result<Box<dyn VideoCapture>>;

    fn open_encoder(
        &self,
        path: &Path,
        dims: VideoDims,
        fps: f64,
    ) -> Result<Box<dyn VideoEncoder>>;
}

/// Selectable codec backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Y4m,
    Ffmpeg,
}

impl std::str::FromStr for BackendKind {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "y4m" => Ok(BackendKind::Y4m),
            "ffmpeg" => Ok(BackendKind::Ffmpeg),
            other => Err(ProcessingError::InvalidConfig(format!(
                "unknown video backend '{other}' (expected y4m or ffmpeg)"
            ))),
        }
    }
}

/// Resolve a backend kind into a shareable backend instance
pub fn open_backend(kind: BackendKind) -> Result<Arc<dyn VideoBackend>> {
    match kind {
        BackendKind::Y4m => Ok(Arc::new(Y4mBackend)),
        #[cfg(feature = "ffmpeg")]
        BackendKind::Ffmpeg => Ok(Arc::new(ffmpeg::FfmpegBackend::new()?)),
        #[cfg(not(feature = "ffmpeg"))]
        BackendKind::Ffmpeg => Err(ProcessingError::InvalidConfig(
            "ffmpeg backend requested but this build lacks the `ffmpeg` feature".to_string(),
        )),
    }
}
