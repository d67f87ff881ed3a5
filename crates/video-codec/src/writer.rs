/// Annotated video output
use crate::VideoBackend;
use image::{imageops, RgbImage};
use patient_video_common::{ProcessingError, Result, VideoDims};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encodes a buffered frame sequence to a file and checks the result
#[derive(Clone)]
pub struct VideoWriter {
    backend: Arc<dyn VideoBackend>,
}

impl VideoWriter {
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn output_extension(&self) -> &'static str {
        self.backend.output_extension()
    }

    /// Write `frames` to `output_path` and return the size of the file.
    ///
    /// Invalid `dims` are recovered from the first frame before giving up. The
    /// encoder is opened only when there is something to write and is always
    /// finished, even after a failed frame write.
    ///
    /// # Errors
    ///
    /// - `InvalidDimensions` when neither `dims` nor the frames give a usable size
    /// - `EmptyOutputFile` when the finished file is missing or has zero length
    pub fn write(
        &self,
        output_path: &Path,
        frames: &[RgbImage],
        dims: VideoDims,
        fps: f64,
    ) -> Result<u64> {
        let dims = if dims.is_valid() {
            dims
        } else {
            let recovered = frames
                .first()
                .map(|f| VideoDims::new(f.width(), f.height()))
                .filter(VideoDims::is_valid)
                .ok_or(ProcessingError::InvalidDimensions {
                    width: dims.width,
                    height: dims.height,
                })?;
            warn!(
                "Invalid output dimensions {} for {}, using first frame size {}",
                dims,
                output_path.display(),
                recovered
            );
            recovered
        };

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !frames.is_empty() {
            let mut encoder = self.backend.open_encoder(output_path, dims, fps)?;

            let mut write_result = Ok(());
            for (index, frame) in frames.iter().enumerate() {
                let result = if frame.dimensions() == (dims.width, dims.height) {
                    encoder.write_frame(frame)
                } else {
                    warn!(
                        "Frame {} is {}x{}, resizing to {}",
                        index,
                        frame.width(),
                        frame.height(),
                        dims
                    );
                    let resized = imageops::resize(
                        frame,
                        dims.width,
                        dims.height,
                        imageops::FilterType::Triangle,
                    );
                    encoder.write_frame(&resized)
                };
                if let Err(e) = result {
                    write_result = Err(e);
                    break;
                }
            }

            let finish_result = encoder.finish();
            write_result?;
            finish_result?;
        }

        let size = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(ProcessingError::EmptyOutputFile(output_path.to_path_buf()));
        }

        debug!("Encoded {} frames ({} bytes)", frames.len(), size);
        info!("Wrote {}", output_path.display());
        Ok(size)
    }
}
