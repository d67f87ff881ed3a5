/// YUV4MPEG2 reader and writer
///
/// Reads 4:2:0 (all siting variants) and 4:4:4 streams, writes 4:4:4.
/// Colour conversion is BT.601 full range.
use crate::{CaptureInfo, VideoBackend, VideoCapture, VideoEncoder};
use image::RgbImage;
use patient_video_common::{ProcessingError, Result, VideoDims};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &str = "YUV4MPEG2";
const FRAME_MARKER: &[u8] = b"FRAME";
const MAX_LINE_LEN: u64 = 1024;
/// Largest frame payload accepted from a header (8K 4:4:4 with headroom)
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Chroma subsampling of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chroma {
    C420,
    C444,
}

impl Chroma {
    fn parse(tag: &str) -> Result<Self> {
        match tag {
            "420" | "420jpeg" | "420paldv" | "420mpeg2" => Ok(Chroma::C420),
            "444" => Ok(Chroma::C444),
            other => Err(ProcessingError::UnsupportedFormat(format!(
                "y4m colourspace C{other}"
            ))),
        }
    }

    fn plane_dims(self, width: usize, height: usize) -> (usize, usize) {
        match self {
            Chroma::C420 => (width.div_ceil(2), height.div_ceil(2)),
            Chroma::C444 => (width, height),
        }
    }
}

/// Parsed stream header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamHeader {
    pub dims: VideoDims,
    pub fps_num: u32,
    pub fps_den: u32,
    pub chroma: Chroma,
}

impl StreamHeader {
    /// Parse a header line (without its trailing newline)
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some(MAGIC) {
            return Err(ProcessingError::UnsupportedFormat(
                "missing YUV4MPEG2 signature".to_string(),
            ));
        }

        let mut width = None;
        let mut height = None;
        let mut rate = (0, 0);
        let mut chroma = Chroma::C420;

        for token in tokens {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => width = value.parse::<u32>().ok(),
                Some('H') => height = value.parse::<u32>().ok(),
                Some('F') => {
                    if let Some((num, den)) = value.split_once(':') {
                        rate = (num.parse().unwrap_or(0), den.parse().unwrap_or(0));
                    }
                }
                Some('C') => chroma = Chroma::parse(value)?,
                // Interlacing, aspect ratio and extensions do not affect decoding
                _ => {}
            }
        }

        let (Some(width), Some(height)) = (width, height) else {
            return Err(ProcessingError::CorruptedFile(
                "y4m header lacks width or height".to_string(),
            ));
        };
        let dims = VideoDims::new(width, height);
        dims.validate()?;

        Ok(Self {
            dims,
            fps_num: rate.0,
            fps_den: rate.1,
            chroma,
        })
    }

    #[must_use]
    pub fn fps(&self) -> Option<f64> {
        (self.fps_num > 0 && self.fps_den > 0)
            .then(|| f64::from(self.fps_num) / f64::from(self.fps_den))
    }

    /// Payload size of one frame (without the FRAME line), `None` on overflow
    #[must_use]
    pub fn frame_len(&self) -> Option<usize> {
        let w = self.dims.width as usize;
        let h = self.dims.height as usize;
        let (cw, ch) = self.chroma.plane_dims(w, h);
        let chroma = cw.checked_mul(ch)?.checked_mul(2)?;
        w.checked_mul(h)?.checked_add(chroma)
    }

    /// Frame payload size, rejecting headers no real stream could carry
    fn checked_frame_len(&self) -> Result<usize> {
        match self.frame_len() {
            Some(len) if len <= MAX_FRAME_BYTES => Ok(len),
            _ => Err(ProcessingError::CorruptedFile(format!(
                "y4m frame of {} exceeds {MAX_FRAME_BYTES} bytes",
                self.dims
            ))),
        }
    }

    fn to_line(self) -> String {
        let tag = match self.chroma {
            Chroma::C420 => "420jpeg",
            Chroma::C444 => "444",
        };
        format!(
            "{MAGIC} W{} H{} F{}:{} Ip A1:1 C{tag}\n",
            self.dims.width, self.dims.height, self.fps_num, self.fps_den
        )
    }

    fn to_rgb(self, payload: &[u8]) -> RgbImage {
        let w = self.dims.width as usize;
        let h = self.dims.height as usize;
        let (cw, ch) = self.chroma.plane_dims(w, h);
        let (y_plane, rest) = payload.split_at(w * h);
        let (u_plane, v_plane) = rest.split_at(cw * ch);

        RgbImage::from_fn(self.dims.width, self.dims.height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let (cx, cy) = match self.chroma {
                Chroma::C420 => (x / 2, y / 2),
                Chroma::C444 => (x, y),
            };
            image::Rgb(yuv_to_rgb(
                y_plane[y * w + x],
                u_plane[cy * cw + cx],
                v_plane[cy * cw + cx],
            ))
        })
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;
    [
        clamp_u8(y + 1.402 * v),
        clamp_u8(y - 0.344_136 * u - 0.714_136 * v),
        clamp_u8(y + 1.772 * u),
    ]
}

fn rgb_to_yuv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    [
        clamp_u8(0.299 * r + 0.587 * g + 0.114 * b),
        clamp_u8(-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0),
        clamp_u8(0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0),
    ]
}

/// Frame rate as the rational a Y4M header carries
fn fps_to_rational(fps: f64) -> (u32, u32) {
    if !(fps.is_finite() && fps > 0.0) {
        return (30, 1);
    }
    if (fps - fps.round()).abs() < 1e-6 {
        (fps.round() as u32, 1)
    } else {
        ((fps * 1000.0).round() as u32, 1000)
    }
}

/// Forward-only Y4M decoder
pub struct Y4mCapture {
    path: PathBuf,
    reader: BufReader<File>,
    header: StreamHeader,
    frame_count: u64,
    payload: Vec<u8>,
    frames_read: u64,
}

impl Y4mCapture {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ProcessingError::unreadable(path, e.to_string()))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut line = Vec::new();
        (&mut reader).take(MAX_LINE_LEN).read_until(b'\n', &mut line)?;
        if line.last() != Some(&b'\n') {
            return Err(ProcessingError::unreadable(path, "missing YUV4MPEG2 header"));
        }
        let text = std::str::from_utf8(&line[..line.len() - 1])
            .map_err(|_| ProcessingError::unreadable(path, "header is not ASCII"))?;
        let header =
            StreamHeader::parse(text).map_err(|e| ProcessingError::unreadable(path, e.to_string()))?;

        let frame_len = header
            .checked_frame_len()
            .map_err(|e| ProcessingError::unreadable(path, e.to_string()))?;
        let per_frame = (frame_len + FRAME_MARKER.len() + 1) as u64;
        let body_len = file_len.saturating_sub(line.len() as u64);
        // a header with no frames at all is reported by the first read
        if body_len > 0 && per_frame > body_len {
            return Err(ProcessingError::unreadable(
                path,
                format!("header promises {per_frame} bytes per frame, file holds {body_len}"),
            ));
        }
        let frame_count = body_len / per_frame;

        debug!(
            "Opened {} ({}, {:?} fps, ~{} frames)",
            path.display(),
            header.dims,
            header.fps(),
            frame_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            payload: vec![0; frame_len],
            header,
            frame_count,
            frames_read: 0,
        })
    }

    #[must_use]
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }
}

impl VideoCapture for Y4mCapture {
    fn info(&self) -> CaptureInfo {
        CaptureInfo {
            dims: self.header.dims,
            fps: self.header.fps(),
            frame_count: Some(self.frame_count),
        }
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut marker = Vec::with_capacity(16);
        let n = (&mut self.reader)
            .take(MAX_LINE_LEN)
            .read_until(b'\n', &mut marker)?;
        if n == 0 {
            return Ok(None);
        }
        if marker.last() != Some(&b'\n') {
            warn!(
                "Malformed frame header after frame {} in {}, stopping",
                self.frames_read,
                self.path.display()
            );
            return Ok(None);
        }

        match self.reader.read_exact(&mut self.payload) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(
                    "Truncated final frame after frame {} in {}",
                    self.frames_read,
                    self.path.display()
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let index = self.frames_read;
        self.frames_read += 1;

        if !marker.starts_with(FRAME_MARKER) {
            return Err(ProcessingError::CorruptedFile(format!(
                "frame {index} of {} has no FRAME marker",
                self.path.display()
            )));
        }

        Ok(Some(self.header.to_rgb(&self.payload)))
    }
}

/// Y4M encoder writing 4:4:4 frames
pub struct Y4mEncoder {
    writer: BufWriter<File>,
    dims: VideoDims,
    planes: Vec<u8>,
}

impl Y4mEncoder {
    pub fn create(path: &Path, dims: VideoDims, fps: f64) -> Result<Self> {
        dims.validate()?;
        let (fps_num, fps_den) = fps_to_rational(fps);
        let header = StreamHeader {
            dims,
            fps_num,
            fps_den,
            chroma: Chroma::C444,
        };

        let frame_len = header.checked_frame_len()?;

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(header.to_line().as_bytes())?;

        Ok(Self {
            writer,
            dims,
            planes: vec![0; frame_len],
        })
    }
}

impl VideoEncoder for Y4mEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.dims.width, self.dims.height) {
            return Err(ProcessingError::InvalidDimensions {
                width: frame.width(),
                height: frame.height(),
            });
        }

        let plane = self.dims.width as usize * self.dims.height as usize;
        for (i, pixel) in frame.pixels().enumerate() {
            let [y, u, v] = rgb_to_yuv(pixel.0);
            self.planes[i] = y;
            self.planes[plane + i] = u;
            self.planes[2 * plane + i] = v;
        }

        self.writer.write_all(FRAME_MARKER)?;
        self.writer.write_all(b"\n")?;
        self.writer.write_all(&self.planes)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Pure Rust backend for YUV4MPEG2 files
#[derive(Debug, Clone, Copy, Default)]
pub struct Y4mBackend;

impl VideoBackend for Y4mBackend {
    fn name(&self) -> &'static str {
        "y4m"
    }

    fn output_extension(&self) -> &'static str {
        "y4m"
    }

    fn open_capture(&self, path: &Path) -> Result<Box<dyn VideoCapture>> {
        Ok(Box::new(Y4mCapture::open(path)?))
    }

    fn open_encoder(
        &self,
        path: &Path,
        dims: VideoDims,
        fps: f64,
    ) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(Y4mEncoder::create(path, dims, fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let header = StreamHeader::parse("YUV4MPEG2 W64 H48 F25:1 Ip A1:1 C420jpeg XYSCSS=420JPEG")
            .unwrap();
        assert_eq!(header.dims, VideoDims::new(64, 48));
        assert_eq!(header.fps(), Some(25.0));
        assert_eq!(header.chroma, Chroma::C420);
        assert_eq!(header.frame_len(), Some(64 * 48 + 2 * 32 * 24));
    }

    #[test]
    fn test_parse_header_defaults_to_420() {
        let header = StreamHeader::parse("YUV4MPEG2 W5 H3 F30000:1001").unwrap();
        assert_eq!(header.chroma, Chroma::C420);
        // odd dimensions round chroma planes up
        assert_eq!(header.frame_len(), Some(15 + 2 * 3 * 2));
        assert!((header.fps().unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        assert!(StreamHeader::parse("RIFF W64 H48").is_err());
        assert!(StreamHeader::parse("YUV4MPEG2 W64").is_err());
        assert!(StreamHeader::parse("YUV4MPEG2 W0 H48").is_err());
        assert!(StreamHeader::parse("YUV4MPEG2 W64 H48 Cmono").is_err());
    }

    #[test]
    fn test_colour_conversion_extremes() {
        for rgb in [[0, 0, 0], [255, 255, 255], [128, 128, 128]] {
            let [y, u, v] = rgb_to_yuv(rgb);
            assert_eq!(yuv_to_rgb(y, u, v), rgb);
        }
    }

    #[test]
    fn test_fps_rational() {
        assert_eq!(fps_to_rational(20.0), (20, 1));
        assert_eq!(fps_to_rational(29.97), (29970, 1000));
        assert_eq!(fps_to_rational(0.0), (30, 1));
    }

    fn write_raw(path: &Path, header: &str, frames: &[&[u8]]) {
        let mut data = header.as_bytes().to_vec();
        for frame in frames {
            data.extend_from_slice(frame);
        }
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_read_420_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grey.y4m");
        // 2x2 luma 200, neutral chroma
        let frame: &[u8] = b"FRAME\n\xc8\xc8\xc8\xc8\x80\x80";
        write_raw(&path, "YUV4MPEG2 W2 H2 F20:1 C420jpeg\n", &[frame, frame]);

        let mut capture = Y4mCapture::open(&path).unwrap();
        assert_eq!(capture.info().frame_count, Some(2));
        assert_eq!(capture.info().fps, Some(20.0));

        let first = capture.read_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(1, 1).0, [200, 200, 200]);
        assert!(capture.read_frame().unwrap().is_some());
        assert!(capture.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_bad_marker_skips_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.y4m");
        let good: &[u8] = b"FRAME\n\x10\x10\x10\x10\x80\x80";
        let bad: &[u8] = b"JUNK!\n\x10\x10\x10\x10\x80\x80";
        write_raw(&path, "YUV4MPEG2 W2 H2 F20:1\n", &[good, bad, good]);

        let mut capture = Y4mCapture::open(&path).unwrap();
        assert!(capture.read_frame().unwrap().is_some());
        assert!(matches!(
            capture.read_frame(),
            Err(ProcessingError::CorruptedFile(_))
        ));
        assert!(capture.read_frame().unwrap().is_some());
        assert!(capture.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_truncated_final_frame_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.y4m");
        let good: &[u8] = b"FRAME\n\x10\x10\x10\x10\x80\x80";
        let partial: &[u8] = b"FRAME\n\x10\x10";
        write_raw(&path, "YUV4MPEG2 W2 H2 F20:1\n", &[good, partial]);

        let mut capture = Y4mCapture::open(&path).unwrap();
        assert!(capture.read_frame().unwrap().is_some());
        assert!(capture.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_open_rejects_non_y4m() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").unwrap();
        assert!(matches!(
            Y4mCapture::open(&path),
            Err(ProcessingError::VideoUnreadable { .. })
        ));
        assert!(matches!(
            Y4mCapture::open(&dir.path().join("missing.y4m")),
            Err(ProcessingError::VideoUnreadable { .. })
        ));
    }

    #[test]
    fn test_oversized_header_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.y4m");
        write_raw(
            &path,
            "YUV4MPEG2 W4000000 H4000000 F20:1 C420jpeg\n",
            &[b"FRAME\n\0\0\0"],
        );
        assert!(matches!(
            Y4mCapture::open(&path),
            Err(ProcessingError::VideoUnreadable { .. })
        ));

        let header = StreamHeader::parse("YUV4MPEG2 W4294967295 H4294967295 C444").unwrap();
        assert!(header.checked_frame_len().is_err());
    }

    #[test]
    fn test_header_larger_than_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liar.y4m");
        // 640x480 promises ~460 KB per frame but only a few bytes follow
        write_raw(&path, "YUV4MPEG2 W640 H480 F20:1\n", &[b"FRAME\n\x10\x10"]);
        let err = Y4mCapture::open(&path).err().unwrap();
        assert!(err.to_string().contains("promises"), "{err}");
    }

    #[test]
    fn test_encoder_rejects_mismatched_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.y4m");
        let mut encoder = Y4mEncoder::create(&path, VideoDims::new(4, 4), 20.0).unwrap();
        let frame = RgbImage::new(2, 2);
        assert!(encoder.write_frame(&frame).is_err());
    }
}
