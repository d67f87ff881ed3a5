/// Letterbox preprocessing for square-input detectors
///
/// The longer edge is resized to the target size, the shorter edge padded up to
/// a multiple of the model stride with a constant grey, and pixels normalised to
/// [0, 1] in CHW order.
use image::{imageops, Rgb, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Letterbox parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    /// Target edge length (model input size)
    pub target: u32,
    /// Model stride; padding is the minimum needed to reach a multiple of it
    pub stride: u32,
    /// Pad to a stride multiple instead of the full square
    pub auto: bool,
    /// Grey level of the padding
    pub pad_color: u8,
}

impl Default for Letterbox {
    fn default() -> Self {
        Self {
            target: 640,
            stride: 32,
            auto: true,
            pad_color: 114,
        }
    }
}

/// Geometry of one letterboxed frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
    /// Scale factor applied to the source
    pub ratio: f32,
    pub pad_left: u32,
    pub pad_top: u32,
    /// Size of the padded model input
    pub input_width: u32,
    pub input_height: u32,
}

/// A decoded frame plus its model input tensor
#[derive(Debug, Clone)]
pub struct PreprocessedFrame {
    /// Untouched source frame, used for crops and annotation
    pub original: RgbImage,
    /// RGB, CHW, normalised to [0, 1]
    pub tensor: Array3<f32>,
    pub letterbox: LetterboxInfo,
}

impl PreprocessedFrame {
    #[must_use]
    pub fn original_size(&self) -> (u32, u32) {
        self.original.dimensions()
    }
}

impl Letterbox {
    /// Compute output geometry without touching pixels
    #[must_use]
    pub fn geometry(&self, width: u32, height: u32) -> (u32, u32, LetterboxInfo) {
        let target = self.target as f32;
        let ratio = (target / height as f32).min(target / width as f32);

        let unpad_w = (width as f32 * ratio).round() as u32;
        let unpad_h = (height as f32 * ratio).round() as u32;

        let mut dw = self.target.saturating_sub(unpad_w) as f32;
        let mut dh = self.target.saturating_sub(unpad_h) as f32;
        if self.auto && self.stride > 0 {
            dw %= self.stride as f32;
            dh %= self.stride as f32;
        }
        dw /= 2.0;
        dh /= 2.0;

        let top = (dh - 0.1).round().max(0.0) as u32;
        let bottom = (dh + 0.1).round().max(0.0) as u32;
        let left = (dw - 0.1).round().max(0.0) as u32;
        let right = (dw + 0.1).round().max(0.0) as u32;

        let info = LetterboxInfo {
            ratio,
            pad_left: left,
            pad_top: top,
            input_width: unpad_w + left + right,
            input_height: unpad_h + top + bottom,
        };
        (unpad_w, unpad_h, info)
    }

    /// Resize and pad a frame, returning the padded RGB image
    #[must_use]
    pub fn apply(&self, frame: &RgbImage) -> (RgbImage, LetterboxInfo) {
        let (width, height) = frame.dimensions();
        let (unpad_w, unpad_h, info) = self.geometry(width, height);

        let mut padded = RgbImage::from_pixel(
            info.input_width,
            info.input_height,
            Rgb([self.pad_color; 3]),
        );
        if (unpad_w, unpad_h) == (width, height) {
            imageops::replace(&mut padded, frame, i64::from(info.pad_left), i64::from(info.pad_top));
        } else {
            let resized = imageops::resize(frame, unpad_w, unpad_h, imageops::FilterType::Triangle);
            imageops::replace(
                &mut padded,
                &resized,
                i64::from(info.pad_left),
                i64::from(info.pad_top),
            );
        }
        (padded, info)
    }

    /// Full preprocessing: letterbox, then CHW float tensor in [0, 1]
    #[must_use]
    pub fn preprocess(&self, frame: RgbImage) -> PreprocessedFrame {
        let (padded, letterbox) = self.apply(&frame);
        PreprocessedFrame {
            original: frame,
            tensor: to_chw_tensor(&padded),
            letterbox,
        }
    }
}

/// Convert an RGB image into a normalised CHW tensor
#[must_use]
pub fn to_chw_tensor(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_landscape() {
        let letterbox = Letterbox::default();
        let (w, h, info) = letterbox.geometry(1280, 720);
        assert_eq!((w, h), (640, 360));
        // 280 % 32 = 24, split 12/12
        assert_eq!(info.pad_top, 12);
        assert_eq!((info.input_width, info.input_height), (640, 384));
        assert_eq!(info.pad_left, 0);
        assert!((info.ratio - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_geometry_uneven_padding() {
        let letterbox = Letterbox::default();
        // 100x50 -> 640x320, already a stride multiple
        let (_, _, info) = letterbox.geometry(100, 50);
        assert_eq!((info.input_width, info.input_height), (640, 320));

        // 640x470: dh = 170 % 32 = 10 -> 5/5
        let (_, _, info) = letterbox.geometry(640, 470);
        assert_eq!(info.pad_top, 5);
        assert_eq!(info.input_height, 480);

        // 640x475: dh = 165 % 32 = 5 -> 2.5 -> top 2, bottom 3
        let (_, _, info) = letterbox.geometry(640, 475);
        assert_eq!(info.pad_top, 2);
        assert_eq!(info.input_height, 480);
    }

    #[test]
    fn test_geometry_full_square() {
        let letterbox = Letterbox {
            auto: false,
            ..Letterbox::default()
        };
        let (_, _, info) = letterbox.geometry(1280, 720);
        assert_eq!((info.input_width, info.input_height), (640, 640));
        assert_eq!(info.pad_top, 140);
    }

    #[test]
    fn test_preprocess_pads_with_grey_and_normalises() {
        let letterbox = Letterbox {
            target: 64,
            stride: 32,
            auto: false,
            pad_color: 114,
        };
        let frame = RgbImage::from_pixel(64, 32, Rgb([255, 0, 0]));
        let out = letterbox.preprocess(frame);

        assert_eq!(out.tensor.dim(), (3, 64, 64));
        assert_eq!(out.letterbox.pad_top, 16);
        // padding row
        assert!((out.tensor[[0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        // image row
        assert!((out.tensor[[0, 32, 10]] - 1.0).abs() < 1e-6);
        assert_eq!(out.tensor[[1, 32, 10]], 0.0);
        assert_eq!(out.original_size(), (64, 32));
    }
}
