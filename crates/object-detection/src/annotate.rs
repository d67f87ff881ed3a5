/// Drawing the tracked subject onto output frames
use crate::geometry::PixelBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Palette entry 1 (#FF9D97)
pub const BOX_COLOR: Rgb<u8> = Rgb([0xFF, 0x9D, 0x97]);

/// Draw `subject` as a hollow rectangle `thickness` pixels wide, centred on
/// the box edge. Parts falling outside the frame are clipped.
pub fn annotate_frame(frame: &mut RgbImage, subject: &PixelBox, thickness: u32) {
    let subject = subject.clamp_to(frame.width(), frame.height());
    if subject.is_empty() {
        return;
    }

    let thickness = thickness.max(1) as i32;
    let half = thickness / 2;
    let (w, h) = (subject.width() as i32, subject.height() as i32);

    for k in 0..thickness {
        let d = k - half;
        let inner_w = w - 2 * d;
        let inner_h = h - 2 * d;
        if inner_w > 0 && inner_h > 0 {
            let rect = Rect::at(subject.x1 as i32 + d, subject.y1 as i32 + d)
                .of_size(inner_w as u32, inner_h as u32);
            draw_hollow_rect_mut(frame, rect, BOX_COLOR);
        }
    }
}
