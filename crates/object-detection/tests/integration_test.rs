use image::{Rgb, RgbImage};
use patient_video_codec::Letterbox;
use patient_video_detection::{
    annotate_frame, Detector, DetectorConfig, ForegroundDetector, PixelBox, TrackDecision,
    TrackingPolicy, BOX_COLOR,
};

/// Grey frame with a bright block at the given pixel rectangle
fn create_test_frame(width: u32, height: u32, block: Option<(u32, u32, u32, u32)>) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width, height, Rgb([30, 30, 30]));
    if let Some((x1, y1, x2, y2)) = block {
        for y in y1..y2 {
            for x in x1..x2 {
                frame.put_pixel(x, y, Rgb([240, 240, 240]));
            }
        }
    }
    frame
}

fn letterbox() -> Letterbox {
    Letterbox {
        target: 160,
        ..Letterbox::default()
    }
}

#[test]
fn test_foreground_box_maps_back_to_frame() {
    // 320x180 -> ratio 0.5, 160x90 unpadded, padded to 160x96
    let detector = ForegroundDetector::new(DetectorConfig::default());
    let frame = letterbox().preprocess(create_test_frame(320, 180, Some((100, 40, 220, 140))));
    assert_eq!(frame.letterbox.pad_top, 3);

    let boxes = detector.detect(&frame).unwrap();
    assert_eq!(boxes.len(), 1);

    let mut tracker = TrackingPolicy::new();
    let decision = tracker.update(&boxes, &frame.letterbox, frame.original_size());
    let TrackDecision::Fresh(subject) = decision else {
        panic!("expected a fresh detection, got {decision:?}");
    };
    assert!(subject.x1.abs_diff(100) <= 2, "{subject:?}");
    assert!(subject.y1.abs_diff(40) <= 2, "{subject:?}");
    assert!(subject.x2.abs_diff(220) <= 2, "{subject:?}");
    assert!(subject.y2.abs_diff(140) <= 2, "{subject:?}");
}

#[test]
fn test_blank_frames_coast_on_last_box() {
    let detector = ForegroundDetector::new(DetectorConfig::default());
    let lb = letterbox();
    let frames = [
        create_test_frame(320, 180, Some((100, 40, 220, 140))),
        create_test_frame(320, 180, None),
        create_test_frame(320, 180, None),
        create_test_frame(320, 180, Some((20, 20, 120, 100))),
    ];

    let mut tracker = TrackingPolicy::new();
    let decisions: Vec<TrackDecision> = frames
        .into_iter()
        .map(|f| {
            let pre = lb.preprocess(f);
            let boxes = detector.detect(&pre).unwrap();
            tracker.update(&boxes, &pre.letterbox, pre.original_size())
        })
        .collect();

    let first = decisions[0].subject().unwrap();
    assert!(matches!(decisions[1], TrackDecision::Coasting(b) if b == first));
    assert!(matches!(decisions[2], TrackDecision::Coasting(b) if b == first));
    let TrackDecision::Fresh(last) = decisions[3] else {
        panic!("expected fresh detection on the last frame");
    };
    assert_ne!(last, first);
    assert_eq!(tracker.stats().coasted, 2);
}

#[test]
fn test_no_subject_leaves_frame_untouched() {
    let detector = ForegroundDetector::new(DetectorConfig::default());
    let original = create_test_frame(96, 64, None);
    let pre = letterbox().preprocess(original.clone());

    let mut tracker = TrackingPolicy::new();
    let decision = tracker.update(&detector.detect(&pre).unwrap(), &pre.letterbox, pre.original_size());
    assert_eq!(decision, TrackDecision::NoSubject);
    assert_eq!(pre.original, original);
}

#[test]
fn test_annotation_uses_palette_colour() {
    let mut frame = create_test_frame(120, 80, None);
    annotate_frame(&mut frame, &PixelBox::new(30, 20, 90, 60), 5);
    assert_eq!(*frame.get_pixel(30, 40), BOX_COLOR);
    assert_eq!(*frame.get_pixel(60, 20), BOX_COLOR);
    assert_eq!(*frame.get_pixel(60, 40), Rgb([30, 30, 30]));
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use patient_video_detection::onnx::OnnxDetector;
    use std::path::Path;

    const MODEL_PATH: &str = "models/yolov5s.onnx";

    #[test]
    #[ignore] // Requires a YOLO export at models/yolov5s.onnx
    fn test_detect_on_blank_frame() {
        if !Path::new(MODEL_PATH).exists() {
            eprintln!("Skipping test: {MODEL_PATH} not found");
            return;
        }
        let detector = OnnxDetector::load(Path::new(MODEL_PATH), DetectorConfig::default()).unwrap();
        let frame = Letterbox::default().preprocess(create_test_frame(640, 480, None));
        let boxes = detector.detect(&frame).unwrap();
        assert!(boxes.len() <= 5, "Unexpected detections on blank frame: {boxes:?}");
    }
}
