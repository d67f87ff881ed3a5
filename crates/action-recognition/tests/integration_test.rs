//! Integration tests for clip buffering, scheduling and classification

use image::{Rgb, RgbImage};
use patient_video_action::{
    crop_patch, Classifier, ClipScheduler, CropBuffer, MotionClassifier, MotionClassifierConfig,
};
use patient_video_detection::PixelBox;

/// Frame with a square at `x` that alternates brightness every frame when `shaking`
fn create_test_frame(index: u32, shaking: bool) -> RgbImage {
    let mut frame = RgbImage::new(160, 120);
    let value = if shaking && index % 2 == 1 { 60 } else { 230 };
    for y in 40..80 {
        for x in 60..100 {
            frame.put_pixel(x, y, Rgb([value, value, value]));
        }
    }
    frame
}

/// Run `frames` through buffer + scheduler + classifier the way a video task does
fn run_clip_loop(frames: u32, shaking: bool) -> Vec<((f64, f64), String)> {
    let scheduler = ClipScheduler::new(60, 20.0, None);
    let classifier = MotionClassifier::new(MotionClassifierConfig::default());
    let mut buffer = CropBuffer::new(60);
    let subject = PixelBox::new(60, 40, 100, 80);
    let mut results = Vec::new();

    for i in 0..frames {
        let frame = create_test_frame(i, shaking);
        buffer.push(crop_patch(&frame, Some(&subject), 112));
        let frame_count = u64::from(i) + 1;
        if scheduler.should_fire(frame_count, buffer.len()) {
            let clip = buffer.take();
            let label = classifier.classify_batch(&clip).unwrap();
            results.push((scheduler.window(frame_count), label));
        }
    }
    results
}

/// Test that a still subject yields interictal windows every 3 seconds
#[test]
fn test_still_subject_windows() {
    let results = run_clip_loop(150, false);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], ((0.0, 3.0), "Interictal".to_string()));
    assert_eq!(results[1], ((3.0, 6.0), "Interictal".to_string()));
}

/// Test that a flickering subject is labelled as a seizure
#[test]
fn test_shaking_subject_is_seizure() {
    let results = run_clip_loop(60, true);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1, "Seizure");
}

/// Test that short videos never reach the trigger
#[test]
fn test_short_video_never_fires() {
    assert!(run_clip_loop(59, true).is_empty());
}
