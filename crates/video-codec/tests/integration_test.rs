/// Integration tests for the Y4M backend, frame source and writer
use image::{Rgb, RgbImage};
use patient_video_codec::{
    FrameEvent, FrameSource, Letterbox, VideoBackend, VideoCapture, VideoWriter, Y4mBackend,
};
use patient_video_common::{ProcessingError, VideoDims};
use std::path::Path;
use std::sync::Arc;

fn moving_square(count: usize, width: u32, height: u32) -> Vec<RgbImage> {
    (0..count)
        .map(|i| {
            let mut frame = RgbImage::new(width, height);
            let x0 = (i as u32 * 2) % (width - 8);
            for y in 4..12 {
                for x in x0..x0 + 8 {
                    frame.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
            frame
        })
        .collect()
}

fn small_letterbox() -> Letterbox {
    Letterbox {
        target: 64,
        ..Letterbox::default()
    }
}

fn count_frames(path: &Path) -> (usize, VideoDims) {
    let mut capture = Y4mBackend.open_capture(path).unwrap();
    let dims = capture.info().dims;
    let mut count = 0;
    while capture.read_frame().unwrap().is_some() {
        count += 1;
    }
    (count, dims)
}

#[test]
fn test_round_trip_frame_count_and_dims() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("round_trip.y4m");
    let frames = moving_square(17, 48, 32);

    let writer = VideoWriter::new(Arc::new(Y4mBackend));
    writer
        .write(&path, &frames, VideoDims::new(48, 32), 20.0)
        .unwrap();

    let (count, dims) = count_frames(&path);
    assert_eq!(count, 17);
    assert_eq!(dims, VideoDims::new(48, 32));

    let capture = Y4mBackend.open_capture(&path).unwrap();
    assert_eq!(capture.info().frame_count, Some(17));
    assert_eq!(capture.info().fps, Some(20.0));
}

#[test]
fn test_round_trip_preserves_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("content.y4m");
    let frames = moving_square(3, 32, 16);

    VideoWriter::new(Arc::new(Y4mBackend))
        .write(&path, &frames, VideoDims::new(32, 16), 25.0)
        .unwrap();

    let mut capture = Y4mBackend.open_capture(&path).unwrap();
    for original in &frames {
        let decoded = capture.read_frame().unwrap().unwrap();
        assert_eq!(&decoded, original);
    }
}

#[test]
fn test_frame_source_event_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.y4m");
    let frames = moving_square(5, 48, 32);
    VideoWriter::new(Arc::new(Y4mBackend))
        .write(&path, &frames, VideoDims::new(48, 32), 20.0)
        .unwrap();

    let source = FrameSource::open(&Y4mBackend, &path, small_letterbox()).unwrap();
    assert_eq!(source.info().frame_count, Some(5));

    let events: Vec<FrameEvent> = source.collect();
    assert_eq!(events.len(), 7);

    for (i, event) in events.iter().take(5).enumerate() {
        match event {
            FrameEvent::Frame(decoded) => {
                assert_eq!(decoded.index, i as u64);
                assert_eq!(decoded.is_first, i == 0);
                assert_eq!(decoded.dims, VideoDims::new(48, 32));
                // 48x32 -> 64x43 -> padded to 64x64 (auto stride 32)
                assert_eq!(decoded.frame.tensor.dim().0, 3);
                assert_eq!(decoded.frame.original.dimensions(), (48, 32));
            }
            other => panic!("expected frame at {i}, got {other:?}"),
        }
    }
    assert!(matches!(
        events[5],
        FrameEvent::VideoBoundary { dims } if dims == VideoDims::new(48, 32)
    ));
    assert!(matches!(events[6], FrameEvent::StreamExhausted));
}

#[test]
fn test_frame_source_missing_file_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let result = FrameSource::open(&Y4mBackend, &dir.path().join("missing.y4m"), small_letterbox());
    assert!(matches!(result, Err(ProcessingError::VideoUnreadable { .. })));
}

#[test]
fn test_frame_source_header_only_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.y4m");
    std::fs::write(&path, b"YUV4MPEG2 W16 H16 F20:1 C444\n").unwrap();

    let result = FrameSource::open(&Y4mBackend, &path, small_letterbox());
    match result {
        Err(ProcessingError::VideoUnreadable { reason, .. }) => {
            assert!(reason.contains("no frames"));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("header-only file should not open"),
    }
}

#[test]
fn test_frame_source_absurd_dimensions_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.y4m");
    std::fs::write(
        &path,
        b"YUV4MPEG2 W4000000 H4000000 F20:1 C420jpeg\nFRAME\n\0\0\0",
    )
    .unwrap();

    let result = FrameSource::open(&Y4mBackend, &path, small_letterbox());
    assert!(matches!(result, Err(ProcessingError::VideoUnreadable { .. })));
}

#[test]
fn test_frame_source_skips_corrupt_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.y4m");
    let frames = moving_square(4, 16, 16);
    VideoWriter::new(Arc::new(Y4mBackend))
        .write(&path, &frames, VideoDims::new(16, 16), 20.0)
        .unwrap();

    // Break the marker of the second frame
    let mut bytes = std::fs::read(&path).unwrap();
    let header_len = bytes.iter().position(|&b| b == b'\n').unwrap() + 1;
    let frame_len = 6 + 16 * 16 * 3;
    bytes[header_len + frame_len] = b'X';
    std::fs::write(&path, bytes).unwrap();

    let mut source = FrameSource::open(&Y4mBackend, &path, small_letterbox()).unwrap();
    let yielded = source
        .by_ref()
        .filter(|e| matches!(e, FrameEvent::Frame(_)))
        .count();
    assert_eq!(yielded, 3);
    assert_eq!(source.frames_skipped(), 1);
}
