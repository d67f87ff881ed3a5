/// FFmpeg-backed capture and H.264 mp4 encoder
///
/// libav* contexts stay on a dedicated worker thread per handle; frames cross
/// the thread boundary over bounded channels.
use crate::{CaptureInfo, VideoBackend, VideoCapture, VideoEncoder};
use crossbeam_channel::{bounded, Receiver, Sender};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use patient_video_common::{ProcessingError, Result, VideoDims};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread::JoinHandle;
use tracing::{debug, warn};

const CHANNEL_DEPTH: usize = 8;

/// Initialize `FFmpeg` library once per process
fn init_ffmpeg() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to initialize FFmpeg: {e}")))
}

fn ffmpeg_err(context: &str) -> impl Fn(ffmpeg::Error) -> ProcessingError + '_ {
    move |e| ProcessingError::FFmpegError(format!("{context}: {e}"))
}

enum DecodeMsg {
    Frame(RgbImage),
    Corrupt(String),
    Failed(String),
}

/// Streaming decoder over any container libavformat can open
pub struct FfmpegCapture {
    info: CaptureInfo,
    frames: Receiver<DecodeMsg>,
}

impl FfmpegCapture {
    pub fn open(path: &Path) -> Result<Self> {
        init_ffmpeg()?;

        // Probe on the caller's thread so open errors surface immediately
        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| ProcessingError::unreadable(path, e.to_string()))?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| ProcessingError::unreadable(path, "no video stream"))?;

        let rate = stream.avg_frame_rate();
        let fps = (rate.numerator() > 0 && rate.denominator() > 0).then(|| f64::from(rate));
        let frame_count = u64::try_from(stream.frames()).ok().filter(|&n| n > 0);

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| ProcessingError::unreadable(path, e.to_string()))?;
        let dims = VideoDims::new(decoder.width(), decoder.height());
        dims.validate()
            .map_err(|e| ProcessingError::unreadable(path, e.to_string()))?;
        drop(decoder);
        drop(ictx);

        let (tx, rx) = bounded(CHANNEL_DEPTH);
        let owned = path.to_path_buf();
        std::thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || {
                if let Err(e) = decode_loop(&owned, &tx) {
                    let _ = tx.send(DecodeMsg::Failed(e.to_string()));
                }
            })?;

        Ok(Self {
            info: CaptureInfo {
                dims,
                fps,
                frame_count,
            },
            frames: rx,
        })
    }
}

impl VideoCapture for FfmpegCapture {
    fn info(&self) -> CaptureInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.frames.recv() {
            Ok(DecodeMsg::Frame(image)) => Ok(Some(image)),
            Ok(DecodeMsg::Corrupt(reason)) => Err(ProcessingError::CorruptedFile(reason)),
            Ok(DecodeMsg::Failed(reason)) => Err(ProcessingError::FFmpegError(reason)),
            // Worker finished and hung up
            Err(_) => Ok(None),
        }
    }
}

fn decode_loop(path: &Path, tx: &Sender<DecodeMsg>) -> Result<()> {
    let mut ictx = ffmpeg::format::input(&path).map_err(ffmpeg_err("Failed to open input file"))?;
    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| ProcessingError::unreadable(path, "no video stream"))?;
    let stream_index = stream.index();

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(ffmpeg_err("Failed to create context"))?
        .decoder()
        .video()
        .map_err(ffmpeg_err("Failed to create decoder"))?;

    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(ffmpeg_err("Failed to create scaler"))?;

    let mut decoded = ffmpeg::util::frame::video::Video::empty();
    let mut converted = ffmpeg::util::frame::video::Video::empty();

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if let Err(e) = decoder.send_packet(&packet) {
            if tx.send(DecodeMsg::Corrupt(e.to_string())).is_err() {
                return Ok(());
            }
            continue;
        }
        if !drain_decoder(&mut decoder, &mut scaler, &mut decoded, &mut converted, tx) {
            return Ok(());
        }
    }

    // Flush decoder
    decoder.send_eof().ok();
    drain_decoder(&mut decoder, &mut scaler, &mut decoded, &mut converted, tx);
    Ok(())
}

/// Forward every ready frame; false once the receiver has gone away
fn drain_decoder(
    decoder: &mut ffmpeg::decoder::Video,
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &mut ffmpeg::util::frame::video::Video,
    converted: &mut ffmpeg::util::frame::video::Video,
    tx: &Sender<DecodeMsg>,
) -> bool {
    while decoder.receive_frame(decoded).is_ok() {
        let msg = match scaler.run(decoded, converted) {
            Ok(()) => match rgb_from_frame(converted) {
                Some(image) => DecodeMsg::Frame(image),
                None => DecodeMsg::Corrupt("short RGB plane".to_string()),
            },
            Err(e) => DecodeMsg::Corrupt(format!("Failed to convert frame: {e}")),
        };
        if tx.send(msg).is_err() {
            return false;
        }
    }
    true
}

/// Copy a stride-padded RGB24 frame into a packed image
fn rgb_from_frame(frame: &ffmpeg::util::frame::video::Video) -> Option<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let row_len = width as usize * 3;
    let data = frame.data(0);

    let mut packed = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        packed.extend_from_slice(data.get(start..start + row_len)?);
    }
    RgbImage::from_raw(width, height, packed)
}

/// H.264 encoder writing an mp4 (or whatever container the extension implies)
pub struct FfmpegEncoder {
    dims: VideoDims,
    frames: Option<Sender<RgbImage>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl FfmpegEncoder {
    pub fn create(path: &Path, dims: VideoDims, fps: f64) -> Result<Self> {
        init_ffmpeg()?;
        dims.validate()?;

        let (tx, rx) = bounded::<RgbImage>(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let owned: PathBuf = path.to_path_buf();

        let worker = std::thread::Builder::new()
            .name("ffmpeg-encode".to_string())
            .spawn(move || encode_loop(&owned, dims, fps, &rx, &ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                dims,
                frames: Some(tx),
                worker: Some(worker),
            }),
            Ok(Err(reason)) => {
                let _ = worker.join();
                Err(ProcessingError::FFmpegError(reason))
            }
            Err(_) => Err(join_worker(worker)
                .err()
                .unwrap_or_else(|| ProcessingError::FFmpegError("encoder exited early".to_string()))),
        }
    }

    fn worker_error(&mut self) -> ProcessingError {
        self.frames = None;
        match self.worker.take() {
            Some(worker) => join_worker(worker)
                .err()
                .unwrap_or_else(|| ProcessingError::FFmpegError("encoder stopped".to_string())),
            None => ProcessingError::FFmpegError("encoder already finished".to_string()),
        }
    }
}

fn join_worker(worker: JoinHandle<Result<()>>) -> Result<()> {
    worker
        .join()
        .map_err(|_| ProcessingError::FFmpegError("encoder thread panicked".to_string()))?
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.dims.width, self.dims.height) {
            return Err(ProcessingError::InvalidDimensions {
                width: frame.width(),
                height: frame.height(),
            });
        }
        let sent = match &self.frames {
            Some(tx) => tx.send(frame.clone()).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            Err(self.worker_error())
        }
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // Hanging up lets the worker flush and write the trailer
        self.frames = None;
        match self.worker.take() {
            Some(worker) => join_worker(worker),
            None => Ok(()),
        }
    }
}

fn encode_loop(
    path: &Path,
    dims: VideoDims,
    fps: f64,
    frames: &Receiver<RgbImage>,
    ready: &Sender<std::result::Result<(), String>>,
) -> Result<()> {
    let setup = open_output(path, dims, fps);
    let (mut octx, mut encoder, mut scaler, stream_index, time_base) = match setup {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return Err(e);
        }
    };
    let stream_time_base = octx
        .stream(stream_index)
        .map(|s| s.time_base())
        .ok_or_else(|| ProcessingError::FFmpegError("output stream vanished".to_string()))?;

    let mut rgb = ffmpeg::util::frame::video::Video::new(
        ffmpeg::format::Pixel::RGB24,
        dims.width,
        dims.height,
    );
    let mut yuv = ffmpeg::util::frame::video::Video::empty();
    let row_len = dims.width as usize * 3;

    for (pts, image) in frames.iter().enumerate() {
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (y, row) in image.as_raw().chunks_exact(row_len).enumerate() {
            plane[y * stride..y * stride + row_len].copy_from_slice(row);
        }
        scaler
            .run(&rgb, &mut yuv)
            .map_err(ffmpeg_err("Failed to convert frame"))?;
        yuv.set_pts(i64::try_from(pts).ok());
        encoder
            .send_frame(&yuv)
            .map_err(ffmpeg_err("Failed to encode frame"))?;
        write_packets(&mut encoder, &mut octx, stream_index, time_base, stream_time_base)?;
    }

    encoder.send_eof().map_err(ffmpeg_err("Failed to flush encoder"))?;
    write_packets(&mut encoder, &mut octx, stream_index, time_base, stream_time_base)?;
    octx.write_trailer().map_err(ffmpeg_err("Failed to write trailer"))?;
    debug!("Finished encoding {}", path.display());
    Ok(())
}

type OutputParts = (
    ffmpeg::format::context::Output,
    ffmpeg::encoder::Video,
    ffmpeg::software::scaling::Context,
    usize,
    ffmpeg::Rational,
);

fn open_output(path: &Path, dims: VideoDims, fps: f64) -> Result<OutputParts> {
    let mut octx = ffmpeg::format::output(&path).map_err(ffmpeg_err("Failed to create output"))?;
    let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
        .ok_or_else(|| ProcessingError::FFmpegError("H.264 encoder unavailable".to_string()))?;
    let global_header = octx
        .format()
        .flags()
        .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

    let mut stream = octx
        .add_stream(codec)
        .map_err(ffmpeg_err("Failed to add stream"))?;
    let stream_index = stream.index();

    let fps = if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        warn!("Invalid output frame rate {}, using 30", fps);
        30.0
    };
    let frame_rate = ffmpeg::Rational::new((fps * 1000.0).round() as i32, 1000);
    let time_base = frame_rate.invert();

    let mut config = ffmpeg::codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
        .map_err(ffmpeg_err("Failed to create encoder"))?;
    config.set_width(dims.width);
    config.set_height(dims.height);
    config.set_format(ffmpeg::format::Pixel::YUV420P);
    config.set_time_base(time_base);
    config.set_frame_rate(Some(frame_rate));
    if global_header {
        config.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
    }

    let encoder = config
        .open_as(codec)
        .map_err(ffmpeg_err("Failed to open encoder"))?;
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);

    octx.write_header().map_err(ffmpeg_err("Failed to write header"))?;

    let scaler = ffmpeg::software::scaling::Context::get(
        ffmpeg::format::Pixel::RGB24,
        dims.width,
        dims.height,
        ffmpeg::format::Pixel::YUV420P,
        dims.width,
        dims.height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(ffmpeg_err("Failed to create scaler"))?;

    Ok((octx, encoder, scaler, stream_index, time_base))
}

fn write_packets(
    encoder: &mut ffmpeg::encoder::Video,
    octx: &mut ffmpeg::format::context::Output,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
) -> Result<()> {
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(time_base, stream_time_base);
        packet
            .write_interleaved(octx)
            .map_err(ffmpeg_err("Failed to write packet"))?;
    }
    Ok(())
}

/// libav*-backed backend; outputs H.264 mp4
#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        init_ffmpeg()?;
        Ok(Self)
    }
}

impl VideoBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn output_extension(&self) -> &'static str {
        "mp4"
    }

    fn open_capture(&self, path: &Path) -> Result<Box<dyn VideoCapture>> {
        Ok(Box::new(FfmpegCapture::open(path)?))
    }

    fn open_encoder(
        &self,
        path: &Path,
        dims: VideoDims,
        fps: f64,
    ) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(FfmpegEncoder::create(path, dims, fps)?))
    }
}
