//! Frame extraction: decode a video with FFmpeg and write every Nth frame as a JPEG.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::context::Context as Scaler;
use ffmpeg_next::software::scaling::flag::Flags;
use ffmpeg_next::{Rational, codec, format, frame, media, threading};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_OUTPUT_FOLDER: &str = "extracted_frames";
/// Same default as OpenCV's `imwrite`.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

static NUM_CPUS: LazyLock<usize> = LazyLock::new(|| num_cpus::get().min(16));

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Frame skip must be at least 1, got {0}")]
    InvalidFrameSkip(u32),

    #[error("JPEG quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),

    #[error("Cannot open video file.")]
    Open(#[source] ffmpeg_next::Error),

    #[error("Video file has no video stream.")]
    NoVideoStream,

    #[error("Failed to set up decoder: {0}")]
    Decoder(#[source] ffmpeg_next::Error),

    #[error("Failed to convert frame {index}: {source}")]
    Convert {
        index: u64,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub output_folder: PathBuf,
    pub frame_skip: u32,
    pub jpeg_quality: u8,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            output_folder: PathBuf::from(DEFAULT_OUTPUT_FOLDER),
            frame_skip: 1,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ExtractOptions {
    pub fn new(output_folder: impl Into<PathBuf>, frame_skip: u32) -> Self {
        Self {
            output_folder: output_folder.into(),
            frame_skip,
            ..Default::default()
        }
    }

    pub fn with_quality(mut self, jpeg_quality: u8) -> Self {
        self.jpeg_quality = jpeg_quality;
        self
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.frame_skip == 0 {
            return Err(ExtractError::InvalidFrameSkip(self.frame_skip));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ExtractError::InvalidQuality(self.jpeg_quality));
        }
        Ok(())
    }
}

/// A progress snapshot, delivered after every decoded frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractProgress {
    pub decoded: u64,
    pub saved: u64,
    /// Expected number of frames, if the container tells us or we can estimate it.
    pub total: Option<u64>,
}

impl ExtractProgress {
    /// Completed fraction in `0.0..=1.0`, `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.decoded as f32 / total as f32).min(1.0)),
            _ => None,
        }
    }
}

pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, progress: &ExtractProgress);
}

pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _progress: &ExtractProgress) {}
}

/// Logs roughly every ten percent, or every 250 frames when the total is unknown.
pub struct LogProgress {
    label: String,
    last_bucket: std::sync::atomic::AtomicU64,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_bucket: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl ProgressCallback for LogProgress {
    fn on_progress(&self, progress: &ExtractProgress) {
        use std::sync::atomic::Ordering;

        let bucket = match progress.fraction() {
            Some(fraction) => (fraction * 10.0) as u64,
            None => progress.decoded / 250,
        };
        if bucket > self.last_bucket.load(Ordering::Relaxed) {
            self.last_bucket.store(bucket, Ordering::Relaxed);
            match progress.fraction() {
                Some(fraction) => info!(
                    label = %self.label,
                    "Progress: {:.1}% ({} decoded, {} saved)",
                    fraction * 100.0,
                    progress.decoded,
                    progress.saved
                ),
                None => info!(
                    label = %self.label,
                    "Progress: {} decoded, {} saved",
                    progress.decoded,
                    progress.saved
                ),
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Extraction {
    pub decoded: u64,
    pub saved: u64,
    pub output_folder: PathBuf,
    /// Every `.jpg` in the output folder, sorted by name.
    pub frames: Vec<PathBuf>,
}

impl Extraction {
    /// The closing line shown to the user.
    pub fn summary(&self) -> String {
        format!(
            "Done! {} frames saved in '{}'.",
            self.saved,
            self.output_folder.display()
        )
    }
}

pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:04}.jpg")
}

pub fn should_keep(decoded_index: u64, frame_skip: u32) -> bool {
    decoded_index % u64::from(frame_skip) == 0
}

/// Decode `video_path` and save every `frame_skip`-th frame into the output folder.
///
/// Blocking; call from `spawn_blocking` in async code.
pub fn extract_frames(
    video_path: &Path,
    options: &ExtractOptions,
    progress: &dyn ProgressCallback,
) -> Result<Extraction, ExtractError> {
    options.validate()?;
    std::fs::create_dir_all(&options.output_folder)?;

    let mut ictx = format::input(video_path).map_err(ExtractError::Open)?;

    let (stream_index, total, mut decoder) = {
        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or(ExtractError::NoVideoStream)?;
        let total = expected_frames(&stream, ictx.duration());

        let mut context = codec::context::Context::from_parameters(stream.parameters())
            .map_err(ExtractError::Decoder)?;
        context.set_threading(threading::Config {
            kind: threading::Type::Frame,
            count: *NUM_CPUS,
            ..Default::default()
        });
        let decoder = context
            .decoder()
            .video()
            .map_err(ExtractError::Decoder)?;
        (stream.index(), total, decoder)
    };

    debug!(
        ?video_path,
        stream_index,
        ?total,
        width = decoder.width(),
        height = decoder.height(),
        "Opened video stream"
    );

    let mut writer = FrameWriter::new(options, total, progress);
    let mut decoded = frame::Video::empty();

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        if let Err(error) = decoder.send_packet(&packet) {
            warn!(%error, "Decoder rejected packet, skipping");
            continue;
        }
        receive_frames(&mut decoder, &mut decoded, &mut writer)?;
    }

    decoder.send_eof().map_err(ExtractError::Decoder)?;
    receive_frames(&mut decoder, &mut decoded, &mut writer)?;

    let (decoded_count, saved) = (writer.decoded, writer.saved);
    let frames = list_frames(&options.output_folder)?;
    debug!(
        decoded = decoded_count,
        saved,
        folder = %options.output_folder.display(),
        "Extraction finished"
    );

    Ok(Extraction {
        decoded: decoded_count,
        saved,
        output_folder: options.output_folder.clone(),
        frames,
    })
}

/// Pull every frame the decoder has ready into `writer`.
fn receive_frames(
    decoder: &mut ffmpeg_next::decoder::Video,
    decoded: &mut frame::Video,
    writer: &mut FrameWriter<'_>,
) -> Result<(), ExtractError> {
    loop {
        match decoder.receive_frame(decoded) {
            Ok(()) => writer.push(decoded)?,
            Err(error) if is_drained(&error) => return Ok(()),
            Err(error) => {
                warn!(%error, decoded = writer.decoded, "Decoder failed to produce a frame");
                return Ok(());
            }
        }
    }
}

/// `EAGAIN` and `EOF` only mean the decoder wants more input or is finished.
fn is_drained(error: &ffmpeg_next::Error) -> bool {
    use ffmpeg_next::util::error::EAGAIN;

    matches!(
        error,
        ffmpeg_next::Error::Eof | ffmpeg_next::Error::Other { errno: EAGAIN }
    )
}

/// All `.jpg` files directly inside `folder`, sorted by file name.
pub fn list_frames(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames = std::fs::read_dir(folder)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(".jpg"))
        })
        .collect::<Vec<_>>();
    frames.sort();
    Ok(frames)
}

fn expected_frames(stream: &ffmpeg_next::Stream, container_duration_us: i64) -> Option<u64> {
    let frames = stream.frames();
    if frames > 0 {
        return Some(frames as u64);
    }

    let fps = stream.avg_frame_rate();
    if !is_rational_valid(fps) {
        return None;
    }

    let time_base = stream.time_base();
    let seconds = if stream.duration() > 0 && is_rational_valid(time_base) {
        stream.duration() as f64 * f64::from(time_base)
    } else if container_duration_us > 0 {
        container_duration_us as f64 / 1_000_000.0
    } else {
        return None;
    };

    let estimate = (seconds * f64::from(fps)).round();
    (estimate >= 1.0).then_some(estimate as u64)
}

fn is_rational_valid(r: Rational) -> bool {
    r.numerator() > 0 && r.denominator() > 0
}

struct FrameWriter<'a> {
    options: &'a ExtractOptions,
    total: Option<u64>,
    progress: &'a dyn ProgressCallback,
    scaler: Option<Scaler>,
    rgb: frame::Video,
    decoded: u64,
    saved: u64,
}

impl<'a> FrameWriter<'a> {
    fn new(
        options: &'a ExtractOptions,
        total: Option<u64>,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Self {
            options,
            total,
            progress,
            scaler: None,
            rgb: frame::Video::empty(),
            decoded: 0,
            saved: 0,
        }
    }

    fn push(&mut self, decoded: &frame::Video) -> Result<(), ExtractError> {
        let index = self.decoded;
        if should_keep(index, self.options.frame_skip) {
            self.save(index, decoded)?;
        }
        self.decoded += 1;
        self.progress.on_progress(&ExtractProgress {
            decoded: self.decoded,
            saved: self.saved,
            total: self.total,
        });
        Ok(())
    }

    fn save(&mut self, index: u64, decoded: &frame::Video) -> Result<(), ExtractError> {
        let (width, height) = (decoded.width(), decoded.height());

        // Resolution or pixel format may change mid-stream.
        let stale = self.scaler.as_ref().is_none_or(|scaler| {
            let input = scaler.input();
            input.format != decoded.format() || input.width != width || input.height != height
        });
        if stale {
            let scaler = Scaler::get(
                decoded.format(),
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                Flags::BILINEAR,
            )
            .map_err(|source| ExtractError::Convert { index, source })?;
            self.scaler = Some(scaler);
            // the scaler only allocates an empty output frame
            self.rgb = frame::Video::empty();
        }
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(decoded, &mut self.rgb)
                .map_err(|source| ExtractError::Convert { index, source })?;
        }

        let path = self.options.output_folder.join(frame_file_name(self.saved));
        let buffer = packed_rgb(&self.rgb, width, height);
        let image = RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            ExtractError::Convert {
                index,
                source: ffmpeg_next::Error::InvalidData,
            }
        })?;

        let file = File::create(&path)?;
        JpegEncoder::new_with_quality(BufWriter::new(file), self.options.jpeg_quality)
            .encode_image(&image)
            .map_err(|source| ExtractError::Write {
                path: path.clone(),
                source,
            })?;

        self.saved += 1;
        Ok(())
    }
}

/// Copy the first plane of an RGB24 frame into a buffer without row padding.
fn packed_rgb(rgb: &frame::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let row_len = width as usize * 3;
    let data = rgb.data(0);

    if stride == row_len {
        return data[..row_len * height as usize].to_vec();
    }

    let mut buffer = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        buffer.extend_from_slice(&data[start..start + row_len]);
    }
    buffer
}
