use super::{unit_to_frame, FrameExtractor};
use anyhow::{anyhow, Context, Result};
use ffmpeg_next::ffi;
use image::{ImageBuffer, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Sequential video reader backed by FFmpeg via ffmpeg-next.
/// Decodes on the CPU and hands out sampled frames as RGB images.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    source_fps: f64,
    sample_rate: f64,
    total_frames: usize,
    frames_decoded: usize,
    reuse_frame: ffmpeg_next::util::frame::Video,
    reuse_packet: ffmpeg_next::codec::packet::Packet,
    /// Whether we've sent EOF to the decoder.
    eof_sent: bool,
    /// Last emitted frame, repeated when sampling faster than the source.
    last_image: Option<RgbImage>,
}

/// What `read_unit` does to reach a target source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitStep {
    /// The target was already decoded: emit the previous frame again.
    Repeat,
    /// Drop `skip` frames, then decode the target.
    Decode { skip: usize },
}

fn unit_step(target_frame: usize, frames_decoded: usize) -> UnitStep {
    if target_frame < frames_decoded {
        UnitStep::Repeat
    } else {
        UnitStep::Decode {
            skip: target_frame - frames_decoded,
        }
    }
}

impl FfmpegReader {
    pub fn new(path: &Path, sample_rate: f64) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(anyhow!("Sampling rate must be positive, got {}", sample_rate));
        }
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;

        if !path.exists() {
            return Err(anyhow!("Video file NOT FOUND at: {:?}", path));
        }

        let input_ctx = ffmpeg_next::format::input(&path).context("Failed to open video file")?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {:?}", path))?;

        let video_stream_index = video_stream.index();

        let rational_fps = video_stream.avg_frame_rate();
        let source_fps = if rational_fps.denominator() > 0 && rational_fps.numerator() > 0 {
            rational_fps.numerator() as f64 / rational_fps.denominator() as f64
        } else {
            tracing::warn!("FfmpegReader: could not determine FPS, defaulting to 30.0");
            30.0
        };

        let stream_frames = video_stream.frames().max(0) as usize;
        let duration_secs = input_ctx.duration() as f64 / ffi::AV_TIME_BASE as f64;
        let total_frames = if stream_frames == 0 {
            (duration_secs * source_fps).round() as usize
        } else {
            stream_frames
        };

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .context("Failed to create decoder context")?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("Failed to open video decoder")?;

        tracing::info!(
            "FfmpegReader: opened {:?}, {}x{}, duration={:.2}s, fps={:.2}, estimated_frames={}",
            path,
            decoder.width(),
            decoder.height(),
            duration_secs,
            source_fps,
            total_frames
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None,
            source_fps,
            sample_rate,
            total_frames,
            frames_decoded: 0,
            reuse_frame: ffmpeg_next::util::frame::Video::empty(),
            reuse_packet: ffmpeg_next::codec::packet::Packet::empty(),
            eof_sent: false,
            last_image: None,
        })
    }

    /// Estimated number of sample units in the stream.
    pub fn frame_count(&self) -> usize {
        let units = (self.total_frames as f64 * self.sample_rate / self.source_fps).floor() as usize;
        units.max(1)
    }

    /// Decodes the next frame into `target`. Returns `false` at end of stream.
    fn decode_loop(&mut self, target: &mut ffmpeg_next::util::frame::Video) -> Result<bool> {
        loop {
            // 1. Try to receive a decoded frame
            match self.decoder.receive_frame(target) {
                Ok(()) => return Ok(true),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Ok(false);
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }

            // 2. Feed packets until we find a video packet OR reach EOF
            let mut found_packet = false;
            while self.reuse_packet.read(&mut self.input_ctx).is_ok() {
                if self.reuse_packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.reuse_packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                // EOF reached in input file: flush the decoder
                self.decoder
                    .send_eof()
                    .context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    /// Decodes into the persistent `reuse_frame`.
    fn receive_into_reuse(&mut self) -> Result<bool> {
        let mut frame = ffmpeg_next::util::frame::Video::empty();
        std::mem::swap(&mut frame, &mut self.reuse_frame);
        let res = self.decode_loop(&mut frame);
        std::mem::swap(&mut frame, &mut self.reuse_frame);
        res
    }

    fn to_rgb(&mut self, frame: &ffmpeg_next::util::frame::Video) -> Result<RgbImage> {
        if self.scaler.is_none() {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                ffmpeg_next::format::Pixel::RGB24,
                frame.width(),
                frame.height(),
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;
            self.scaler = Some(scaler);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow!("Scaler unavailable"))?;

        let mut rgb_frame = ffmpeg_next::util::frame::Video::empty();
        scaler.run(frame, &mut rgb_frame).context("Scaler failed")?;

        rgb_frame_to_image(&rgb_frame)
    }

    /// Reads sample unit `unit_id`. Units must be requested in increasing
    /// order. When the sampling rate exceeds the source rate, consecutive
    /// units map to the same source frame and that frame is repeated.
    /// Returns `None` once the stream is exhausted.
    pub fn read_unit(&mut self, unit_id: usize) -> Result<Option<RgbImage>> {
        let target_frame = unit_to_frame(unit_id, self.source_fps, self.sample_rate);

        let skip = match unit_step(target_frame, self.frames_decoded) {
            UnitStep::Repeat => {
                return match &self.last_image {
                    Some(image) => Ok(Some(image.clone())),
                    None => Err(anyhow!(
                        "FfmpegReader is sequential: frame {} already passed",
                        target_frame
                    )),
                };
            }
            UnitStep::Decode { skip } => skip,
        };

        for _ in 0..skip {
            if !self.receive_into_reuse()? {
                return Ok(None);
            }
            self.frames_decoded += 1;
        }

        if !self.receive_into_reuse()? {
            return Ok(None);
        }
        self.frames_decoded += 1;

        let frame = std::mem::replace(
            &mut self.reuse_frame,
            ffmpeg_next::util::frame::Video::empty(),
        );
        let image = self.to_rgb(&frame);
        self.reuse_frame = frame;
        let image = image?;
        self.last_image = Some(image.clone());
        Ok(Some(image))
    }
}

/// Copies an RGB24 frame (honouring its line stride) into an owned image.
fn rgb_frame_to_image(frame: &ffmpeg_next::util::frame::Video) -> Result<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let data = frame.data(0);
    let stride = frame.stride(0);

    let row_bytes = width * 3;
    let mut buffer = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
        let start = y * stride;
        buffer.extend_from_slice(&data[start..start + row_bytes]);
    }

    ImageBuffer::<Rgb<u8>, _>::from_raw(width as u32, height as u32, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from frame data"))
}

/// In-process frame extraction. Writes `<unit + 1>.jpg`, the same naming the
/// ffmpeg CLI produces.
pub struct FfmpegDecoder;

impl FrameExtractor for FfmpegDecoder {
    fn extract(&mut self, video_path: &Path, out_dir: &Path, fps: f64) -> Result<Vec<PathBuf>> {
        let start = Instant::now();
        let mut reader = FfmpegReader::new(video_path, fps)?;
        let expected = reader.frame_count();

        let mut frames = Vec::with_capacity(expected);
        let mut unit_id = 0;
        while let Some(image) = reader.read_unit(unit_id)? {
            let path = out_dir.join(format!("{}.jpg", unit_id + 1));
            image
                .save(&path)
                .with_context(|| format!("Failed to write frame {:?}", path))?;
            frames.push(path);
            unit_id += 1;
        }

        tracing::info!(
            "FfmpegDecoder: wrote {} frames (estimated {}) in {:.2}s",
            frames.len(),
            expected,
            start.elapsed().as_secs_f64()
        );
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_video_is_an_error() {
        let dir = tempdir().unwrap();
        let mut decoder = FfmpegDecoder;
        assert!(decoder
            .extract(Path::new("/nonexistent/clip.mp4"), dir.path(), 1.0)
            .is_err());
    }

    #[test]
    fn test_oversampling_repeats_frames() {
        // 30 samples per second from a 10 fps source: three units per frame.
        let targets: Vec<usize> = (0..6).map(|u| unit_to_frame(u, 10.0, 30.0)).collect();
        assert_eq!(targets, vec![0, 0, 1, 1, 1, 2]);

        let mut decoded = 0;
        let mut steps = Vec::new();
        for target in targets {
            let step = unit_step(target, decoded);
            if let UnitStep::Decode { skip } = step {
                decoded += skip + 1;
            }
            steps.push(step);
        }
        assert_eq!(
            steps,
            vec![
                UnitStep::Decode { skip: 0 },
                UnitStep::Repeat,
                UnitStep::Decode { skip: 0 },
                UnitStep::Repeat,
                UnitStep::Repeat,
                UnitStep::Decode { skip: 0 },
            ]
        );
    }

    #[test]
    fn test_undersampling_skips_frames() {
        assert_eq!(unit_step(0, 0), UnitStep::Decode { skip: 0 });
        assert_eq!(unit_step(25, 1), UnitStep::Decode { skip: 24 });
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        assert!(FfmpegReader::new(Path::new("/nonexistent/clip.mp4"), 0.0).is_err());
    }
}
