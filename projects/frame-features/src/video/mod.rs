pub mod ffmpeg_cli;
pub mod ffmpeg_reader;

use crate::cli::Backend;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Turns a video into numbered frame images (`1.jpg`, `2.jpg`, ...).
pub trait FrameExtractor {
    /// Writes frames sampled at `fps` into `out_dir` and returns them in
    /// frame order.
    fn extract(&mut self, video_path: &Path, out_dir: &Path, fps: f64) -> Result<Vec<PathBuf>>;
}

pub fn create_extractor(backend: Backend, ffmpeg_bin: &Path) -> Box<dyn FrameExtractor> {
    match backend {
        Backend::FfmpegCli => Box::new(ffmpeg_cli::FfmpegCli::default().with_binary(ffmpeg_bin)),
        Backend::Ffmpeg => Box::new(ffmpeg_reader::FfmpegDecoder),
    }
}

/// Source frame index of sample unit `unit_id` when sampling `sample_rate`
/// frames per second from a `source_fps` stream.
pub fn unit_to_frame(unit_id: usize, source_fps: f64, sample_rate: f64) -> usize {
    (unit_id as f64 * source_fps / sample_rate).round() as usize
}

/// `*.jpg` files whose stem is a frame number, sorted numerically.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<(u64, PathBuf)> = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list frames in {:?}", dir))? {
        let path = entry?.path();
        let is_jpg = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("jpg"))
            .unwrap_or(false);
        if !is_jpg || !path.is_file() {
            continue;
        }

        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(number) = number {
            frames.push((number, path));
        }
    }

    frames.sort_by_key(|(number, _)| *number);
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

/// Removes numbered frames left in `dir` by an earlier run, so they are not
/// mistaken for frames of this one. Returns how many were removed.
pub fn clear_frames(dir: &Path) -> Result<usize> {
    let frames = list_frames(dir)?;
    for frame in &frames {
        fs::remove_file(frame).with_context(|| format!("Failed to remove stale frame {:?}", frame))?;
    }
    Ok(frames.len())
}
