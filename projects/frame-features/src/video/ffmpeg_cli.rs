use super::{list_frames, FrameExtractor};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Frame extraction through the `ffmpeg` binary and its `fps` filter.
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    binary: PathBuf,
    log_level: String,
}

impl Default for FfmpegCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            log_level: "error".to_string(),
        }
    }
}

impl FfmpegCli {
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn build_args(&self, video_path: &Path, out_dir: &Path, fps: f64) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
            "-i".to_string(),
            video_path.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("fps={}", fps),
            out_dir.join("%d.jpg").to_string_lossy().to_string(),
        ]
    }
}

impl FrameExtractor for FfmpegCli {
    fn extract(&mut self, video_path: &Path, out_dir: &Path, fps: f64) -> Result<Vec<PathBuf>> {
        if fps <= 0.0 {
            anyhow::bail!("Sampling rate must be positive, got {}", fps);
        }
        if !video_path.exists() {
            anyhow::bail!("Video file NOT FOUND at: {:?}", video_path);
        }

        let args = self.build_args(video_path, out_dir, fps);
        tracing::debug!("Running {:?} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .with_context(|| format!("Failed to run {:?}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "ffmpeg failed on {:?} ({}): {}",
                video_path,
                output.status,
                stderr.trim()
            );
        }

        list_frames(out_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_build_args() {
        let cli = FfmpegCli::default();
        let args = cli.build_args(Path::new("/v/clip.mp4"), Path::new("/f/clip"), 1.0);
        assert_eq!(
            args,
            vec!["-y", "-v", "error", "-i", "/v/clip.mp4", "-vf", "fps=1", "/f/clip/%d.jpg"]
        );

        let args = cli.build_args(Path::new("a.mp4"), Path::new("out"), 0.5);
        assert_eq!(args[6], "fps=0.5");
    }

    #[test]
    fn test_rejects_bad_inputs_before_spawning() {
        let dir = tempdir().unwrap();
        let mut cli = FfmpegCli::default().with_binary("/nonexistent/ffmpeg");

        assert!(cli.extract(Path::new("/nonexistent.mp4"), dir.path(), 1.0).is_err());

        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"").unwrap();
        assert!(cli.extract(&video, dir.path(), 0.0).is_err());

        // Spawning a missing binary is an error, not an empty frame list.
        assert!(cli.extract(&video, dir.path(), 1.0).is_err());
    }
}
