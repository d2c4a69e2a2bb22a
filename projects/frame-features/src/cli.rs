use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract per-frame region-conditioned embeddings from videos
    Extract(ExtractArgs),
    /// Write a `vid` CSV listing every video under a directory
    ListVideos(ListVideosArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Root directory for extracted frame images (one sub-directory per video)
    #[arg(long, env = "FRAME_FEATURES_FRAMES_DIR")]
    pub frames_dir: PathBuf,

    /// Directory receiving the `.npy` feature files
    #[arg(long, env = "FRAME_FEATURES_FEAT_SAVE_DIR")]
    pub feat_save_dir: PathBuf,

    /// CSV file with a `vid` column of video paths
    #[arg(long)]
    pub vid_csv_path: Option<PathBuf>,

    /// Directory of videos (resolves relative CSV entries, or is walked when no videos are given)
    #[arg(long, env = "FRAME_FEATURES_VID_DIR")]
    pub vid_dir: Option<PathBuf>,

    /// Model config (YAML with a `MODEL` mapping)
    #[arg(long, env = "FRAME_FEATURES_CFG_FILE", default_value = "cfg/test_xyb.yml")]
    pub cfg_file: PathBuf,

    /// ONNX export of the image encoder
    #[arg(long, env = "FRAME_FEATURES_ENCODER_MODEL")]
    pub encoder_model: PathBuf,

    /// Safetensors checkpoint of the full model; its image-encoder weights override the graph's
    #[arg(long, env = "FRAME_FEATURES_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// RT-DETR ONNX model used for region proposals
    #[arg(long, env = "FRAME_FEATURES_DETECTOR_MODEL")]
    pub detector_model: PathBuf,

    /// Minimum detector confidence for a region proposal
    #[arg(long, default_value_t = 0.2)]
    pub min_conf: f32,

    /// IoU threshold for proposal de-duplication
    #[arg(long, default_value_t = 0.5)]
    pub nms_iou: f32,

    /// Frame extraction backend
    #[arg(long, value_enum, default_value_t = Backend::FfmpegCli)]
    pub backend: Backend,

    /// ffmpeg executable used by the ffmpeg-cli backend
    #[arg(long, env = "FRAME_FEATURES_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg_bin: PathBuf,

    /// Frames sampled per second of video
    #[arg(long, default_value_t = 1.0)]
    pub fps: f64,

    /// Inference device: cpu, cuda:<id> or coreml
    #[arg(long, env = "FRAME_FEATURES_DEVICE", default_value = "cpu")]
    pub device: DeviceSpec,

    /// Explicit video files
    pub videos: Vec<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListVideosArgs {
    /// Directory to walk for videos
    #[arg(long, env = "FRAME_FEATURES_VID_DIR")]
    pub vid_dir: PathBuf,

    /// CSV file to write
    #[arg(long)]
    pub output: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Spawn the `ffmpeg` binary with an fps filter
    FfmpegCli,
    /// Decode in-process with libavcodec
    Ffmpeg,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::FfmpegCli => "ffmpeg-cli",
            Backend::Ffmpeg => "ffmpeg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    CoreMl,
}

impl FromStr for DeviceSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "cpu" => Ok(DeviceSpec::Cpu),
            "coreml" => Ok(DeviceSpec::CoreMl),
            "cuda" => Ok(DeviceSpec::Cuda(0)),
            _ => match lower.strip_prefix("cuda:") {
                Some(id) => id
                    .parse::<usize>()
                    .map(DeviceSpec::Cuda)
                    .map_err(|_| format!("invalid CUDA device id: {}", id)),
                None => Err(format!(
                    "unknown device '{}', expected cpu, cuda:<id> or coreml",
                    s
                )),
            },
        }
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_spec_parsing() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
        assert_eq!("CUDA:1".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(1));
        assert_eq!("cuda".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(0));
        assert_eq!("coreml".parse::<DeviceSpec>().unwrap(), DeviceSpec::CoreMl);
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
        assert!("tpu".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn test_extract_args_defaults() {
        let args = Args::try_parse_from([
            "frame-features",
            "extract",
            "--frames-dir",
            "frames",
            "--feat-save-dir",
            "feats",
            "--encoder-model",
            "enc.onnx",
            "--detector-model",
            "det.onnx",
            "a.mp4",
            "b.mp4",
        ])
        .unwrap();

        match args.command {
            Command::Extract(extract) => {
                assert_eq!(extract.backend, Backend::FfmpegCli);
                assert_eq!(extract.fps, 1.0);
                assert_eq!(extract.device, DeviceSpec::Cpu);
                assert_eq!(extract.cfg_file, PathBuf::from("cfg/test_xyb.yml"));
                assert_eq!(extract.videos.len(), 2);
                assert!(extract.checkpoint.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
