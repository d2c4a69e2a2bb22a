// Pipeline orchestrator: drives videos through frame extraction, region
// proposals and the image encoder, one `.npy` per frame.

use crate::cli::ExtractArgs;
use crate::config::ModelConfig;
use crate::pipeline::detection::{ObjectDetector, RegionProposer};
use crate::pipeline::encoder::{FeatureEncoder, OnnxImageEncoder};
use crate::pipeline::geometry::build_region_input;
use crate::pipeline::preprocess::to_model_tensor;
use crate::pipeline::types::{BBox, EncoderInput};
use crate::run_artifacts::{write_feature, VideoMetadata};
use crate::run_context::{duplicate_ids, resolve_videos, RunContext};
use crate::video::{clear_frames, create_extractor};
use anyhow::{Context, Result};
use chrono::Utc;
use image::GenericImageView;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Detector, encoder and model settings shared by every frame of a run.
pub struct FeatureExtractor<D, E> {
    proposer: D,
    encoder: E,
    config: ModelConfig,
}

impl<D: RegionProposer, E: FeatureEncoder> FeatureExtractor<D, E> {
    pub fn new(proposer: D, encoder: E, config: ModelConfig) -> Self {
        Self {
            proposer,
            encoder,
            config,
        }
    }

    /// Embeds a single frame image.
    pub fn extract_frame(&mut self, frame_path: &Path) -> Result<Vec<f32>> {
        let image = image::open(frame_path)
            .with_context(|| format!("Failed to read frame {:?}", frame_path))?;
        let (width, height) = image.dimensions();

        let detections = self.proposer.propose(&image)?;
        let boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();

        let regions = build_region_input(
            &boxes,
            (width, height),
            self.config.img_size,
            self.config.max_img_len,
        )?;
        tracing::debug!(
            "{:?}: {} proposals, {} region rows",
            frame_path,
            detections.len(),
            regions.len
        );

        let input = EncoderInput {
            image: to_model_tensor(&image, self.config.img_size),
            img_size: self.config.img_size as usize,
            mask: regions.mask,
            boxes: regions.boxes,
            max_len: self.config.max_img_len,
        };

        self.encoder.encode(&input)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingStats {
    pub processed_frames: usize,
    pub duration: Duration,
}

/// Writes one feature file per frame, in frame order.
pub fn process_video<D, E>(
    ctx: &RunContext,
    extractor: &mut FeatureExtractor<D, E>,
    frames: &[PathBuf],
) -> Result<ProcessingStats>
where
    D: RegionProposer,
    E: FeatureEncoder,
{
    let start_time = Instant::now();

    let pb = ProgressBar::new(frames.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")?
            .progress_chars("#>-"),
    );

    let mut processed_frames = 0;
    for frame_path in frames {
        let feature = extractor.extract_frame(frame_path)?;
        let feature_path = ctx.feature_path(frame_path)?;
        write_feature(&feature_path, &feature)?;
        processed_frames += 1;
        pb.inc(1);
    }

    pb.finish_with_message("Done");

    Ok(ProcessingStats {
        processed_frames,
        duration: start_time.elapsed(),
    })
}

/// Entry point of the `extract` command.
pub fn run(args: &ExtractArgs) -> Result<()> {
    if args.fps <= 0.0 {
        anyhow::bail!("--fps must be positive, got {}", args.fps);
    }

    let config = ModelConfig::from_yaml_file(&args.cfg_file)?;
    tracing::info!(
        "Model config: IMG_SIZE={}, MAX_IMG_LEN={} ({} proposals per frame)",
        config.img_size,
        config.max_img_len,
        config.max_proposals()
    );

    let videos = resolve_videos(
        &args.videos,
        args.vid_csv_path.as_deref(),
        args.vid_dir.as_deref(),
    )?;
    tracing::info!("{} videos to process", videos.len());
    for vid in duplicate_ids(&videos) {
        tracing::warn!(
            "Several videos share the id '{}'; later ones overwrite its frames and features",
            vid
        );
    }

    let detector = ObjectDetector::new(&args.detector_model, args.device, args.min_conf, args.nms_iou)?;
    let encoder = OnnxImageEncoder::load(
        &args.encoder_model,
        args.checkpoint.as_deref(),
        &config.encoder,
        args.device,
    )?;
    let mut extractor = FeatureExtractor::new(detector, encoder, config);
    let mut frame_extractor = create_extractor(args.backend, &args.ffmpeg_bin);

    let run_start = Instant::now();
    let mut total_features = 0;
    for (index, video_path) in videos.iter().enumerate() {
        let ctx = RunContext::create(&args.frames_dir, &args.feat_save_dir, video_path)?;
        tracing::info!(
            "[{}/{}] {} ({:?})",
            index + 1,
            videos.len(),
            ctx.vid,
            video_path
        );

        let stale = clear_frames(&ctx.frame_dir)?;
        if stale > 0 {
            tracing::warn!("Removed {} frames left from an earlier run in {:?}", stale, ctx.frame_dir);
        }

        let frames = frame_extractor.extract(video_path, &ctx.frame_dir, args.fps)?;
        if frames.is_empty() {
            tracing::warn!("No frames extracted from {:?}", video_path);
        }

        let stats = process_video(&ctx, &mut extractor, &frames)?;
        tracing::info!(
            "{}: {} features in {:.2}s",
            ctx.vid,
            stats.processed_frames,
            stats.duration.as_secs_f64()
        );

        let original_name = video_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        VideoMetadata {
            original_name,
            vid: ctx.vid.clone(),
            created_at: Utc::now(),
            backend: args.backend.as_str().to_string(),
            fps: args.fps,
            frame_count: frames.len(),
            features_written: stats.processed_frames,
        }
        .write(&ctx.frame_dir)?;

        total_features += stats.processed_frames;
    }

    tracing::info!(
        "Finished {} videos, {} features written to {:?} in {:.2}s",
        videos.len(),
        total_features,
        args.feat_save_dir,
        run_start.elapsed().as_secs_f64()
    );
    Ok(())
}
