use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "flv"];

/// One row of a video list CSV.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct VideoRecord {
    vid: String,
}

/// Identifier of a video: its file name up to the first `.`.
pub fn video_id(video_path: &Path) -> Result<String> {
    let name = video_path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid video path: {:?}", video_path))?;

    let id = name.split('.').next().unwrap_or_default();
    if id.is_empty() {
        anyhow::bail!("Cannot derive a video id from {:?}", video_path);
    }
    Ok(id.to_string())
}

pub fn list_videos(video_root: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(video_root)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!("Skipping unreadable entry under {:?}: {}", video_root, err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| VIDEO_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    videos.sort();
    videos
}

/// Reads the `vid` column of a video list. Relative entries are resolved
/// against `vid_dir` when one is given.
pub fn read_video_csv(csv_path: &Path, vid_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open video list {:?}", csv_path))?;

    let has_vid = reader.headers()?.iter().any(|h| h == "vid");
    if !has_vid {
        anyhow::bail!("Video list {:?} has no 'vid' column", csv_path);
    }

    let mut videos = Vec::new();
    for record in reader.deserialize::<VideoRecord>() {
        let record = record.with_context(|| format!("Malformed row in {:?}", csv_path))?;
        let path = PathBuf::from(record.vid.trim());
        let path = match vid_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        };
        videos.push(path);
    }
    Ok(videos)
}

/// Writes a `vid` CSV listing every video under `vid_dir`. Returns the number of rows.
pub fn write_generated_csv(vid_dir: &Path, csv_path: &Path) -> Result<usize> {
    let videos = list_videos(vid_dir);

    if let Some(parent) = csv_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(csv_path)
        .with_context(|| format!("Failed to create {:?}", csv_path))?;
    for video in &videos {
        writer.serialize(VideoRecord {
            vid: video.to_string_lossy().to_string(),
        })?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} videos to {:?}", videos.len(), csv_path);
    Ok(videos.len())
}

/// Collects the videos to process: explicit paths first, then CSV rows.
/// The directory listing is only used when neither is given.
pub fn resolve_videos(
    explicit: &[PathBuf],
    csv_path: Option<&Path>,
    vid_dir: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let mut videos = explicit.to_vec();

    if let Some(csv_path) = csv_path {
        videos.extend(read_video_csv(csv_path, vid_dir)?);
    }

    if videos.is_empty() {
        if let Some(dir) = vid_dir {
            videos = list_videos(dir);
        }
    }

    if videos.is_empty() {
        anyhow::bail!("No videos to process");
    }
    Ok(videos)
}

/// Video ids shared by more than one input. Their frames and features
/// land in the same files, so later videos overwrite earlier ones.
pub fn duplicate_ids(videos: &[PathBuf]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for video in videos {
        if let Ok(vid) = video_id(video) {
            if !seen.insert(vid.clone()) && !duplicates.contains(&vid) {
                duplicates.push(vid);
            }
        }
    }
    duplicates
}

/// Per-video output locations.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub vid: String,
    pub video_path: PathBuf,
    pub frame_dir: PathBuf,
    pub feat_save_dir: PathBuf,
}

impl RunContext {
    pub fn create(frames_dir: &Path, feat_save_dir: &Path, video_path: &Path) -> Result<Self> {
        let vid = video_id(video_path)?;
        let frame_dir = frames_dir.join(&vid);

        fs::create_dir_all(&frame_dir)
            .with_context(|| format!("Failed to create frame directory {:?}", frame_dir))?;
        fs::create_dir_all(feat_save_dir)
            .with_context(|| format!("Failed to create feature directory {:?}", feat_save_dir))?;

        Ok(Self {
            vid,
            video_path: video_path.to_path_buf(),
            frame_dir,
            feat_save_dir: feat_save_dir.to_path_buf(),
        })
    }

    /// `<feat_save_dir>/<vid>_<frame number>.npy`
    pub fn feature_path(&self, frame_path: &Path) -> Result<PathBuf> {
        let stem = frame_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid frame path: {:?}", frame_path))?;
        Ok(self.feat_save_dir.join(format!("{}_{}.npy", self.vid, stem)))
    }
}
