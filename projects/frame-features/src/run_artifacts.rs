// Run artifact definitions
//
// Everything persisted by a run: the per-frame feature vectors and a JSON
// summary next to each video's extracted frames.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ndarray::Array1;
use ndarray_npy::write_npy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Summary written to `<frames_dir>/<vid>/metadata.json` once a video is done.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VideoMetadata {
    pub original_name: String,
    pub vid: String,
    pub created_at: DateTime<Utc>,
    pub backend: String,
    pub fps: f64,
    pub frame_count: usize,
    pub features_written: usize,
}

impl VideoMetadata {
    pub fn write(&self, frame_dir: &Path) -> Result<()> {
        let metadata_path = frame_dir.join("metadata.json");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&metadata_path, content)
            .with_context(|| format!("Failed to write {:?}", metadata_path))?;
        Ok(())
    }
}

/// Persists one feature vector as a 1-D float32 `.npy` array.
pub fn write_feature(path: &Path, feature: &[f32]) -> Result<()> {
    let array = Array1::from(feature.to_vec());
    write_npy(path, &array).with_context(|| format!("Failed to write feature {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::read_npy;
    use tempfile::tempdir;

    #[test]
    fn test_write_feature_is_readable_npy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip_1.npy");
        write_feature(&path, &[0.6, 0.8, 0.0]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..6], b"\x93NUMPY");

        let loaded: Array1<f32> = read_npy(&path).unwrap();
        assert_eq!(loaded.to_vec(), vec![0.6, 0.8, 0.0]);
    }

    #[test]
    fn test_metadata_json() {
        let dir = tempdir().unwrap();
        let metadata = VideoMetadata {
            original_name: "/videos/clip.mp4".to_string(),
            vid: "clip".to_string(),
            created_at: Utc::now(),
            backend: "ffmpeg-cli".to_string(),
            fps: 1.0,
            frame_count: 3,
            features_written: 3,
        };
        metadata.write(dir.path()).unwrap();

        let content = fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let parsed: VideoMetadata = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.vid, "clip");
        assert_eq!(parsed.features_written, 3);
    }
}
