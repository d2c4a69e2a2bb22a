// Model configuration loaded from the YAML config file.
//
// Only the keys the extractor needs are read; the rest of a full training
// config is ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug)]
struct ConfigFile {
    #[serde(rename = "MODEL")]
    model: ModelConfig,
}

/// Hyper-parameters of the image encoder.
#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
    /// Side of the square model input, in pixels
    #[serde(rename = "IMG_SIZE")]
    pub img_size: u32,
    /// Number of region rows the encoder takes, whole-image box included
    #[serde(rename = "MAX_IMG_LEN")]
    pub max_img_len: usize,
    #[serde(rename = "ENCODER_IO", default)]
    pub encoder: EncoderIo,
}

/// Graph input names and checkpoint key selection for the encoder.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EncoderIo {
    #[serde(rename = "IMAGE", default = "default_image_input")]
    pub image: String,
    #[serde(rename = "IMAGE_MASK", default = "default_mask_input")]
    pub image_mask: String,
    #[serde(rename = "IMAGE_BOXES", default = "default_boxes_input")]
    pub image_boxes: String,
    /// Prefix of the trainable parameter dictionary inside the checkpoint
    #[serde(rename = "CHECKPOINT_PREFIX", default = "default_checkpoint_prefix")]
    pub checkpoint_prefix: String,
    /// Marker selecting the image sub-module's parameters
    #[serde(rename = "SUBMODULE", default = "default_submodule")]
    pub submodule: String,
    /// How checkpoint keys map onto the graph's initializer names
    #[serde(rename = "INITIALIZER_NAMES", default)]
    pub initializer_names: InitializerNames,
}

/// Initializer naming of the exported encoder graph, for the checkpoint key
/// `learnable.imgencoder.conv.weight`.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitializerNames {
    /// `learnable.imgencoder.conv.weight` (whole image model exported)
    #[default]
    Checkpoint,
    /// `imgencoder.conv.weight`
    Submodule,
    /// `conv.weight` (encoder module exported on its own)
    Local,
}

fn default_image_input() -> String {
    "image".to_string()
}

fn default_mask_input() -> String {
    "image_mask".to_string()
}

fn default_boxes_input() -> String {
    "image_boxes".to_string()
}

fn default_checkpoint_prefix() -> String {
    "learnable.".to_string()
}

fn default_submodule() -> String {
    "imgencoder.".to_string()
}

impl Default for EncoderIo {
    fn default() -> Self {
        Self {
            image: default_image_input(),
            image_mask: default_mask_input(),
            image_boxes: default_boxes_input(),
            checkpoint_prefix: default_checkpoint_prefix(),
            submodule: default_submodule(),
            initializer_names: InitializerNames::default(),
        }
    }
}

impl EncoderIo {
    /// Graph initializer name for a tensor selected from the checkpoint.
    /// `name` is the key with `checkpoint_prefix` already stripped.
    pub fn initializer_name(&self, name: &str) -> String {
        match self.initializer_names {
            InitializerNames::Checkpoint => format!("{}{}", self.checkpoint_prefix, name),
            InitializerNames::Submodule => name.to_string(),
            InitializerNames::Local => match name.find(&self.submodule) {
                Some(pos) => name[pos + self.submodule.len()..].to_string(),
                None => name.to_string(),
            },
        }
    }
}

impl ModelConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Invalid model config {:?}", path))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content)?;
        file.model.validate()?;
        Ok(file.model)
    }

    fn validate(&self) -> Result<()> {
        if self.img_size == 0 {
            anyhow::bail!("MODEL.IMG_SIZE must be positive");
        }
        if self.max_img_len == 0 {
            anyhow::bail!("MODEL.MAX_IMG_LEN must be at least 1 (the whole-image box)");
        }
        Ok(())
    }

    /// Number of detector boxes that fit next to the whole-image box.
    pub fn max_proposals(&self) -> usize {
        self.max_img_len - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_training_config_and_ignores_other_keys() {
        let yaml = r#"
MODEL:
  IMG_SIZE: 380
  MAX_IMG_LEN: 100
  TEXT_FEATURE_DIM: 768
  ENCODER:
    NAME: efficientnet-b7
TRAIN:
  BATCH_SIZE: 16
"#;
        let cfg = ModelConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.img_size, 380);
        assert_eq!(cfg.max_img_len, 100);
        assert_eq!(cfg.max_proposals(), 99);
        assert_eq!(cfg.encoder, EncoderIo::default());
    }

    #[test]
    fn test_encoder_io_overrides() {
        let yaml = r#"
MODEL:
  IMG_SIZE: 456
  MAX_IMG_LEN: 36
  ENCODER_IO:
    IMAGE: pixel_values
    SUBMODULE: vision.
"#;
        let cfg = ModelConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.encoder.image, "pixel_values");
        assert_eq!(cfg.encoder.image_mask, "image_mask");
        assert_eq!(cfg.encoder.submodule, "vision.");
        assert_eq!(cfg.encoder.checkpoint_prefix, "learnable.");
    }

    #[test]
    fn test_initializer_names() {
        let mut io = EncoderIo::default();
        assert_eq!(
            io.initializer_name("imgencoder.conv.weight"),
            "learnable.imgencoder.conv.weight"
        );

        io.initializer_names = InitializerNames::Submodule;
        assert_eq!(io.initializer_name("imgencoder.conv.weight"), "imgencoder.conv.weight");

        io.initializer_names = InitializerNames::Local;
        assert_eq!(io.initializer_name("imgencoder.conv.weight"), "conv.weight");
        assert_eq!(io.initializer_name("model.imgencoder.bn.bias"), "bn.bias");
    }

    #[test]
    fn test_initializer_names_from_yaml() {
        let yaml = "MODEL:\n  IMG_SIZE: 8\n  MAX_IMG_LEN: 2\n  ENCODER_IO:\n    INITIALIZER_NAMES: local\n";
        let cfg = ModelConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.encoder.initializer_names, InitializerNames::Local);
        assert!(ModelConfig::from_yaml_str(
            "MODEL:\n  IMG_SIZE: 8\n  MAX_IMG_LEN: 2\n  ENCODER_IO:\n    INITIALIZER_NAMES: bogus\n"
        )
        .is_err());
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(ModelConfig::from_yaml_str("MODEL:\n  IMG_SIZE: 0\n  MAX_IMG_LEN: 4\n").is_err());
        assert!(ModelConfig::from_yaml_str("MODEL:\n  IMG_SIZE: 8\n  MAX_IMG_LEN: 0\n").is_err());
        assert!(ModelConfig::from_yaml_str("MODEL:\n  IMG_SIZE: 8\n").is_err());
    }
}
