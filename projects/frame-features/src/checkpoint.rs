// Sub-module weight selection from a full model checkpoint.
//
// The checkpoint holds every trainable parameter of the vision-language model
// under one prefix (`learnable.`). Only the image encoder's parameters are
// needed here; they are returned keyed the way the encoder graph names its
// initializers, i.e. with the prefix stripped.

use anyhow::{Context, Result};
use half::{bf16, f16};
use safetensors::{Dtype, SafeTensors};
use std::fs;
use std::path::Path;

/// A single parameter widened to f32.
#[derive(Debug, Clone)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NamedTensor {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Reads `path` and keeps the tensors whose key starts with `prefix` and
/// whose remainder contains `submodule`. Sorted by name.
pub fn load_submodule(path: &Path, prefix: &str, submodule: &str) -> Result<Vec<NamedTensor>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read checkpoint {:?}", path))?;
    let tensors = select_submodule(&bytes, prefix, submodule)
        .with_context(|| format!("Invalid checkpoint {:?}", path))?;

    let params: usize = tensors.iter().map(|t| t.numel()).sum();
    tracing::info!(
        "Loaded {} '{}' tensors ({} parameters) from {:?}",
        tensors.len(),
        submodule,
        params,
        path
    );
    Ok(tensors)
}

pub fn select_submodule(bytes: &[u8], prefix: &str, submodule: &str) -> Result<Vec<NamedTensor>> {
    let checkpoint = SafeTensors::deserialize(bytes)?;

    let mut selected = Vec::new();
    let mut skipped = 0usize;
    for (key, view) in checkpoint.tensors() {
        let Some(name) = key.strip_prefix(prefix) else {
            skipped += 1;
            continue;
        };
        if !name.contains(submodule) {
            skipped += 1;
            continue;
        }

        // Integer buffers such as BatchNorm `num_batches_tracked` are not weights.
        let Some(data) = widen_to_f32(view.dtype(), view.data()) else {
            tracing::debug!("Skipping non-float tensor '{}' ({:?})", key, view.dtype());
            skipped += 1;
            continue;
        };
        selected.push(NamedTensor {
            name: name.to_string(),
            shape: view.shape().to_vec(),
            data,
        });
    }

    if selected.is_empty() {
        anyhow::bail!(
            "No tensors under '{}' matching '{}' ({} tensors skipped)",
            prefix,
            submodule,
            skipped
        );
    }
    tracing::debug!("Checkpoint: kept {}, skipped {}", selected.len(), skipped);

    selected.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(selected)
}

fn widen_to_f32(dtype: Dtype, data: &[u8]) -> Option<Vec<f32>> {
    let values = match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        _ => return None,
    };
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::TensorView;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn checkpoint_bytes() -> Vec<u8> {
        let conv = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let bias = f32_bytes(&[0.5, -0.5]);
        let text = f32_bytes(&[9.0]);
        let half_weight: Vec<u8> = [1.5f32, -2.0]
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect();
        let counter = 7i64.to_le_bytes().to_vec();

        let tensors = vec![
            (
                "learnable.imgencoder.backbone.conv.weight",
                TensorView::new(Dtype::F32, vec![2, 2], &conv).unwrap(),
            ),
            (
                "learnable.imgencoder.proj.bias",
                TensorView::new(Dtype::F32, vec![2], &bias).unwrap(),
            ),
            (
                "learnable.imgencoder.proj.half",
                TensorView::new(Dtype::F16, vec![2], &half_weight).unwrap(),
            ),
            (
                "learnable.textencoder.embed.weight",
                TensorView::new(Dtype::F32, vec![1], &text).unwrap(),
            ),
            (
                "optimizer.imgencoder.step",
                TensorView::new(Dtype::I64, vec![1], &counter).unwrap(),
            ),
        ];
        safetensors::serialize(tensors, &None).unwrap()
    }

    #[test]
    fn test_selects_image_encoder_and_strips_prefix() {
        let tensors = select_submodule(&checkpoint_bytes(), "learnable.", "imgencoder.").unwrap();
        let names: Vec<_> = tensors.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "imgencoder.backbone.conv.weight",
                "imgencoder.proj.bias",
                "imgencoder.proj.half",
            ]
        );

        assert_eq!(tensors[0].shape, vec![2, 2]);
        assert_eq!(tensors[0].data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(tensors[2].data, vec![1.5, -2.0]);
        assert_eq!(tensors[1].numel(), 2);
    }

    #[test]
    fn test_no_match_is_an_error() {
        assert!(select_submodule(&checkpoint_bytes(), "learnable.", "audioencoder.").is_err());
        assert!(select_submodule(&checkpoint_bytes(), "model.", "imgencoder.").is_err());
    }

    #[test]
    fn test_integer_buffers_are_skipped() {
        let weight = f32_bytes(&[0.25, 0.75]);
        let tracked = 1200i64.to_le_bytes().to_vec();
        let bytes = safetensors::serialize(
            vec![
                (
                    "learnable.imgencoder.bn1.weight",
                    TensorView::new(Dtype::F32, vec![2], &weight).unwrap(),
                ),
                (
                    "learnable.imgencoder.bn1.num_batches_tracked",
                    TensorView::new(Dtype::I64, vec![], &tracked).unwrap(),
                ),
            ],
            &None,
        )
        .unwrap();

        let tensors = select_submodule(&bytes, "learnable.", "imgencoder.").unwrap();
        assert_eq!(tensors.len(), 1);
        assert_eq!(tensors[0].name, "imgencoder.bn1.weight");
        assert_eq!(tensors[0].data, vec![0.25, 0.75]);
    }

    #[test]
    fn test_only_integer_matches_is_an_error() {
        // The optimizer step counter is the only match and it is not a weight.
        assert!(select_submodule(&checkpoint_bytes(), "optimizer.", "imgencoder.").is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(select_submodule(b"not a checkpoint", "learnable.", "imgencoder.").is_err());
    }
}
