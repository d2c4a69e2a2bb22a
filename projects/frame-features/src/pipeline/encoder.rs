use crate::checkpoint::load_submodule;
use crate::cli::DeviceSpec;
use crate::config::EncoderIo;
use crate::pipeline::types::EncoderInput;
use anyhow::{anyhow, Context, Result};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// Turns one frame's tensors into a feature vector.
pub trait FeatureEncoder {
    fn encode(&mut self, input: &EncoderInput) -> Result<Vec<f32>>;
}

/// The frozen image encoder, exported to ONNX and run through ONNX Runtime.
/// Output vectors are L2-normalized.
pub struct OnnxImageEncoder {
    session: Session,
    io: EncoderIo,
}

impl OnnxImageEncoder {
    /// Builds the session. When a checkpoint is given, its image-encoder
    /// tensors override the same-named initializers stored in the graph.
    pub fn load(
        model_path: &Path,
        checkpoint: Option<&Path>,
        io: &EncoderIo,
        device: DeviceSpec,
    ) -> Result<Self> {
        if !model_path.exists() {
            anyhow::bail!("Encoder model NOT FOUND at: {:?}", model_path);
        }

        let builder = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {}", e))?;
        let mut builder = with_device(builder, device)?;

        if let Some(checkpoint) = checkpoint {
            let tensors = load_submodule(checkpoint, &io.checkpoint_prefix, &io.submodule)?;
            for tensor in tensors {
                let name = io.initializer_name(&tensor.name);
                let value = Tensor::from_array((tensor.shape.clone(), tensor.data.into_boxed_slice()))
                    .with_context(|| format!("Failed to build initializer '{}'", name))?
                    .into_dyn();
                builder = builder
                    .with_initializer(&name, value)
                    .map_err(|e| anyhow!("Failed to bind initializer '{}': {}", name, e))?;
            }
        }

        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| anyhow!("Failed to load encoder {:?}: {}", model_path, e))?;
        tracing::info!("Encoder loaded from {:?} (device={:?})", model_path, device);

        Ok(Self {
            session,
            io: io.clone(),
        })
    }
}

fn with_device(builder: SessionBuilder, device: DeviceSpec) -> Result<SessionBuilder> {
    match device {
        DeviceSpec::Cpu => Ok(builder),
        #[cfg(feature = "cuda")]
        DeviceSpec::Cuda(id) => builder
            .with_execution_providers([ort::execution_providers::CUDAExecutionProvider::default()
                .with_device_id(id as i32)
                .build()])
            .map_err(|e| anyhow!("Failed to register CUDA execution provider: {}", e)),
        #[cfg(not(feature = "cuda"))]
        DeviceSpec::Cuda(_) => anyhow::bail!("Built without the `cuda` feature"),
        #[cfg(target_os = "macos")]
        DeviceSpec::CoreMl => builder
            .with_execution_providers([
                ort::execution_providers::CoreMLExecutionProvider::default().build()
            ])
            .map_err(|e| anyhow!("Failed to register CoreML execution provider: {}", e)),
        #[cfg(not(target_os = "macos"))]
        DeviceSpec::CoreMl => anyhow::bail!("CoreML is only available on macOS"),
    }
}

impl FeatureEncoder for OnnxImageEncoder {
    fn encode(&mut self, input: &EncoderInput) -> Result<Vec<f32>> {
        check_input(input)?;
        let side = input.img_size;
        let len = input.max_len;

        let image = Tensor::from_array(([1usize, 3, side, side], input.image.clone().into_boxed_slice()))
            .context("Failed to create image tensor")?;
        let mask = Tensor::from_array(([1usize, len], input.mask.clone().into_boxed_slice()))
            .context("Failed to create mask tensor")?;
        let boxes = Tensor::from_array(([1usize, len, 4], input.boxes.clone().into_boxed_slice()))
            .context("Failed to create boxes tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![
                self.io.image.as_str() => image,
                self.io.image_mask.as_str() => mask,
                self.io.image_boxes.as_str() => boxes,
            ])
            .context("Encoder inference failed")?;

        let first = outputs
            .iter()
            .next()
            .context("Encoder produced no outputs")?
            .1;
        let (shape, data) = first
            .try_extract_tensor::<f32>()
            .context("Failed to extract encoder output")?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        let squeezable = match dims.as_slice() {
            [_] => true,
            [1, _] => true,
            _ => false,
        };
        if !squeezable {
            anyhow::bail!("Expected a <1, D> encoder output, got {:?}", dims);
        }

        Ok(l2_normalize(data))
    }
}

fn check_input(input: &EncoderInput) -> Result<()> {
    let side = input.img_size;
    if input.image.len() != 3 * side * side {
        anyhow::bail!(
            "Image tensor has {} values, expected 3x{}x{}",
            input.image.len(),
            side,
            side
        );
    }
    if input.mask.len() != input.max_len || input.boxes.len() != input.max_len * 4 {
        anyhow::bail!(
            "Region tensors do not match MAX_IMG_LEN={} (mask {}, boxes {})",
            input.max_len,
            input.mask.len(),
            input.boxes.len()
        );
    }
    Ok(())
}

/// `x / max(||x||_2, 1e-12)`
pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
    values.iter().map(|v| v / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let norm: f32 = l2_normalize(&[1.0, -2.0, 2.0, 0.5])
            .iter()
            .map(|x| x * x)
            .sum::<f32>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_stays_zero() {
        assert_eq!(l2_normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_check_input_shapes() {
        let good = EncoderInput {
            image: vec![0.0; 3 * 4 * 4],
            img_size: 4,
            mask: vec![1.0; 2],
            boxes: vec![0.0; 8],
            max_len: 2,
        };
        assert!(check_input(&good).is_ok());

        let mut bad_image = good.clone();
        bad_image.image.pop();
        assert!(check_input(&bad_image).is_err());

        let mut bad_boxes = good.clone();
        bad_boxes.boxes.push(0.0);
        assert!(check_input(&bad_boxes).is_err());
    }

    #[test]
    fn test_missing_model_is_reported() {
        let err = OnnxImageEncoder::load(
            Path::new("/nonexistent/encoder.onnx"),
            None,
            &EncoderIo::default(),
            DeviceSpec::Cpu,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("NOT FOUND"));
    }
}
