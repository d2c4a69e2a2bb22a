use crate::cli::DeviceSpec;
use crate::pipeline::types::{BBox, Detection};
use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use usls::models::RTDETR;
use usls::{Config, Image};

/// Source of candidate regions for a frame.
pub trait RegionProposer {
    /// Boxes in the frame's pixel coordinates, most confident first.
    fn propose(&mut self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

/// A wrapper around the USLS RT-DETR model that filters, de-duplicates and
/// ranks its boxes, and corrects for aspect-ratio padding bugs in the
/// underlying model library.
pub struct ObjectDetector {
    model: RTDETR,
    min_conf: f32,
    nms_iou: f32,
}

impl ObjectDetector {
    pub fn new(model_path: &Path, device: DeviceSpec, min_conf: f32, nms_iou: f32) -> Result<Self> {
        let model_file = model_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid detector model path: {:?}", model_path))?;
        if !model_path.exists() {
            anyhow::bail!("Detector model NOT FOUND at: {:?}", model_path);
        }

        let config = detector_config(model_file, min_conf);

        let config = match device {
            DeviceSpec::Cpu => config,
            DeviceSpec::Cuda(id) => config.with_model_device(usls::Device::Cuda(id)),
            #[cfg(target_os = "macos")]
            DeviceSpec::CoreMl => config.with_model_device(usls::Device::CoreMl),
            #[cfg(not(target_os = "macos"))]
            DeviceSpec::CoreMl => anyhow::bail!("CoreML is only available on macOS"),
        };

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        tracing::info!(
            "Detector loaded from {:?} (device={:?}, min_conf={}, nms_iou={})",
            model_path,
            device,
            min_conf,
            nms_iou
        );

        Ok(Self {
            model,
            min_conf,
            nms_iou,
        })
    }
}

impl RegionProposer for ObjectDetector {
    fn propose(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let (img_w, img_h) = image.dimensions();
        let (x_corr, y_corr) = padding_correction(img_w as f32, img_h as f32);

        let results = self.model.forward(&[Image::from(image.clone())])?;
        let hbbs = results.into_iter().next().map(|y| y.hbbs).unwrap_or_default();

        let detections: Vec<Detection> = hbbs
            .into_iter()
            .filter(|hbb| hbb.confidence().unwrap_or(0.0) >= self.min_conf)
            .map(|hbb| {
                let x = hbb.xmin() * x_corr;
                let y = hbb.ymin() * y_corr;
                let w = hbb.width() * x_corr;
                let h = hbb.height() * y_corr;
                Detection {
                    bbox: BBox::new(x, y, x + w, y + h),
                    confidence: hbb.confidence().unwrap_or(0.0),
                    class_id: hbb.id().unwrap_or(0),
                    class_name: hbb.name().map(|s| s.to_string()),
                }
            })
            .collect();

        Ok(nms(detections, self.nms_iou))
    }
}

/// The usls config applies its own confidence floor while post-processing,
/// so `min_conf` has to be set there as well as in `propose`.
fn detector_config(model_file: &str, min_conf: f32) -> Config {
    Config::default()
        .with_model_file(model_file)
        .with_class_names(&usls::NAMES_COCO_80)
        .with_class_confs(&[min_conf])
}

/// USLS RT-DETR reports boxes as if the frame were letterboxed to a square on
/// its short side; scale the long axis back.
fn padding_correction(img_w: f32, img_h: f32) -> (f32, f32) {
    if img_w > img_h {
        (img_w / img_h, 1.0)
    } else if img_h > img_w {
        (1.0, img_h / img_w)
    } else {
        (1.0, 1.0)
    }
}

/// Apply Non-Maximum Suppression to remove duplicate detections.
/// The result is sorted by confidence, highest first.
pub fn nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    let mut sorted = detections;
    sorted.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(sorted[i].clone());

        for j in (i + 1)..sorted.len() {
            if suppressed[j] {
                continue;
            }

            if sorted[i].bbox.iou(&sorted[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}
