use serde::Serialize;

/// Axis-aligned box `[x1, y1, x2, y2]` in pixel coordinates of some image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let intersection = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// A region proposal from the detector.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bbox: BBox, // frame pixel coords
    pub confidence: f32,
    pub class_id: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

/// Tensors fed to the image encoder for one frame.
#[derive(Debug, Clone)]
pub struct EncoderInput {
    /// `<3, S, S>` normalized CHW pixels
    pub image: Vec<f32>,
    pub img_size: usize,
    /// `<L>` region mask, 1.0 for real rows
    pub mask: Vec<f32>,
    /// `<L, 4>` boxes in model input coordinates, row-major
    pub boxes: Vec<f32>,
    pub max_len: usize,
}
