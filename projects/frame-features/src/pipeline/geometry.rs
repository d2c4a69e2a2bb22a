use crate::pipeline::types::BBox;
use anyhow::Result;

/// Maps boxes from a `width x height` frame onto the square model input.
pub fn rescale_boxes(boxes: &[BBox], frame_size: (u32, u32), new_size: u32) -> Vec<BBox> {
    let (width, height) = frame_size;
    let sx = new_size as f32 / width as f32;
    let sy = new_size as f32 / height as f32;

    boxes
        .iter()
        .map(|b| BBox::new(b.x1 * sx, b.y1 * sy, b.x2 * sx, b.y2 * sy))
        .collect()
}

/// Box rows and mask for the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionInput {
    /// `<max_len, 4>` row-major
    pub boxes: Vec<f32>,
    /// `<max_len>`
    pub mask: Vec<f32>,
    /// Real rows, whole-image box included
    pub len: usize,
}

/// Builds the region rows for one frame: at most `max_len - 1` proposals in
/// their given order, then the whole-image box, then zero rows up to `max_len`.
///
/// The mask marks only the real rows. The encoder graph must therefore be
/// exported with a static `<1, max_len, 4>` box input that honours the mask.
/// A graph traced with an all-ones mask over unpadded `<1, n + 1, 4>` boxes
/// would treat the zero rows as regions and is not compatible.
pub fn build_region_input(
    boxes: &[BBox],
    frame_size: (u32, u32),
    new_size: u32,
    max_len: usize,
) -> Result<RegionInput> {
    let (width, height) = frame_size;
    if width == 0 || height == 0 {
        anyhow::bail!("Cannot rescale boxes of an empty {}x{} frame", width, height);
    }
    if max_len == 0 {
        anyhow::bail!("Region input needs room for the whole-image box");
    }

    let kept = &boxes[..boxes.len().min(max_len - 1)];
    let mut rows = rescale_boxes(kept, frame_size, new_size);
    let side = new_size as f32;
    rows.push(BBox::new(0.0, 0.0, side, side));

    let len = rows.len();
    let mut flat = Vec::with_capacity(max_len * 4);
    for row in &rows {
        flat.extend_from_slice(&row.to_array());
    }
    flat.resize(max_len * 4, 0.0);

    let mut mask = vec![1.0; len];
    mask.resize(max_len, 0.0);

    Ok(RegionInput {
        boxes: flat,
        mask,
        len,
    })
}
