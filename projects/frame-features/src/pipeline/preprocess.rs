use image::imageops::FilterType;
use image::DynamicImage;

/// ImageNet channel statistics the encoder was trained with.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resizes to `new_size x new_size`, scales to [0, 1] and normalizes per
/// channel. Output is CHW, `3 * new_size * new_size` values.
pub fn to_model_tensor(image: &DynamicImage, new_size: u32) -> Vec<f32> {
    let resized = image
        .resize_exact(new_size, new_size, FilterType::Triangle)
        .to_rgb8();

    let plane = (new_size * new_size) as usize;
    let mut chw = vec![0f32; 3 * plane];
    let raw = resized.as_raw();

    for idx in 0..plane {
        for c in 0..3 {
            let v = raw[idx * 3 + c] as f32 / 255.0;
            chw[c * plane + idx] = (v - MEAN[c]) / STD[c];
        }
    }

    chw
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_uniform_image_normalizes_per_channel() {
        let img = ImageBuffer::from_pixel(40, 20, Rgb([255u8, 0, 128]));
        let tensor = to_model_tensor(&DynamicImage::ImageRgb8(img), 8);

        assert_eq!(tensor.len(), 3 * 64);
        let r = (1.0 - MEAN[0]) / STD[0];
        let g = (0.0 - MEAN[1]) / STD[1];
        let b = (128.0 / 255.0 - MEAN[2]) / STD[2];
        assert!(tensor[..64].iter().all(|v| (v - r).abs() < 1e-5));
        assert!(tensor[64..128].iter().all(|v| (v - g).abs() < 1e-5));
        assert!(tensor[128..].iter().all(|v| (v - b).abs() < 1e-5));
    }

    #[test]
    fn test_layout_is_channel_major() {
        // Left half red, right half blue: column position must survive in every plane.
        let img = ImageBuffer::from_fn(4, 4, |x, _| {
            if x < 2 {
                Rgb([255u8, 0, 0])
            } else {
                Rgb([0u8, 0, 255])
            }
        });
        let tensor = to_model_tensor(&DynamicImage::ImageRgb8(img), 4);

        let red_plane = &tensor[..16];
        let blue_plane = &tensor[32..];
        assert!(red_plane[0] > red_plane[3]);
        assert!(blue_plane[3] > blue_plane[0]);
    }

    #[test]
    fn test_grayscale_input_is_expanded() {
        let img = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(3, 3, image::Luma([255u8])));
        let tensor = to_model_tensor(&img, 3);
        assert_eq!(tensor.len(), 27);
        assert!((tensor[0] - (1.0 - MEAN[0]) / STD[0]).abs() < 1e-5);
        assert!((tensor[26] - (1.0 - MEAN[2]) / STD[2]).abs() < 1e-5);
    }
}
