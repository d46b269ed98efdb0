use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use ndarray::Array3;

/// Load an image from disk into memory.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path_ref = path.as_ref();
    image::open(path_ref).with_context(|| format!("failed to open image {}", path_ref.display()))
}

/// Convert a dynamic image into a row-major `(height, width, 3)` float
/// tensor with RGB channel order and samples in `0..=255`.
///
/// This is the layout the cascade operates on; normalisation happens per
/// stage inside the pipeline, not here.
pub fn image_to_hwc(image: &DynamicImage) -> Array3<f32> {
    let rgb = image.to_rgb8();
    rgb_to_hwc(&rgb)
}

/// Convert an RGB image buffer into a `(height, width, 3)` float tensor.
pub fn rgb_to_hwc(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((height as usize, width as usize, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        array[(yi, xi, 0)] = pixel[0] as f32;
        array[(yi, xi, 1)] = pixel[1] as f32;
        array[(yi, xi, 2)] = pixel[2] as f32;
    }
    array
}

/// Convert a `(height, width, 3)` float tensor with samples in `0..=255`
/// back into an RGB image buffer, clamping out-of-range values.
pub fn hwc_to_rgb_image(tensor: &Array3<f32>) -> Result<RgbImage> {
    let shape = tensor.shape();
    anyhow::ensure!(
        shape.len() == 3 && shape[2] == 3,
        "expected (H, W, 3) tensor, got {:?}",
        shape
    );
    let (height, width) = (shape[0], shape[1]);
    anyhow::ensure!(
        height > 0 && width > 0,
        "tensor dimensions must be non-zero"
    );

    let mut image = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (xi, yi) = (x as usize, y as usize);
        *pixel = image::Rgb([
            tensor[(yi, xi, 0)].clamp(0.0, 255.0).round() as u8,
            tensor[(yi, xi, 1)].clamp(0.0, 255.0).round() as u8,
            tensor[(yi, xi, 2)].clamp(0.0, 255.0).round() as u8,
        ]);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_to_hwc_preserves_channel_order() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, image::Rgb([0, 128, 255]));
        image.put_pixel(1, 0, image::Rgb([255, 128, 0]));
        image.put_pixel(0, 1, image::Rgb([64, 64, 64]));
        image.put_pixel(1, 1, image::Rgb([255, 255, 255]));

        let array = rgb_to_hwc(&image);
        assert_eq!(array.shape(), &[2, 2, 3]);

        assert_eq!(array[(0, 0, 0)], 0.0);
        assert_eq!(array[(0, 0, 1)], 128.0);
        assert_eq!(array[(0, 0, 2)], 255.0);
        assert_eq!(array[(0, 1, 0)], 255.0);
    }

    #[test]
    fn hwc_round_trips_through_image() {
        let mut image = RgbImage::new(3, 2);
        for (i, pixel) in image.pixels_mut().enumerate() {
            *pixel = image::Rgb([(i * 40) as u8, (i * 20) as u8, 255 - (i * 30) as u8]);
        }

        let tensor = rgb_to_hwc(&image);
        let restored = hwc_to_rgb_image(&tensor).expect("convert back");
        assert_eq!(restored, image);
    }

    #[test]
    fn hwc_to_image_rejects_bad_shapes() {
        let tensor = Array3::<f32>::zeros((2, 2, 4));
        assert!(hwc_to_rgb_image(&tensor).is_err());
    }
}
