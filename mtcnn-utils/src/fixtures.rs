//! Synthetic image generation used by tests across the workspace.
//!
//! The cascade tests run against stub evaluators, so no real photographs
//! are needed; deterministic gradients and solid fills are enough to
//! exercise pyramid construction, cropping, and sampling geometry.

use image::{DynamicImage, Rgb, RgbImage};

/// Build a deterministic diagonal-gradient image of the given size.
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let mut img = RgbImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let v = ((x + y) % 256) as u8;
        *pixel = Rgb([v, v.wrapping_mul(2), 255 - v]);
    }
    DynamicImage::ImageRgb8(img)
}

/// Build a single-color image of the given size.
pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
    let mut img = RgbImage::new(width, height);
    for pixel in img.pixels_mut() {
        *pixel = Rgb(rgb);
    }
    DynamicImage::ImageRgb8(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_is_deterministic() {
        let a = gradient_image(16, 8).to_rgb8();
        let b = gradient_image(16, 8).to_rgb8();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn solid_fill_is_uniform() {
        let img = solid_image(4, 4, [10, 20, 30]).to_rgb8();
        assert!(img.pixels().all(|p| p.0 == [10, 20, 30]));
    }
}
