//! Aligned face crops for downstream embedding models.
//!
//! Expands a detection's bounding box by a margin, clamps it to the image,
//! and resamples the crop to a fixed square. Pre-whitening normalizes the
//! crop to zero mean and unit variance, which embedding networks expect.

use ndarray::{Array3, ArrayView3, s};

use crate::detector::FaceAnnotation;
use crate::error::MtcnnError;
use crate::resize::Resizer;

/// Extract a margin-expanded, square-resized crop for one detection.
pub fn align_face(
    image: ArrayView3<'_, f32>,
    annotation: &FaceAnnotation,
    margin: u32,
    size: u32,
    pre_whiten: bool,
    resizer: &dyn Resizer,
) -> Result<Array3<f32>, MtcnnError> {
    if size == 0 {
        return Err(MtcnnError::InvalidConfig(
            "aligned crop size must be positive".to_string(),
        ));
    }
    let (height, width, _) = image.dim();
    let bbox = &annotation.bounding_box;
    let half_margin = (margin / 2) as i64;

    let x1 = (bbox.x as i64 - half_margin).max(0) as usize;
    let y1 = (bbox.y as i64 - half_margin).max(0) as usize;
    let x2 = ((bbox.x + bbox.w) as i64 + half_margin).min(width as i64) as usize;
    let y2 = ((bbox.y + bbox.h) as i64 + half_margin).min(height as i64) as usize;

    if x2 <= x1 || y2 <= y1 {
        return Err(MtcnnError::InvalidInput(format!(
            "bounding box ({}, {}, {}, {}) lies outside the {width}x{height} image",
            bbox.x, bbox.y, bbox.w, bbox.h
        )));
    }

    let crop = image.slice(s![y1..y2, x1..x2, ..]);
    let resized = resizer.resize(crop, size as usize, size as usize);

    Ok(if pre_whiten {
        whiten(resized)
    } else {
        resized
    })
}

/// Normalize a crop to zero mean and unit variance, flooring the standard
/// deviation at `1/sqrt(n)` so near-constant crops stay finite.
pub fn whiten(mut crop: Array3<f32>) -> Array3<f32> {
    let n = crop.len() as f32;
    let mean = crop.iter().sum::<f32>() / n;
    let variance = crop.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let std_adj = variance.sqrt().max(1.0 / n.sqrt());

    crop.mapv_inplace(|v| (v - mean) / std_adj);
    crop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{BoundingBox, Landmark, LandmarkKind};
    use crate::resize::AreaResizer;

    fn annotation(x: i32, y: i32, w: i32, h: i32) -> FaceAnnotation {
        let landmark = Landmark {
            kind: LandmarkKind::LeftEye,
            x: 0.0,
            y: 0.0,
        };
        FaceAnnotation {
            bounding_box: BoundingBox { x, y, w, h },
            confidence: 0.9,
            landmarks: [landmark; 5],
        }
    }

    #[test]
    fn aligned_crop_has_requested_size() {
        let image = Array3::<f32>::from_elem((64, 64, 3), 120.0);
        let crop = align_face(
            image.view(),
            &annotation(10, 10, 20, 20),
            8,
            32,
            false,
            &AreaResizer,
        )
        .expect("valid crop");
        assert_eq!(crop.dim(), (32, 32, 3));
        assert!((crop[(0, 0, 0)] - 120.0).abs() < 1e-4);
    }

    #[test]
    fn margin_is_clamped_at_image_edges() {
        let image = Array3::<f32>::from_elem((32, 32, 3), 50.0);
        let crop = align_face(
            image.view(),
            &annotation(0, 0, 30, 30),
            44,
            16,
            false,
            &AreaResizer,
        )
        .expect("clamped crop");
        assert_eq!(crop.dim(), (16, 16, 3));
    }

    #[test]
    fn whitened_crop_has_zero_mean_unit_variance() {
        let mut image = Array3::<f32>::zeros((8, 8, 3));
        for (i, v) in image.iter_mut().enumerate() {
            *v = (i % 7) as f32 * 10.0;
        }
        let white = whiten(image);

        let n = white.len() as f32;
        let mean = white.iter().sum::<f32>() / n;
        let var = white.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-4);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn constant_crop_whitens_without_blowing_up() {
        let image = Array3::<f32>::from_elem((4, 4, 3), 33.0);
        let white = whiten(image);
        assert!(white.iter().all(|v| v.is_finite()));
        assert!(white.iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn box_outside_image_is_rejected() {
        let image = Array3::<f32>::zeros((32, 32, 3));
        let err = align_face(
            image.view(),
            &annotation(100, 100, 10, 10),
            0,
            16,
            false,
            &AreaResizer,
        )
        .unwrap_err();
        assert!(matches!(err, MtcnnError::InvalidInput(_)));
    }
}
