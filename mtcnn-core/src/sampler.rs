//! Batched crop sampling: turn a set of padded box geometries into one
//! normalized input tensor for the next stage network.

use log::warn;
use ndarray::{Array3, Array4, ArrayView3, ArrayViewMut3, s};

use crate::boxes::PadGeometry;
use crate::resize::Resizer;

/// Normalization applied to every network input sample:
/// `(pixel - 127.5) * 0.0078125`, mapping `0..=255` to roughly `-1..=1`.
pub fn normalize_pixels(mut tensor: Array3<f32>) -> Array3<f32> {
    tensor.mapv_inplace(|v| (v - 127.5) * 0.0078125);
    tensor
}

/// Crop, pad, resize, and normalize one batch of boxes.
///
/// For each geometry a zero `tmph × tmpw × 3` buffer receives the clamped
/// source pixels at the destination offset, is area-resized to
/// `target_size × target_size`, normalized, and written into batch slot
/// `k`. Returns `None` when any geometry is degenerate: the whole batch
/// is dropped, as the classic MTCNN pipeline does, and the caller treats
/// this as an empty stage.
pub fn sample_batch(
    image: ArrayView3<'_, f32>,
    pads: &[PadGeometry],
    target_size: usize,
    resizer: &dyn Resizer,
) -> Option<Array4<f32>> {
    let mut batch = Array4::<f32>::zeros((pads.len(), target_size, target_size, 3));

    for (k, pad) in pads.iter().enumerate() {
        if pad.is_degenerate() {
            warn!(
                "degenerate crop geometry for box {k} ({}x{}); dropping the whole batch",
                pad.tmpw, pad.tmph
            );
            return None;
        }

        let mut buffer = Array3::<f32>::zeros((pad.tmph as usize, pad.tmpw as usize, 3));
        copy_clamped_region(image, buffer.view_mut(), pad);

        let resized = resizer.resize(buffer.view(), target_size, target_size);
        let normalized = normalize_pixels(resized);
        batch.slice_mut(s![k, .., .., ..]).assign(&normalized);
    }
    Some(batch)
}

/// Copy the clamped source span into the destination span of the buffer.
/// Spans outside the image were already clamped away; a fully-clamped
/// (empty) span leaves the buffer zeroed.
fn copy_clamped_region(
    image: ArrayView3<'_, f32>,
    mut buffer: ArrayViewMut3<'_, f32>,
    pad: &PadGeometry,
) {
    if pad.src_x2 <= pad.src_x1 || pad.src_y2 <= pad.src_y1 {
        return;
    }
    let src = image.slice(s![
        pad.src_y1 as usize..pad.src_y2 as usize,
        pad.src_x1 as usize..pad.src_x2 as usize,
        ..
    ]);
    buffer
        .slice_mut(s![
            pad.dst_y1 as usize..pad.dst_y2 as usize,
            pad.dst_x1 as usize..pad.dst_x2 as usize,
            ..
        ])
        .assign(&src);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{FaceBox, pad_boxes};
    use crate::resize::AreaResizer;

    fn gradient_image(height: usize, width: usize) -> Array3<f32> {
        let mut img = Array3::<f32>::zeros((height, width, 3));
        for y in 0..height {
            for x in 0..width {
                for c in 0..3 {
                    img[(y, x, c)] = (y * width + x) as f32 % 256.0;
                }
            }
        }
        img
    }

    fn boxed(x1: f32, y1: f32, x2: f32, y2: f32) -> FaceBox {
        FaceBox {
            x1,
            y1,
            x2,
            y2,
            score: 0.9,
            reg: [0.0; 4],
        }
    }

    #[test]
    fn interior_crop_matches_source_pixels() {
        let image = gradient_image(32, 32);
        let boxes = vec![boxed(4.0, 4.0, 7.0, 7.0)];
        let pads = pad_boxes(&boxes, 32, 32);

        let batch = sample_batch(image.view(), &pads, 4, &AreaResizer).expect("no degenerates");
        assert_eq!(batch.dim(), (1, 4, 4, 3));

        // 4x4 crop resized to 4x4 is the identity, so the first sample is
        // exactly the normalized source window.
        for y in 0..4 {
            for x in 0..4 {
                let src = image[(y + 3, x + 3, 0)];
                let expected = (src - 127.5) * 0.0078125;
                assert!((batch[(0, y, x, 0)] - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn out_of_bounds_crop_gets_zero_padded_border() {
        let image = Array3::<f32>::from_elem((16, 16, 3), 255.0);
        let boxes = vec![boxed(-3.0, 0.0, 4.0, 7.0)];
        let pads = pad_boxes(&boxes, 16, 16);

        let batch = sample_batch(image.view(), &pads, 8, &AreaResizer).expect("no degenerates");
        // The 8x8 buffer keeps its left 4 columns and its top row zeroed
        // (the box starts above/left of the 1-based pixel grid) and fills
        // the rest from the image.
        let zero = (0.0 - 127.5) * 0.0078125;
        let white = (255.0 - 127.5) * 0.0078125;
        assert!((batch[(0, 0, 0, 0)] - zero).abs() < 1e-5);
        assert!((batch[(0, 0, 7, 0)] - zero).abs() < 1e-5);
        assert!((batch[(0, 1, 3, 0)] - zero).abs() < 1e-5);
        assert!((batch[(0, 1, 7, 0)] - white).abs() < 1e-5);
        assert!((batch[(0, 7, 4, 0)] - white).abs() < 1e-5);
    }

    #[test]
    fn degenerate_geometry_drops_entire_batch() {
        let image = gradient_image(16, 16);
        let boxes = vec![boxed(1.0, 1.0, 8.0, 8.0), boxed(10.0, 10.0, 4.0, 12.0)];
        let pads = pad_boxes(&boxes, 16, 16);

        assert!(sample_batch(image.view(), &pads, 8, &AreaResizer).is_none());
    }

    #[test]
    fn batch_slots_follow_input_order() {
        let mut image = Array3::<f32>::zeros((16, 16, 3));
        // Box coordinates are 1-based, so box (2, 2) samples pixel (1, 1).
        image[(1, 1, 0)] = 200.0;
        image[(9, 9, 0)] = 100.0;

        let boxes = vec![boxed(2.0, 2.0, 2.0, 2.0), boxed(10.0, 10.0, 10.0, 10.0)];
        let pads = pad_boxes(&boxes, 16, 16);

        let batch = sample_batch(image.view(), &pads, 1, &AreaResizer).expect("no degenerates");
        assert!((batch[(0, 0, 0, 0)] - (200.0 - 127.5) * 0.0078125).abs() < 1e-5);
        assert!((batch[(1, 0, 0, 0)] - (100.0 - 127.5) * 0.0078125).abs() < 1e-5);
    }

    #[test]
    fn empty_pad_list_yields_empty_batch() {
        let image = gradient_image(8, 8);
        let batch = sample_batch(image.view(), &[], 4, &AreaResizer).expect("empty is fine");
        assert_eq!(batch.dim(), (0, 4, 4, 3));
    }
}
