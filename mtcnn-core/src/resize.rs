//! Image resizing seam used by the pyramid and the batch sampler.
//!
//! The cascade's numbers were produced with area interpolation, so the
//! default implementation is a coverage-weighted box filter. Hosts with
//! their own resize primitive (SIMD, GPU) can substitute it through the
//! [`Resizer`] trait.

use ndarray::{Array3, ArrayView3};

/// Abstraction over resize backends.
pub trait Resizer: Send + Sync + std::fmt::Debug {
    /// Resize a `(H, W, 3)` float tensor to `(height, width, 3)`.
    fn resize(&self, image: ArrayView3<'_, f32>, width: usize, height: usize) -> Array3<f32>;
}

/// Default CPU area-interpolation resizer.
///
/// Each destination pixel averages the source rectangle it covers,
/// weighting partially-covered source pixels by their overlap.
#[derive(Debug, Default, Clone, Copy)]
pub struct AreaResizer;

impl Resizer for AreaResizer {
    fn resize(&self, image: ArrayView3<'_, f32>, width: usize, height: usize) -> Array3<f32> {
        area_resize(image, width, height)
    }
}

/// Per-axis list of (source index, coverage weight) pairs for one
/// destination index.
fn axis_spans(src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    let mut spans = Vec::with_capacity(dst_len);
    for d in 0..dst_len {
        let begin = d as f64 * scale;
        let end = (d + 1) as f64 * scale;

        let first = begin.floor() as usize;
        let last = (end.ceil() as usize).min(src_len);

        let mut span = Vec::with_capacity(last.saturating_sub(first).max(1));
        let mut total = 0.0f64;
        for s in first..last.max(first + 1).min(src_len) {
            let cover = (end.min((s + 1) as f64) - begin.max(s as f64)).max(0.0);
            if cover > 0.0 {
                span.push((s, cover as f32));
                total += cover;
            }
        }
        if span.is_empty() {
            // Degenerate coverage from rounding; fall back to the nearest
            // source pixel with full weight.
            span.push((first.min(src_len - 1), 1.0));
            total = 1.0;
        }
        let norm = (1.0 / total) as f32;
        for entry in &mut span {
            entry.1 *= norm;
        }
        spans.push(span);
    }
    spans
}

/// Coverage-weighted area resize of a `(H, W, 3)` tensor.
pub fn area_resize(image: ArrayView3<'_, f32>, width: usize, height: usize) -> Array3<f32> {
    let (src_h, src_w, channels) = image.dim();
    assert!(width > 0 && height > 0, "target dimensions must be non-zero");
    assert!(src_h > 0 && src_w > 0, "source dimensions must be non-zero");

    let col_spans = axis_spans(src_w, width);
    let row_spans = axis_spans(src_h, height);

    let mut out = Array3::<f32>::zeros((height, width, channels));
    for (dy, rows) in row_spans.iter().enumerate() {
        for (dx, cols) in col_spans.iter().enumerate() {
            for ch in 0..channels {
                let mut acc = 0.0f32;
                for &(sy, wy) in rows {
                    for &(sx, wx) in cols {
                        acc += image[(sy, sx, ch)] * wy * wx;
                    }
                }
                out[(dy, dx, ch)] = acc;
            }
        }
    }
    out
}
