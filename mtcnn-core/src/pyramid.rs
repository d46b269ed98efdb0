//! Scale pyramid construction for the first cascade stage.

use crate::error::MtcnnError;

/// Receptive field of the proposal network; the pyramid stops once the
/// shrunk minimum image dimension would drop below it.
pub const CELL_SIZE: f64 = 12.0;

/// Compute the geometric sequence of resize scales for an image.
///
/// `scale0 = 12 / min_face_size`; successive entries multiply by `factor`
/// while `min(height, width) * scale0 * factor^i` stays at or above 12.
/// The result is finite, strictly decreasing, and deterministic.
pub fn compute_scale_pyramid(
    height: u32,
    width: u32,
    min_face_size: u32,
    factor: f32,
) -> Result<Vec<f64>, MtcnnError> {
    if height == 0 || width == 0 {
        return Err(MtcnnError::InvalidConfig(format!(
            "image dimensions must be positive, got {width}x{height}"
        )));
    }
    if min_face_size == 0 {
        return Err(MtcnnError::InvalidConfig(
            "min_face_size must be positive".to_string(),
        ));
    }
    if !(factor > 0.0 && factor < 1.0) {
        return Err(MtcnnError::InvalidConfig(format!(
            "scale factor must lie in (0, 1), got {factor}"
        )));
    }

    let scale0 = CELL_SIZE / min_face_size as f64;
    let min_dim = height.min(width) as f64 * scale0;
    let factor = factor as f64;

    let mut scales = Vec::new();
    let mut level = 0;
    while min_dim * factor.powi(level) >= CELL_SIZE {
        scales.push(scale0 * factor.powi(level));
        level += 1;
    }
    Ok(scales)
}
