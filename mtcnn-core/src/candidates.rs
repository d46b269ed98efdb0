//! Candidate box generation from the proposal network's output maps.

use ndarray::ArrayView3;

use crate::boxes::FaceBox;
use crate::error::MtcnnError;

/// Spatial stride of the proposal network.
const STRIDE: f64 = 2.0;
/// Receptive field of one output cell.
const CELL: f64 = 12.0;

/// Project one proposal-map pass back into candidate boxes.
///
/// Every cell of the `(H', W', 2)` probability map whose face-class score
/// (channel 1) exceeds `threshold` becomes a box in original-image
/// coordinates via the stride-2 / cell-12 mapping, carrying the matching
/// `(H', W', 4)` regression row. Cells are scanned in row-major order
/// (row, then column); the order only matters for NMS tie-breaking.
///
/// An empty result is a normal outcome, not an error.
pub fn extract_candidates(
    probability: ArrayView3<'_, f32>,
    regression: ArrayView3<'_, f32>,
    scale: f64,
    threshold: f32,
) -> Result<Vec<FaceBox>, MtcnnError> {
    let (rows, cols, prob_channels) = probability.dim();
    let (reg_rows, reg_cols, reg_channels) = regression.dim();

    if prob_channels != 2 {
        return Err(MtcnnError::Evaluation {
            stage: "proposal",
            message: format!("probability map must have 2 channels, got {prob_channels}"),
        });
    }
    if reg_channels != 4 || reg_rows != rows || reg_cols != cols {
        return Err(MtcnnError::DimensionMismatch {
            context: "candidate extraction",
            expected: rows * cols,
            actual: reg_rows * reg_cols,
        });
    }

    let mut candidates = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let score = probability[(r, c, 1)];
            if score <= threshold {
                continue;
            }

            let x1 = ((c as f64 * STRIDE + 1.0) / scale).floor() as f32;
            let y1 = ((r as f64 * STRIDE + 1.0) / scale).floor() as f32;
            let x2 = ((c as f64 * STRIDE + CELL) / scale).floor() as f32;
            let y2 = ((r as f64 * STRIDE + CELL) / scale).floor() as f32;

            candidates.push(FaceBox {
                x1,
                y1,
                x2,
                y2,
                score,
                reg: [
                    regression[(r, c, 0)],
                    regression[(r, c, 1)],
                    regression[(r, c, 2)],
                    regression[(r, c, 3)],
                ],
            });
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn projects_single_cell_back_to_image_coordinates() {
        let mut prob = Array3::<f32>::zeros((2, 2, 2));
        prob[(1, 1, 1)] = 0.9;
        let reg = Array3::<f32>::zeros((2, 2, 4));

        let candidates =
            extract_candidates(prob.view(), reg.view(), 0.5, 0.6).expect("valid maps");

        assert_eq!(candidates.len(), 1);
        let b = &candidates[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (6.0, 6.0, 28.0, 28.0));
        assert_eq!(b.score, 0.9);
        assert_eq!(b.reg, [0.0; 4]);

        // Identity regression and squaring leave this 22x22 box intact.
        let deltas: Vec<[f32; 4]> = candidates.iter().map(|c| c.reg).collect();
        let refined = crate::boxes::regress_boxes(&candidates, &deltas).expect("lengths match");
        let squared = crate::boxes::square_boxes(&refined, true);
        assert_eq!(
            (squared[0].x1, squared[0].y1, squared[0].x2, squared[0].y2),
            (6.0, 6.0, 28.0, 28.0)
        );
    }

    #[test]
    fn below_threshold_map_yields_no_candidates() {
        let prob = Array3::<f32>::from_elem((4, 4, 2), 0.3);
        let reg = Array3::<f32>::zeros((4, 4, 4));

        let candidates =
            extract_candidates(prob.view(), reg.view(), 0.5, 0.6).expect("valid maps");
        assert!(candidates.is_empty());
    }

    #[test]
    fn scan_order_is_row_major() {
        let mut prob = Array3::<f32>::zeros((3, 3, 2));
        prob[(0, 2, 1)] = 0.8;
        prob[(2, 0, 1)] = 0.7;
        let mut reg = Array3::<f32>::zeros((3, 3, 4));
        reg[(0, 2, 0)] = 0.5;
        reg[(2, 0, 0)] = -0.5;

        let candidates =
            extract_candidates(prob.view(), reg.view(), 1.0, 0.6).expect("valid maps");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].score, 0.8);
        assert_eq!(candidates[0].reg[0], 0.5);
        assert_eq!(candidates[1].score, 0.7);
        assert_eq!(candidates[1].reg[0], -0.5);
    }

    #[test]
    fn mismatched_maps_are_rejected() {
        let prob = Array3::<f32>::zeros((2, 2, 2));
        let reg = Array3::<f32>::zeros((3, 2, 4));
        let err = extract_candidates(prob.view(), reg.view(), 0.5, 0.6).unwrap_err();
        assert!(matches!(err, MtcnnError::DimensionMismatch { .. }));
    }
}
