//! Pure geometry over candidate box sets: non-max suppression, bounding-box
//! regression, square reshaping, and crop/pad geometry.
//!
//! All coordinates are real-valued while the cascade runs; they are only
//! rounded to integers when the final annotations are assembled.

use std::cmp::Ordering;

use crate::error::MtcnnError;

/// A candidate face box with its score and the raw regression deltas
/// emitted by the stage network that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
    /// Confidence score in `[0, 1]`.
    pub score: f32,
    /// Regression deltas `[dx1, dy1, dx2, dy2]`.
    pub reg: [f32; 4],
}

impl FaceBox {
    /// Pixel width under the inclusive-coordinate convention.
    pub fn width(&self) -> f32 {
        self.x2 - self.x1 + 1.0
    }

    /// Pixel height under the inclusive-coordinate convention.
    pub fn height(&self) -> f32 {
        self.y2 - self.y1 + 1.0
    }

    fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Which denominator non-max suppression uses for the overlap ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionMode {
    /// Intersection over union of both areas.
    Union,
    /// Intersection over the smaller of the two areas.
    Min,
}

/// Suppress overlapping lower-score boxes.
///
/// Boxes are visited in descending score order (stable ascending sort,
/// consumed from the top, so equal scores resolve by original position);
/// each survivor discards every remaining box whose overlap with it
/// exceeds `threshold`. Returned indices reference the input slice in pick
/// order and are not sorted.
pub fn non_max_suppression(
    boxes: &[FaceBox],
    threshold: f32,
    mode: SuppressionMode,
) -> Vec<usize> {
    if boxes.is_empty() {
        return Vec::new();
    }

    let areas: Vec<f32> = boxes.iter().map(FaceBox::area).collect();
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        boxes[a]
            .score
            .partial_cmp(&boxes[b].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut picked = Vec::with_capacity(boxes.len());
    while let Some(current) = order.pop() {
        picked.push(current);
        order.retain(|&other| {
            let xx1 = boxes[current].x1.max(boxes[other].x1);
            let yy1 = boxes[current].y1.max(boxes[other].y1);
            let xx2 = boxes[current].x2.min(boxes[other].x2);
            let yy2 = boxes[current].y2.min(boxes[other].y2);

            let w = (xx2 - xx1 + 1.0).max(0.0);
            let h = (yy2 - yy1 + 1.0).max(0.0);
            let intersection = w * h;

            let overlap = match mode {
                SuppressionMode::Union => {
                    intersection / (areas[current] + areas[other] - intersection)
                }
                SuppressionMode::Min => intersection / areas[current].min(areas[other]),
            };
            overlap <= threshold
        });
    }
    picked
}

/// Refine box corners by their regression deltas.
///
/// Each delta is scaled by the box's inclusive width/height; zero deltas
/// leave the boxes unchanged. Fails when the arrays disagree in length.
pub fn regress_boxes(
    boxes: &[FaceBox],
    deltas: &[[f32; 4]],
) -> Result<Vec<FaceBox>, MtcnnError> {
    if boxes.len() != deltas.len() {
        return Err(MtcnnError::DimensionMismatch {
            context: "box regression",
            expected: boxes.len(),
            actual: deltas.len(),
        });
    }

    Ok(boxes
        .iter()
        .zip(deltas)
        .map(|(b, d)| {
            let w = b.width();
            let h = b.height();
            FaceBox {
                x1: b.x1 + d[0] * w,
                y1: b.y1 + d[1] * h,
                x2: b.x2 + d[2] * w,
                y2: b.y2 + d[3] * h,
                ..*b
            }
        })
        .collect())
}

/// Reshape every box into a square centered on the original box center.
///
/// The side is the larger of width and height (exclusive convention, as in
/// the classic MTCNN pipeline). With `truncate` set, the squared
/// coordinates are additionally truncated toward zero, which is what the
/// first stage wants; the second stage keeps fractional coordinates.
pub fn square_boxes(boxes: &[FaceBox], truncate: bool) -> Vec<FaceBox> {
    boxes
        .iter()
        .map(|b| {
            let w = b.x2 - b.x1;
            let h = b.y2 - b.y1;
            let side = w.max(h);

            let mut x1 = b.x1 + w * 0.5 - side * 0.5;
            let mut y1 = b.y1 + h * 0.5 - side * 0.5;
            let mut x2 = x1 + side;
            let mut y2 = y1 + side;
            if truncate {
                x1 = x1.trunc();
                y1 = y1.trunc();
                x2 = x2.trunc();
                y2 = y2.trunc();
            }
            FaceBox {
                x1,
                y1,
                x2,
                y2,
                ..*b
            }
        })
        .collect()
}

/// Crop geometry for one box: the source span clamped to the image and the
/// destination span inside a zero-initialized `tmph × tmpw` buffer.
///
/// All spans are 0-based and half-open. The destination span always has
/// the same size as the clamped source span, so boxes partly outside the
/// image land at the correct relative offset with zero-padded borders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadGeometry {
    /// Clamped source columns, start inclusive.
    pub src_x1: i64,
    /// Clamped source rows, start inclusive.
    pub src_y1: i64,
    /// Clamped source columns, end exclusive.
    pub src_x2: i64,
    /// Clamped source rows, end exclusive.
    pub src_y2: i64,
    /// Destination columns, start inclusive.
    pub dst_x1: i64,
    /// Destination rows, start inclusive.
    pub dst_y1: i64,
    /// Destination columns, end exclusive.
    pub dst_x2: i64,
    /// Destination rows, end exclusive.
    pub dst_y2: i64,
    /// Buffer width for this box.
    pub tmpw: i64,
    /// Buffer height for this box.
    pub tmph: i64,
}

impl PadGeometry {
    /// A buffer that collapses to zero width or height cannot be sampled.
    pub fn is_degenerate(&self) -> bool {
        self.tmpw <= 0 || self.tmph <= 0
    }
}

/// Compute crop/pad geometry for every box against the image bounds.
///
/// Box coordinates are truncated to integers; the cascade integer-fixes
/// boxes before padding them.
pub fn pad_boxes(boxes: &[FaceBox], image_width: u32, image_height: u32) -> Vec<PadGeometry> {
    let w = image_width as i64;
    let h = image_height as i64;

    boxes
        .iter()
        .map(|b| {
            let x1 = b.x1 as i64;
            let y1 = b.y1 as i64;
            let x2 = b.x2 as i64;
            let y2 = b.y2 as i64;
            let tmpw = x2 - x1 + 1;
            let tmph = y2 - y1 + 1;

            // 1-based working copies; the crop math treats pixel (1, 1)
            // as the image origin.
            let (mut dx, mut dy) = (1i64, 1i64);
            let (mut edx, mut edy) = (tmpw, tmph);
            let (mut x, mut y, mut ex, mut ey) = (x1, y1, x2, y2);

            if ex > w {
                edx = w - ex + tmpw;
                ex = w;
            }
            if ey > h {
                edy = h - ey + tmph;
                ey = h;
            }
            if x < 1 {
                dx = 2 - x;
                x = 1;
            }
            if y < 1 {
                dy = 2 - y;
                y = 1;
            }

            PadGeometry {
                src_x1: x - 1,
                src_y1: y - 1,
                src_x2: ex,
                src_y2: ey,
                dst_x1: dx - 1,
                dst_y1: dy - 1,
                dst_x2: edx,
                dst_y2: edy,
                tmpw,
                tmph,
            }
        })
        .collect()
}
