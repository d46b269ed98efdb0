//! The three-stage cascade orchestrator.
//!
//! Drives proposal, refinement, and output passes over one image and
//! assembles the surviving boxes and landmarks into [`FaceAnnotation`]s.
//! All intermediate state is call-local; the only shared pieces are the
//! evaluator handle and the immutable configuration captured at
//! construction.

use std::sync::Arc;

use image::DynamicImage;
use log::Level;
use ndarray::{Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use mtcnn_utils::config::CascadeSettings;
use mtcnn_utils::timing_guard;

use crate::boxes::{
    FaceBox, PadGeometry, SuppressionMode, non_max_suppression, pad_boxes, regress_boxes,
    square_boxes,
};
use crate::candidates::extract_candidates;
use crate::error::MtcnnError;
use crate::evaluator::NeuralEvaluator;
use crate::pyramid::compute_scale_pyramid;
use crate::resize::{AreaResizer, Resizer};
use crate::sampler::{normalize_pixels, sample_batch};

/// Crop resolution consumed by the refinement network.
const REFINE_SIZE: usize = 24;
/// Crop resolution consumed by the output network.
const OUTPUT_SIZE: usize = 48;
/// Per-scale suppression threshold inside stage 1.
const SCALE_NMS: f32 = 0.5;
/// Suppression threshold shared by the cross-scale and stage 2/3 passes.
const STAGE_NMS: f32 = 0.7;

/// Immutable cascade parameters, validated at detector construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeConfig {
    /// Smallest face size (in pixels) the pyramid should resolve.
    pub min_face_size: u32,
    /// Geometric shrink factor between consecutive pyramid levels.
    pub scale_factor: f32,
    /// Per-stage score thresholds `[t1, t2, t3]`.
    pub thresholds: [f32; 3],
}

impl Default for CascadeConfig {
    fn default() -> Self {
        CascadeSettings::default().into()
    }
}

impl CascadeConfig {
    fn validate(&self) -> Result<(), MtcnnError> {
        if self.min_face_size == 0 {
            return Err(MtcnnError::InvalidConfig(
                "min_face_size must be positive".to_string(),
            ));
        }
        if !(self.scale_factor > 0.0 && self.scale_factor < 1.0) {
            return Err(MtcnnError::InvalidConfig(format!(
                "scale_factor must lie in (0, 1), got {}",
                self.scale_factor
            )));
        }
        for (i, t) in self.thresholds.iter().enumerate() {
            if !(0.0..=1.0).contains(t) {
                return Err(MtcnnError::InvalidConfig(format!(
                    "threshold t{} must lie in [0, 1], got {t}",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

impl From<CascadeSettings> for CascadeConfig {
    fn from(settings: CascadeSettings) -> Self {
        CascadeConfig {
            min_face_size: settings.min_face_size,
            scale_factor: settings.scale_factor,
            thresholds: settings.thresholds,
        }
    }
}

impl From<&CascadeSettings> for CascadeConfig {
    fn from(settings: &CascadeSettings) -> Self {
        settings.clone().into()
    }
}

/// Integer bounding box of a final detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge in pixels.
    pub x: i32,
    /// Top edge in pixels.
    pub y: i32,
    /// Box width in pixels.
    pub w: i32,
    /// Box height in pixels.
    pub h: i32,
}

/// The five named facial points, in their fixed output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    Nose,
    MouthLeft,
    MouthRight,
}

/// One facial landmark in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Which facial point this is.
    pub kind: LandmarkKind,
    /// Horizontal pixel coordinate.
    pub x: f32,
    /// Vertical pixel coordinate.
    pub y: f32,
}

/// A final face detection: integer box, confidence, five landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnnotation {
    /// Integer bounding box.
    pub bounding_box: BoundingBox,
    /// Confidence score of the surviving box.
    pub confidence: f32,
    /// Landmarks in fixed order: left eye, right eye, nose, mouth left,
    /// mouth right.
    pub landmarks: [Landmark; 5],
}

/// Result of the first stage: squared candidate boxes plus their crop
/// geometry against the source image.
struct ProposalResult {
    boxes: Vec<FaceBox>,
    pads: Vec<PadGeometry>,
}

/// Face detector running the full three-stage cascade.
///
/// Construction validates the configuration and captures the evaluator;
/// detection calls share no mutable state, so a detector may be used from
/// multiple threads when its evaluator is re-entrant.
#[derive(Debug)]
pub struct MtcnnDetector {
    evaluator: Arc<dyn NeuralEvaluator>,
    resizer: Box<dyn Resizer>,
    config: CascadeConfig,
}

impl MtcnnDetector {
    /// Build a detector over the given evaluator and configuration.
    pub fn new(
        evaluator: Arc<dyn NeuralEvaluator>,
        config: CascadeConfig,
    ) -> Result<Self, MtcnnError> {
        config.validate()?;
        Ok(Self {
            evaluator,
            resizer: Box::new(AreaResizer),
            config,
        })
    }

    /// Replace the default area resizer with a custom backend.
    pub fn with_resizer(mut self, resizer: Box<dyn Resizer>) -> Self {
        self.resizer = resizer;
        self
    }

    /// Access the cascade configuration.
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Detect faces in a decoded image.
    pub fn detect_image(&self, image: &DynamicImage) -> Result<Vec<FaceAnnotation>, MtcnnError> {
        let tensor = mtcnn_utils::image_to_hwc(image);
        self.detect(&tensor)
    }

    /// Detect faces in a `(height, width, 3)` RGB float tensor with
    /// samples in `0..=255`.
    ///
    /// An image where nothing passes a stage threshold yields an empty
    /// list, not an error. Annotations follow the final suppression
    /// pass's kept-index order.
    pub fn detect(&self, image: &Array3<f32>) -> Result<Vec<FaceAnnotation>, MtcnnError> {
        let _guard = timing_guard("mtcnn_core::detect", Level::Debug);
        let (width, height) = validate_image(image)?;

        let proposal = self.run_proposal_stage(image.view(), width, height)?;
        if proposal.boxes.is_empty() {
            return Ok(Vec::new());
        }

        let refined = self.run_refinement_stage(image.view(), &proposal)?;
        if refined.is_empty() {
            return Ok(Vec::new());
        }

        let (boxes, landmarks) = self.run_output_stage(image.view(), &refined, width, height)?;
        Ok(assemble_annotations(&boxes, &landmarks))
    }

    /// Stage 1: scan the scale pyramid with the proposal network, suppress
    /// per scale and across scales, regress, square, and pad.
    fn run_proposal_stage(
        &self,
        image: ArrayView3<'_, f32>,
        width: u32,
        height: u32,
    ) -> Result<ProposalResult, MtcnnError> {
        let _guard = timing_guard("mtcnn_core::proposal_stage", Level::Debug);
        let scales = compute_scale_pyramid(
            height,
            width,
            self.config.min_face_size,
            self.config.scale_factor,
        )?;
        let t1 = self.config.thresholds[0];

        let mut total: Vec<FaceBox> = Vec::new();
        for scale in scales {
            let new_w = (width as f64 * scale).ceil() as usize;
            let new_h = (height as f64 * scale).ceil() as usize;

            let resized = self.resizer.resize(image, new_w, new_h);
            let input = normalize_pixels(resized).insert_axis(Axis(0));

            let maps = {
                let _guard = timing_guard("mtcnn_core::proposal_eval", Level::Trace);
                self.evaluator.proposal(&input)?
            };

            let candidates = extract_candidates(
                maps.probability.index_axis(Axis(0), 0),
                maps.regression.index_axis(Axis(0), 0),
                scale,
                t1,
            )?;
            if candidates.is_empty() {
                continue;
            }

            let picked = non_max_suppression(&candidates, SCALE_NMS, SuppressionMode::Union);
            total.extend(picked.into_iter().map(|i| candidates[i]));
        }

        if total.is_empty() {
            return Ok(ProposalResult {
                boxes: Vec::new(),
                pads: Vec::new(),
            });
        }

        let picked = non_max_suppression(&total, STAGE_NMS, SuppressionMode::Union);
        let kept: Vec<FaceBox> = picked.into_iter().map(|i| total[i]).collect();

        // Each surviving candidate still carries the regression deltas the
        // proposal network predicted for its own cell.
        let deltas: Vec<[f32; 4]> = kept.iter().map(|b| b.reg).collect();
        let regressed = regress_boxes(&kept, &deltas)?;
        let squared = square_boxes(&regressed, true);
        let pads = pad_boxes(&squared, width, height);

        Ok(ProposalResult {
            boxes: squared,
            pads,
        })
    }

    /// Stage 2: re-score stage-1 crops with the refinement network,
    /// suppress, regress through the kept subset, and square again.
    fn run_refinement_stage(
        &self,
        image: ArrayView3<'_, f32>,
        proposal: &ProposalResult,
    ) -> Result<Vec<FaceBox>, MtcnnError> {
        let _guard = timing_guard("mtcnn_core::refinement_stage", Level::Debug);

        let Some(batch) = sample_batch(image, &proposal.pads, REFINE_SIZE, self.resizer.as_ref())
        else {
            return Ok(Vec::new());
        };

        let out = {
            let _guard = timing_guard("mtcnn_core::refinement_eval", Level::Trace);
            self.evaluator.refine(&batch)?
        };
        expect_rows("refinement", proposal.boxes.len(), out.probability.nrows())?;
        expect_rows("refinement", proposal.boxes.len(), out.regression.nrows())?;

        let t2 = self.config.thresholds[1];
        let mut kept: Vec<FaceBox> = Vec::new();
        let mut kept_deltas: Vec<[f32; 4]> = Vec::new();
        for (i, b) in proposal.boxes.iter().enumerate() {
            let score = out.probability[(i, 1)];
            if score > t2 {
                kept.push(FaceBox { score, ..*b });
                kept_deltas.push([
                    out.regression[(i, 0)],
                    out.regression[(i, 1)],
                    out.regression[(i, 2)],
                    out.regression[(i, 3)],
                ]);
            }
        }
        if kept.is_empty() {
            return Ok(Vec::new());
        }

        let picked = non_max_suppression(&kept, STAGE_NMS, SuppressionMode::Union);
        let picked_boxes: Vec<FaceBox> = picked.iter().map(|&i| kept[i]).collect();
        let picked_deltas: Vec<[f32; 4]> = picked.iter().map(|&i| kept_deltas[i]).collect();

        let regressed = regress_boxes(&picked_boxes, &picked_deltas)?;
        Ok(square_boxes(&regressed, false))
    }

    /// Stage 3: integer-floor the boxes, re-crop at full output
    /// resolution, map landmarks to pixel space, regress, and run the
    /// final minimum-area suppression.
    fn run_output_stage(
        &self,
        image: ArrayView3<'_, f32>,
        refined: &[FaceBox],
        width: u32,
        height: u32,
    ) -> Result<(Vec<FaceBox>, Vec<[(f32, f32); 5]>), MtcnnError> {
        let _guard = timing_guard("mtcnn_core::output_stage", Level::Debug);

        let floored: Vec<FaceBox> = refined
            .iter()
            .map(|b| FaceBox {
                x1: b.x1.floor(),
                y1: b.y1.floor(),
                x2: b.x2.floor(),
                y2: b.y2.floor(),
                ..*b
            })
            .collect();
        let pads = pad_boxes(&floored, width, height);

        let Some(batch) = sample_batch(image, &pads, OUTPUT_SIZE, self.resizer.as_ref()) else {
            return Ok((Vec::new(), Vec::new()));
        };

        let out = {
            let _guard = timing_guard("mtcnn_core::output_eval", Level::Trace);
            self.evaluator.output(&batch)?
        };
        expect_rows("output", floored.len(), out.probability.nrows())?;
        expect_rows("output", floored.len(), out.regression.nrows())?;
        expect_rows("output", floored.len(), out.landmarks.nrows())?;

        let t3 = self.config.thresholds[2];
        let mut kept: Vec<FaceBox> = Vec::new();
        let mut kept_deltas: Vec<[f32; 4]> = Vec::new();
        let mut kept_marks: Vec<[f32; 10]> = Vec::new();
        for (i, b) in floored.iter().enumerate() {
            let score = out.probability[(i, 2)];
            if score > t3 {
                kept.push(FaceBox { score, ..*b });
                kept_deltas.push([
                    out.regression[(i, 0)],
                    out.regression[(i, 1)],
                    out.regression[(i, 2)],
                    out.regression[(i, 3)],
                ]);
                let mut marks = [0.0f32; 10];
                for (j, m) in marks.iter_mut().enumerate() {
                    *m = out.landmarks[(i, j)];
                }
                kept_marks.push(marks);
            }
        }
        if kept.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        // Landmarks project through the un-regressed box geometry.
        let pixel_marks: Vec<[(f32, f32); 5]> = kept
            .iter()
            .zip(&kept_marks)
            .map(|(b, m)| {
                let w = b.x2 - b.x1 + 1.0;
                let h = b.y2 - b.y1 + 1.0;
                let mut points = [(0.0f32, 0.0f32); 5];
                for (j, p) in points.iter_mut().enumerate() {
                    *p = (w * m[j] + b.x1 - 1.0, h * m[j + 5] + b.y1 - 1.0);
                }
                points
            })
            .collect();

        let regressed = regress_boxes(&kept, &kept_deltas)?;
        let picked = non_max_suppression(&regressed, STAGE_NMS, SuppressionMode::Min);

        let boxes: Vec<FaceBox> = picked.iter().map(|&i| regressed[i]).collect();
        let landmarks: Vec<[(f32, f32); 5]> = picked.iter().map(|&i| pixel_marks[i]).collect();
        Ok((boxes, landmarks))
    }
}

fn validate_image(image: &Array3<f32>) -> Result<(u32, u32), MtcnnError> {
    let (height, width, channels) = image.dim();
    if channels != 3 {
        return Err(MtcnnError::InvalidInput(format!(
            "expected a 3-channel image, got {channels} channels"
        )));
    }
    if height == 0 || width == 0 {
        return Err(MtcnnError::InvalidInput(format!(
            "image dimensions must be positive, got {width}x{height}"
        )));
    }
    Ok((width as u32, height as u32))
}

fn expect_rows(
    context: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), MtcnnError> {
    if expected != actual {
        return Err(MtcnnError::DimensionMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}

fn assemble_annotations(
    boxes: &[FaceBox],
    landmarks: &[[(f32, f32); 5]],
) -> Vec<FaceAnnotation> {
    const KINDS: [LandmarkKind; 5] = [
        LandmarkKind::LeftEye,
        LandmarkKind::RightEye,
        LandmarkKind::Nose,
        LandmarkKind::MouthLeft,
        LandmarkKind::MouthRight,
    ];

    boxes
        .iter()
        .zip(landmarks)
        .map(|(b, points)| {
            let mut named = [Landmark {
                kind: LandmarkKind::LeftEye,
                x: 0.0,
                y: 0.0,
            }; 5];
            for (slot, (kind, &(x, y))) in named.iter_mut().zip(KINDS.iter().zip(points)) {
                *slot = Landmark { kind: *kind, x, y };
            }
            FaceAnnotation {
                bounding_box: BoundingBox {
                    x: b.x1.round() as i32,
                    y: b.y1.round() as i32,
                    w: (b.x2 - b.x1).round() as i32,
                    h: (b.y2 - b.y1).round() as i32,
                },
                confidence: b.score,
                landmarks: named,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_classic_mtcnn() {
        let config = CascadeConfig::default();
        assert_eq!(config.min_face_size, 20);
        assert!((config.scale_factor - 0.709).abs() < f32::EPSILON);
        assert_eq!(config.thresholds, [0.6, 0.7, 0.7]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_validation_rejects_out_of_range_values() {
        let mut config = CascadeConfig::default();
        config.min_face_size = 0;
        assert!(config.validate().is_err());

        let mut config = CascadeConfig::default();
        config.scale_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = CascadeConfig::default();
        config.thresholds = [0.6, 1.2, 0.7];
        assert!(config.validate().is_err());
    }

    #[test]
    fn settings_convert_into_config() {
        let settings = CascadeSettings {
            min_face_size: 40,
            scale_factor: 0.5,
            thresholds: [0.1, 0.2, 0.3],
        };
        let config: CascadeConfig = (&settings).into();
        assert_eq!(config.min_face_size, 40);
        assert_eq!(config.thresholds, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn annotations_round_to_integer_boxes() {
        let boxes = vec![FaceBox {
            x1: 10.4,
            y1: 20.6,
            x2: 30.2,
            y2: 44.5,
            score: 0.91,
            reg: [0.0; 4],
        }];
        let landmarks = vec![[(11.0, 21.0), (29.0, 21.0), (20.0, 30.0), (13.0, 40.0), (27.0, 40.0)]];

        let annotations = assemble_annotations(&boxes, &landmarks);
        assert_eq!(annotations.len(), 1);
        let a = &annotations[0];
        assert_eq!(
            a.bounding_box,
            BoundingBox {
                x: 10,
                y: 21,
                w: 20,
                h: 24
            }
        );
        assert_eq!(a.landmarks[0].kind, LandmarkKind::LeftEye);
        assert_eq!(a.landmarks[4].kind, LandmarkKind::MouthRight);
        assert_eq!(a.landmarks[2].x, 20.0);
    }

    #[test]
    fn image_validation_catches_malformed_tensors() {
        let bad_channels = Array3::<f32>::zeros((4, 4, 1));
        assert!(matches!(
            validate_image(&bad_channels),
            Err(MtcnnError::InvalidInput(_))
        ));

        let empty = Array3::<f32>::zeros((0, 4, 3));
        assert!(matches!(
            validate_image(&empty),
            Err(MtcnnError::InvalidInput(_))
        ));
    }
}
