//! Core MTCNN face-detection cascade primitives.
//!
//! This crate implements the classical three-stage cascade: a scale
//! pyramid feeds a proposal network, whose candidates are refined and
//! finally scored with landmarks by two further networks. The networks
//! themselves are opaque collaborators behind the [`NeuralEvaluator`]
//! trait; everything else (pyramid construction, candidate extraction,
//! non-max suppression, box regression, crop geometry, batch sampling,
//! and stage orchestration) lives here.

/// Aligned face crops for downstream embedding models.
pub mod align;
/// Box geometry: NMS, regression, squaring, pad geometry.
pub mod boxes;
/// Candidate extraction from proposal-network output maps.
pub mod candidates;
/// The three-stage cascade orchestrator and its output types.
pub mod detector;
/// Typed error surface of the cascade.
pub mod error;
/// The neural-evaluator capability and per-stage output structs.
pub mod evaluator;
/// tract-onnx backend for the three stage networks.
pub mod model;
/// Scale pyramid construction.
pub mod pyramid;
/// Resize seam with the default area-interpolation implementation.
pub mod resize;
/// Batched crop sampling into stage input tensors.
pub mod sampler;

pub use align::{align_face, whiten};
pub use boxes::{
    FaceBox, PadGeometry, SuppressionMode, non_max_suppression, pad_boxes, regress_boxes,
    square_boxes,
};
pub use candidates::extract_candidates;
pub use detector::{
    BoundingBox, CascadeConfig, FaceAnnotation, Landmark, LandmarkKind, MtcnnDetector,
};
pub use error::MtcnnError;
pub use evaluator::{NeuralEvaluator, OutputStageResult, ProposalMaps, RefineOutput};
pub use model::TractEvaluator;
pub use pyramid::compute_scale_pyramid;
pub use resize::{AreaResizer, Resizer, area_resize};
pub use sampler::{normalize_pixels, sample_batch};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
