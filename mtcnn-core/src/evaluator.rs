//! The neural-evaluator capability consumed by the cascade.
//!
//! The three stage networks are opaque, pre-trained functions; the
//! orchestrator depends only on this trait, and backends (tract-onnx, test
//! stubs, remote services) are selected at construction time.

use ndarray::{Array2, Array4};

use crate::error::MtcnnError;

/// Proposal-network output: dense per-cell maps over the scaled image.
#[derive(Debug, Clone)]
pub struct ProposalMaps {
    /// Regression deltas, shape `[1, H', W', 4]`.
    pub regression: Array4<f32>,
    /// Two-class probabilities, shape `[1, H', W', 2]`; channel 1 is the
    /// face class.
    pub probability: Array4<f32>,
}

/// Refinement-network output: one row per batch sample.
#[derive(Debug, Clone)]
pub struct RefineOutput {
    /// Regression deltas, shape `[N, 4]`.
    pub regression: Array2<f32>,
    /// Two-class probabilities, shape `[N, 2]`; column 1 is the face
    /// class.
    pub probability: Array2<f32>,
}

/// Output-network result: boxes, landmarks, and probabilities per sample.
#[derive(Debug, Clone)]
pub struct OutputStageResult {
    /// Normalized landmark offsets, shape `[N, 10]`: columns `0..5` are
    /// the five x coordinates, `5..10` the five y coordinates.
    pub landmarks: Array2<f32>,
    /// Regression deltas, shape `[N, 4]`.
    pub regression: Array2<f32>,
    /// Class probabilities, shape `[N, 3]`; column 2 is the face class.
    pub probability: Array2<f32>,
}

/// Contract of the three cascaded stage networks.
///
/// Implementations must be safe to call repeatedly; the cascade holds one
/// evaluator for its whole lifetime and never mutates it. Hosts may call
/// the detector from multiple threads when the evaluator is re-entrant.
pub trait NeuralEvaluator: Send + Sync + std::fmt::Debug {
    /// Run the proposal network over one scaled image, `[1, h', w', 3]`.
    fn proposal(&self, input: &Array4<f32>) -> Result<ProposalMaps, MtcnnError>;

    /// Run the refinement network over a `[N, 24, 24, 3]` crop batch.
    fn refine(&self, input: &Array4<f32>) -> Result<RefineOutput, MtcnnError>;

    /// Run the output network over a `[N, 48, 48, 3]` crop batch.
    fn output(&self, input: &Array4<f32>) -> Result<OutputStageResult, MtcnnError>;
}
