use thiserror::Error;

/// Failures surfaced by the detection cascade.
///
/// Empty candidate sets are never errors; a stage that filters every box
/// simply produces zero annotations.
#[derive(Debug, Error)]
pub enum MtcnnError {
    /// The input image tensor is malformed (wrong channel count or a zero
    /// dimension). Raised before any stage runs.
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    /// The cascade configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stage network failed to load. Raised at detector construction
    /// time, never per call.
    #[error("failed to load {stage} model: {message}")]
    ModelLoad {
        /// Which stage network failed to load.
        stage: &'static str,
        /// Loader error detail.
        message: String,
    },

    /// Parallel arrays (boxes vs. regression vs. landmarks) disagree in
    /// length. Fatal to the call.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Operation that observed the mismatch.
        context: &'static str,
        /// Expected row count.
        expected: usize,
        /// Observed row count.
        actual: usize,
    },

    /// A stage network produced an unusable result at evaluation time.
    #[error("{stage} evaluation failed: {message}")]
    Evaluation {
        /// Which stage network failed.
        stage: &'static str,
        /// Evaluator error detail.
        message: String,
    },
}
