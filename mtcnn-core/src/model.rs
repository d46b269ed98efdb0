//! tract-onnx backend for the three stage networks.
//!
//! Each graph is loaded and optimized at construction; a graph that
//! resists optimization (the proposal network has dynamic spatial
//! dimensions) falls back to the decluttered form, which runs ~2x slower
//! but accepts any input size.

use std::{fmt::Write as _, path::Path};

use log::{debug, warn};
use ndarray::{Array2, Array4};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, Tensor, TypedFact, TypedOp, tvec,
};

use crate::error::MtcnnError;
use crate::evaluator::{NeuralEvaluator, OutputStageResult, ProposalMaps, RefineOutput};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Evaluator backed by three ONNX graphs executed with tract.
#[derive(Debug)]
pub struct TractEvaluator {
    proposal: RunnableModel,
    refinement: RunnableModel,
    output: RunnableModel,
}

impl TractEvaluator {
    /// Load all three stage networks. Any load failure is fatal here, at
    /// construction time; detection calls never re-load models.
    pub fn from_paths<P: AsRef<Path>>(
        proposal: P,
        refinement: P,
        output: P,
    ) -> Result<Self, MtcnnError> {
        Ok(Self {
            proposal: load_stage_model(proposal.as_ref(), "proposal")?,
            refinement: load_stage_model(refinement.as_ref(), "refinement")?,
            output: load_stage_model(output.as_ref(), "output")?,
        })
    }

    /// Load the stage networks from persisted settings.
    pub fn from_model_paths(paths: &mtcnn_utils::config::ModelPaths) -> Result<Self, MtcnnError> {
        Self::from_paths(&paths.proposal, &paths.refinement, &paths.output)
    }
}

fn load_stage_model(path: &Path, stage: &'static str) -> Result<RunnableModel, MtcnnError> {
    if !path.exists() {
        return Err(MtcnnError::ModelLoad {
            stage,
            message: format!("model file not found: {}", path.display()),
        });
    }

    match load_runnable(path, true) {
        Ok(model) => {
            debug!("{stage} model {} optimized successfully", path.display());
            Ok(model)
        }
        Err(opt_err) => {
            let mut chain = String::new();
            for cause in opt_err.chain() {
                let _ = writeln!(&mut chain, "  - {cause}");
            }
            warn!(
                "{stage} model {} failed optimized load; falling back to decluttered graph (~2x slower).\nError chain:\n{}",
                path.display(),
                chain.trim_end()
            );
            load_runnable(path, false).map_err(|e| MtcnnError::ModelLoad {
                stage,
                message: format!("fallback to decluttered graph failed: {e}"),
            })
        }
    }
}

fn load_runnable(path: &Path, optimized: bool) -> anyhow::Result<RunnableModel> {
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .map_err(|e| anyhow::anyhow!("failed to parse ONNX graph from {}: {e}", path.display()))?;

    if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    } else {
        model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    }
}

/// Convert a batch tensor into the network input layout. tract consumes
/// the same `[N, H, W, C]` row-major order the cascade produces, so this
/// is a plain contiguous copy.
fn to_network_input(input: &Array4<f32>, stage: &'static str) -> Result<Tensor, MtcnnError> {
    let dims = input.dim();
    let flat: Vec<f32> = input.iter().copied().collect();
    Tensor::from_shape(&[dims.0, dims.1, dims.2, dims.3], &flat).map_err(|e| {
        MtcnnError::Evaluation {
            stage,
            message: format!("failed to build input tensor: {e}"),
        }
    })
}

fn run_graph(
    model: &RunnableModel,
    input: &Array4<f32>,
    stage: &'static str,
) -> Result<Vec<Tensor>, MtcnnError> {
    let tensor = to_network_input(input, stage)?;
    let outputs = model
        .run(tvec![tensor.into()])
        .map_err(|e| MtcnnError::Evaluation {
            stage,
            message: format!("execution failed: {e}"),
        })?;
    Ok(outputs
        .into_iter()
        .map(|value| value.into_tensor())
        .collect())
}

/// Pull the output tensor whose trailing dimension matches `channels` into
/// a dense 4D map. This is the single named layout-conversion step between
/// the graph's output order and the cascade's contract.
fn take_map(
    tensors: &[Tensor],
    channels: usize,
    stage: &'static str,
) -> Result<Array4<f32>, MtcnnError> {
    for tensor in tensors {
        let shape = tensor.shape();
        if shape.len() == 4 && shape[3] == channels {
            let slice = tensor
                .as_slice::<f32>()
                .map_err(|e| evaluation_error(stage, format!("output is not f32: {e}")))?;
            return Array4::from_shape_vec(
                (shape[0], shape[1], shape[2], shape[3]),
                slice.to_vec(),
            )
            .map_err(|e| evaluation_error(stage, format!("output is not contiguous: {e}")));
        }
    }
    Err(evaluation_error(
        stage,
        format!("no 4D output with {channels} channels"),
    ))
}

/// Pull the `[N, cols]` output tensor into a dense matrix, tolerating a
/// leading unit batch axis.
fn take_rows(
    tensors: &[Tensor],
    cols: usize,
    stage: &'static str,
) -> Result<Array2<f32>, MtcnnError> {
    for tensor in tensors {
        let shape = tensor.shape();
        let rows = match shape {
            [rows, c] if *c == cols => *rows,
            [1, rows, c] if *c == cols => *rows,
            _ => continue,
        };
        let slice = tensor
            .as_slice::<f32>()
            .map_err(|e| evaluation_error(stage, format!("output is not f32: {e}")))?;
        return Array2::from_shape_vec((rows, cols), slice.to_vec())
            .map_err(|e| evaluation_error(stage, format!("output is not contiguous: {e}")));
    }
    Err(evaluation_error(
        stage,
        format!("no row-matrix output with {cols} columns"),
    ))
}

fn evaluation_error(stage: &'static str, message: String) -> MtcnnError {
    MtcnnError::Evaluation { stage, message }
}

impl NeuralEvaluator for TractEvaluator {
    fn proposal(&self, input: &Array4<f32>) -> Result<ProposalMaps, MtcnnError> {
        let tensors = run_graph(&self.proposal, input, "proposal")?;
        Ok(ProposalMaps {
            regression: take_map(&tensors, 4, "proposal")?,
            probability: take_map(&tensors, 2, "proposal")?,
        })
    }

    fn refine(&self, input: &Array4<f32>) -> Result<RefineOutput, MtcnnError> {
        let tensors = run_graph(&self.refinement, input, "refinement")?;
        Ok(RefineOutput {
            regression: take_rows(&tensors, 4, "refinement")?,
            probability: take_rows(&tensors, 2, "refinement")?,
        })
    }

    fn output(&self, input: &Array4<f32>) -> Result<OutputStageResult, MtcnnError> {
        let tensors = run_graph(&self.output, input, "output")?;
        Ok(OutputStageResult {
            landmarks: take_rows(&tensors, 10, "output")?,
            regression: take_rows(&tensors, 4, "output")?,
            probability: take_rows(&tensors, 3, "output")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loading_missing_model_fails_at_construction() {
        let err = TractEvaluator::from_paths("missing_p.onnx", "missing_r.onnx", "missing_o.onnx")
            .expect_err("missing files should fail");
        assert!(matches!(
            err,
            MtcnnError::ModelLoad {
                stage: "proposal",
                ..
            }
        ));
    }

    #[test]
    fn invalid_model_produces_useful_error() {
        let mut temp = NamedTempFile::new().expect("temp file");
        temp.write_all(b"not a real onnx file")
            .expect("write mock model");

        let err = load_stage_model(temp.path(), "proposal").expect_err("invalid ONNX should fail");
        let message = format!("{err}");
        assert!(
            message.contains("proposal"),
            "unexpected error message: {message}"
        );
    }

    #[test]
    fn take_rows_accepts_leading_batch_axis() {
        let flat: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let tensors = vec![Tensor::from_shape(&[1, 2, 4], &flat).unwrap()];
        let rows = take_rows(&tensors, 4, "refinement").expect("shape matches");
        assert_eq!(rows.dim(), (2, 4));
        assert_eq!(rows[(1, 3)], 7.0);
    }

    #[test]
    fn take_rows_reports_missing_shapes() {
        let tensors = vec![Tensor::from_shape(&[2, 2], &[0f32, 1.0, 2.0, 3.0]).unwrap()];
        assert!(take_rows(&tensors, 4, "refinement").is_err());
    }
}
