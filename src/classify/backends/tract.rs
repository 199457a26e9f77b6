#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result};
use tract_onnx::prelude::*;

use crate::classify::backend::{ClassifyError, FrameClassifier};
use crate::frame::{InputShape, ModelInput};

/// Tract-based classifier for an ONNX export of the frame CNN.
///
/// Input is NHWC `1 x H x W x 3` float in [0,1]. Output is either a single
/// sigmoid unit or a two-class softmax, where index 1 is the violence class.
pub struct TractClassifier {
    model: TypedRunnableModel<TypedModel>,
    shape: InputShape,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, shape: InputShape) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, shape.height as usize, shape.width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, shape })
    }

    fn build_input(&self, input: &ModelInput) -> Result<Tensor, ClassifyError> {
        let array = tract_ndarray::Array4::from_shape_vec(
            (1, self.shape.height as usize, self.shape.width as usize, 3),
            input.as_slice().to_vec(),
        )
        .map_err(|e| ClassifyError::Input(e.to_string()))?;
        Ok(array.into_tensor())
    }
}

fn extract_probability(outputs: &TVec<TValue>) -> Result<f32, ClassifyError> {
    let output = outputs
        .first()
        .ok_or_else(|| ClassifyError::Inference("model produced no outputs".to_string()))?;
    let scores = output
        .to_array_view::<f32>()
        .map_err(|e| ClassifyError::Inference(format!("output tensor was not f32: {}", e)))?;
    let values: Vec<f32> = scores.iter().copied().collect();
    match values.as_slice() {
        [sigmoid] => Ok(*sigmoid),
        [_, violence] => Ok(*violence),
        other => Err(ClassifyError::Inference(format!(
            "expected 1 or 2 output values, got {}",
            other.len()
        ))),
    }
}

impl FrameClassifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn score(&self, input: &ModelInput) -> Result<f32, ClassifyError> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;
        extract_probability(&outputs)
    }
}
