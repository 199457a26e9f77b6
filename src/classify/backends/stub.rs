use crate::classify::backend::{ClassifyError, FrameClassifier};
use crate::frame::{InputShape, ModelInput};

/// Stub classifier for demos and tests. The score is the mean normalized
/// brightness, so bright frames read as violent and dark ones as safe.
#[derive(Clone, Debug, Default)]
pub struct StubClassifier {
    shape: InputShape,
}

impl StubClassifier {
    pub fn new(shape: InputShape) -> Self {
        Self { shape }
    }
}

impl FrameClassifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn score(&self, input: &ModelInput) -> Result<f32, ClassifyError> {
        Ok(input.mean().clamp(0.0, 1.0))
    }
}
