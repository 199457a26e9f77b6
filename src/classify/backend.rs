use thiserror::Error;

use crate::frame::{InputShape, ModelInput};

/// Why a single classification failed. Always transient to the worker.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("input does not match classifier shape: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("classifier returned invalid probability {0}")]
    InvalidScore(f32),
}

/// Binary frame classifier.
///
/// Implementations are shared across ingestion workers behind an `Arc` and
/// invoked concurrently through `&self`; each call must be independent.
pub trait FrameClassifier: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Fixed input shape the frame is normalized to before `score`.
    fn input_shape(&self) -> InputShape;

    /// Violence probability for one normalized frame.
    fn score(&self, input: &ModelInput) -> Result<f32, ClassifyError>;
}

/// Run a classifier and reject anything that is not a probability.
pub fn checked_score(
    classifier: &dyn FrameClassifier,
    input: &ModelInput,
) -> Result<f32, ClassifyError> {
    let shape = classifier.input_shape();
    if input.width != shape.width || input.height != shape.height {
        return Err(ClassifyError::Input(format!(
            "got {}x{}, expected {}x{}",
            input.width, input.height, shape.width, shape.height
        )));
    }
    let p = classifier.score(input)?;
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(ClassifyError::InvalidScore(p));
    }
    Ok(p)
}
