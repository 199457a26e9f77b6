//! Frame classifiers.
//!
//! The classifier is loaded once at startup. Loading failure is not fatal:
//! the daemon runs with `None` and every source reports `ModelUnavailable`.

mod backend;
mod backends;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;

pub use backend::{checked_score, ClassifyError, FrameClassifier};
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;

use crate::frame::InputShape;

pub type SharedClassifier = Arc<dyn FrameClassifier>;

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierSettings {
    /// "tract" or "stub".
    pub backend: String,
    pub model_path: PathBuf,
    pub shape: InputShape,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: "tract".to_string(),
            model_path: PathBuf::from("frame_cnn_model_one.onnx"),
            shape: InputShape::default(),
        }
    }
}

/// Classifier availability as reported by `/system/status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Online,
    Offline,
}

impl ModelStatus {
    pub fn of(classifier: Option<&SharedClassifier>) -> Self {
        if classifier.is_some() {
            ModelStatus::Online
        } else {
            ModelStatus::Offline
        }
    }
}

/// Load the configured backend.
pub fn load(settings: &ClassifierSettings) -> Result<SharedClassifier> {
    match settings.backend.as_str() {
        "stub" => Ok(Arc::new(StubClassifier::new(settings.shape))),
        "tract" => load_tract(settings),
        other => Err(anyhow!("unknown classifier backend '{}'", other)),
    }
}

/// Load the configured backend, logging and absorbing failure.
pub fn load_optional(settings: &ClassifierSettings) -> Option<SharedClassifier> {
    match load(settings) {
        Ok(classifier) => {
            log::info!(
                "classifier '{}' loaded ({}x{})",
                classifier.name(),
                settings.shape.width,
                settings.shape.height
            );
            Some(classifier)
        }
        Err(err) => {
            log::error!("could not load classifier: {:#}", err);
            None
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ClassifierSettings) -> Result<SharedClassifier> {
    Ok(Arc::new(TractClassifier::new(
        &settings.model_path,
        settings.shape,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &ClassifierSettings) -> Result<SharedClassifier> {
    Err(anyhow!("tract classifier requires the backend-tract feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_loads() {
        let settings = ClassifierSettings {
            backend: "stub".to_string(),
            ..ClassifierSettings::default()
        };
        let classifier = load_optional(&settings);
        assert_eq!(ModelStatus::of(classifier.as_ref()), ModelStatus::Online);
    }

    #[test]
    fn unknown_backend_is_offline() {
        let settings = ClassifierSettings {
            backend: "keras".to_string(),
            ..ClassifierSettings::default()
        };
        assert!(load(&settings).is_err());
        assert_eq!(
            ModelStatus::of(load_optional(&settings).as_ref()),
            ModelStatus::Offline
        );
    }

    #[test]
    fn missing_model_file_is_offline() {
        let settings = ClassifierSettings {
            backend: "tract".to_string(),
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            ..ClassifierSettings::default()
        };
        assert!(load_optional(&settings).is_none());
    }
}
