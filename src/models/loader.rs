//! Loading staged artifacts into a model snapshot

use crate::error::LoadError;
use crate::models::cache::ModelSnapshot;
use crate::models::classifier::{Classifier, LinearClassifier};
use crate::models::onnx::OnnxClassifier;
use crate::models::registry::StagingArea;
use crate::models::scaler::ScalerBundle;
use std::path::Path;
use tracing::info;

/// Produces a fresh [`ModelSnapshot`] each time it is called.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self) -> Result<ModelSnapshot, LoadError>;
}

/// Loads the scaler bundle and classifier from a staging directory.
///
/// The classifier format follows the model file extension: `.onnx` runs
/// through ONNX Runtime, `.json` is a linear model.
pub struct FileArtifactLoader {
    staging: StagingArea,
    onnx_threads: usize,
    input_width: usize,
}

impl FileArtifactLoader {
    pub fn new(staging: StagingArea, onnx_threads: usize, input_width: usize) -> Self {
        Self {
            staging,
            onnx_threads,
            input_width,
        }
    }

    fn load_classifier(&self, path: &Path) -> Result<Box<dyn Classifier>, LoadError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("onnx") => Ok(Box::new(OnnxClassifier::load(
                path,
                self.onnx_threads,
                self.input_width,
            )?)),
            Some("json") => Ok(Box::new(LinearClassifier::from_json_file(path)?)),
            _ => Err(LoadError::Corrupt {
                path: path.to_path_buf(),
                reason: "unsupported model format (expected .onnx or .json)".to_string(),
            }),
        }
    }
}

impl ArtifactLoader for FileArtifactLoader {
    fn load(&self) -> Result<ModelSnapshot, LoadError> {
        let scaler_path = self.staging.scaler_path();
        let model_path = self.staging.model_path();

        let scalers = load_scalers(&scaler_path)?;
        info!(path = %scaler_path.display(), "Scalers loaded");

        if !model_path.exists() {
            return Err(LoadError::Missing(model_path));
        }
        let classifier = self.load_classifier(&model_path)?;
        let version = self.staging.staged_version();

        info!(
            path = %model_path.display(),
            kind = classifier.name(),
            version = version,
            "Classifier loaded"
        );

        Ok(ModelSnapshot::new(version, scalers, classifier))
    }
}

/// Read a JSON scaler bundle.
pub fn load_scalers(path: &Path) -> Result<ScalerBundle, LoadError> {
    if !path.exists() {
        return Err(LoadError::Missing(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| LoadError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
