//! Binary classifiers behind a common interface

use crate::error::{LoadError, ScoringError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output of a classifier for one feature vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted class as reported by the classifier itself (0 or 1)
    pub label: u8,
    /// Probability of the positive (fraud) class
    pub probability: f64,
}

/// A fitted binary classifier.
///
/// Implementations must be deterministic: the same features always yield
/// the same prediction.
pub trait Classifier: Send + Sync {
    /// Human-readable model kind, used in logs.
    fn name(&self) -> &str;

    /// Number of input columns the classifier was fitted on, if known.
    fn input_width(&self) -> Option<usize>;

    fn predict(&self, features: &[f32]) -> Result<Prediction, ScoringError>;
}

/// Logistic-regression classifier stored as plain JSON.
///
/// ```json
/// {"weights": [0.1, ...], "intercept": -3.2}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LinearClassifier {
    pub fn new(weights: Vec<f64>, intercept: f64) -> Self {
        Self { weights, intercept }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: Self = serde_json::from_slice(&bytes).map_err(|e| LoadError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if model.weights.is_empty() {
            return Err(LoadError::Corrupt {
                path: path.to_path_buf(),
                reason: "no weights".to_string(),
            });
        }
        Ok(model)
    }

    fn decision_function(&self, features: &[f32]) -> f64 {
        self.weights
            .iter()
            .zip(features)
            .fold(self.intercept, |acc, (w, &x)| acc + w * x as f64)
    }
}

impl Classifier for LinearClassifier {
    fn name(&self) -> &str {
        "linear"
    }

    fn input_width(&self) -> Option<usize> {
        Some(self.weights.len())
    }

    fn predict(&self, features: &[f32]) -> Result<Prediction, ScoringError> {
        if features.len() != self.weights.len() {
            return Err(ScoringError::FeatureShape {
                expected: self.weights.len(),
                found: features.len(),
            });
        }

        let decision = self.decision_function(features);
        let probability = 1.0 / (1.0 + (-decision).exp());
        let label = u8::from(decision > 0.0);

        Ok(Prediction { label, probability })
    }
}
