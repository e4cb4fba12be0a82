//! ONNX Runtime backed classifier

use crate::error::{LoadError, ScoringError};
use crate::models::classifier::{Classifier, Prediction};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info};

static RUNTIME: OnceLock<Result<(), String>> = OnceLock::new();

fn init_runtime() -> Result<(), LoadError> {
    RUNTIME
        .get_or_init(|| {
            ort::init().commit().map_err(|e| e.to_string())?;
            info!("ONNX Runtime initialized");
            Ok(())
        })
        .clone()
        .map_err(LoadError::Runtime)
}

/// Classifier exported to ONNX (e.g. XGBoost through onnxmltools).
///
/// The graph is expected to expose a `label` output with the predicted
/// class and a probability output, either as a `[1, 2]` tensor or as
/// `seq(map(int64, float))`.
pub struct OnnxClassifier {
    /// Running a session needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    label_output: Option<String>,
    probability_output: String,
    input_width: usize,
}

impl OnnxClassifier {
    /// Load a classifier graph from file.
    pub fn load(path: &Path, threads: usize, input_width: usize) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::Missing(path.to_path_buf()));
        }
        init_runtime()?;

        info!(path = %path.display(), threads = threads, "Loading ONNX classifier");

        let session = build_session(path, threads).map_err(|e| LoadError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        })?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let label_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .map(|o| o.name.clone());

        let probability_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            input = %input_name,
            label = ?label_output,
            probability = %probability_output,
            "ONNX classifier loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            label_output,
            probability_output,
            input_width,
        })
    }

    fn extract_label(&self, outputs: &SessionOutputs) -> Option<u8> {
        let name = self.label_output.as_deref()?;
        let output = outputs.get(name)?;
        let (_, data) = output.try_extract_tensor::<i64>().ok()?;
        data.first().map(|&class| u8::from(class == 1))
    }

    /// Fraud-class probability from either tensor or seq(map) output.
    fn extract_probability(&self, outputs: &SessionOutputs) -> Result<f64, ScoringError> {
        let output = outputs
            .get(&self.probability_output)
            .ok_or(ScoringError::MissingOutput("probability"))?;

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            return fraud_prob_from_tensor(shape.iter().last().copied(), data)
                .ok_or(ScoringError::MissingOutput("probability"));
        }

        let dtype = output.dtype();
        if DynSequenceValueType::can_downcast(&dtype) {
            return fraud_prob_from_sequence_map(output);
        }

        Err(ScoringError::MissingOutput("probability"))
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        "onnx"
    }

    fn input_width(&self) -> Option<usize> {
        Some(self.input_width)
    }

    fn predict(&self, features: &[f32]) -> Result<Prediction, ScoringError> {
        let shape = vec![1_i64, features.len() as i64];
        let input = Tensor::from_array((shape, features.to_vec()))
            .map_err(|e| ScoringError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ScoringError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input])
            .map_err(|e| ScoringError::Inference(e.to_string()))?;

        let probability = self.extract_probability(&outputs)?;
        let label = label_or_threshold(self.extract_label(&outputs), probability);

        debug!(label = label, probability = probability, "ONNX inference complete");

        Ok(Prediction { label, probability })
    }
}

fn build_session(path: &Path, threads: usize) -> anyhow::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads)?
        .commit_from_file(path)?;
    Ok(session)
}

/// Graphs without a label output fall back to the default 0.5 cut.
fn label_or_threshold(label: Option<u8>, probability: f64) -> u8 {
    label.unwrap_or_else(|| u8::from(probability >= 0.5))
}

/// `classes` is the last dimension of a `[batch, classes]` or `[classes]`
/// tensor. With two or more classes, class 1 is fraud; a single column is
/// already the fraud probability.
fn fraud_prob_from_tensor(classes: Option<i64>, data: &[f32]) -> Option<f64> {
    match classes.unwrap_or(0) {
        c if c >= 2 => data.get(1).map(|&p| p as f64),
        1 => data.first().map(|&p| p as f64),
        _ => None,
    }
}

/// seq(map(int64, float)), as produced by sklearn-onnx ZipMap.
fn fraud_prob_from_sequence_map(output: &DynValue) -> Result<f64, ScoringError> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| ScoringError::Inference(format!("failed to downcast to sequence: {e}")))?;
    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(|e| ScoringError::Inference(e.to_string()))?;

    let first = maps.first().ok_or(ScoringError::MissingOutput("probability"))?;
    let pairs = first
        .try_extract_key_values::<i64, f32>()
        .map_err(|e| ScoringError::Inference(e.to_string()))?;

    if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 1) {
        return Ok(*p as f64);
    }
    pairs
        .iter()
        .find(|(class, _)| *class == 0)
        .map(|(_, p)| 1.0 - *p as f64)
        .ok_or(ScoringError::MissingOutput("probability"))
}
