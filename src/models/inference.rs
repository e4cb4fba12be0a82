//! Scoring of transaction records against the cached model snapshot

use crate::error::{LoadError, ProcessError, ScoringError};
use crate::feature_extractor::FeatureExtractor;
use crate::models::cache::{ModelCache, ModelSnapshot};
use crate::models::classifier::Prediction;
use crate::types::result::ScoredResult;
use crate::types::transaction::TransactionRecord;
use std::sync::Arc;
use tracing::debug;

/// Applies the cached scalers and classifier to transaction records.
pub struct Scorer {
    cache: Arc<ModelCache>,
    extractor: FeatureExtractor,
}

impl Scorer {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            cache,
            extractor: FeatureExtractor::new(),
        }
    }

    /// Current snapshot, loading it on the blocking pool if the cache is empty.
    pub async fn snapshot(&self) -> Result<Arc<ModelSnapshot>, LoadError> {
        if let Some(snapshot) = self.cache.current() {
            return Ok(snapshot);
        }

        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.ensure_loaded())
            .await
            .map_err(|e| LoadError::Task(e.to_string()))?
    }

    /// Score one record, loading the model first if needed.
    pub async fn score(&self, record: &TransactionRecord) -> Result<Prediction, ProcessError> {
        let snapshot = self.snapshot().await?;
        Ok(self.score_with(&snapshot, record)?)
    }

    /// Score one record against an explicit snapshot.
    pub fn score_with(
        &self,
        snapshot: &ModelSnapshot,
        record: &TransactionRecord,
    ) -> Result<Prediction, ScoringError> {
        let features = self.extractor.extract(record, &snapshot.scalers);

        if let Some(expected) = snapshot.classifier.input_width() {
            if expected != features.len() {
                return Err(ScoringError::FeatureShape {
                    expected,
                    found: features.len(),
                });
            }
        }

        let prediction = snapshot.classifier.predict(&features)?;

        debug!(
            transaction_id = %record.transaction_id,
            model_version = snapshot.version,
            label = prediction.label,
            probability = prediction.probability,
            "Record scored"
        );

        Ok(prediction)
    }

    /// Score a record and build the egress message for it.
    pub async fn score_result(
        &self,
        record: &TransactionRecord,
    ) -> Result<ScoredResult, ProcessError> {
        let prediction = self.score(record).await?;
        Ok(to_result(record, &prediction))
    }
}

/// Egress message for a scored record; time and amount are the unscaled inputs.
pub fn to_result(record: &TransactionRecord, prediction: &Prediction) -> ScoredResult {
    ScoredResult {
        id: record.transaction_id.clone(),
        failure: prediction.label,
        prediction_score: prediction.probability,
        time: record.time as i64,
        amount: record.amount,
    }
}
