//! Feature extraction for classifier inference.
//!
//! Produces the feature vector in the exact column order the classifier was
//! trained on: the identifier and label are dropped, `Time` and `Amount` are
//! standardised with the snapshot's scalers, and the 28 PCA components pass
//! through unchanged.

use crate::models::scaler::ScalerBundle;
use crate::types::transaction::{TransactionRecord, V_FEATURE_COUNT};

/// Number of model inputs: Time + V1..V28 + Amount.
pub const FEATURE_COUNT: usize = V_FEATURE_COUNT + 2;

/// Transforms transaction records into classifier input.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the scaled feature vector for one record.
    pub fn extract(&self, record: &TransactionRecord, scalers: &ScalerBundle) -> Vec<f32> {
        let mut features = Vec::with_capacity(FEATURE_COUNT);

        features.push(scalers.scaler_time.transform(record.time) as f32);
        features.extend(record.features.iter().map(|&v| v as f32));
        features.push(scalers.scaler_amount.transform(record.amount) as f32);

        features
    }
}
