//! Egress messages: scored results and dead letters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of scoring one transaction, published on the egress subject.
///
/// Field names are part of the wire contract consumed by the alerting and
/// persistence services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    /// Transaction identifier, copied unchanged from the input record
    pub id: String,

    /// Predicted class (1 = fraud)
    pub failure: u8,

    /// Probability of the fraud class (0.0 - 1.0)
    pub prediction_score: f64,

    /// Original (unscaled) time, truncated to whole seconds
    pub time: i64,

    /// Original (unscaled) amount
    pub amount: f64,
}

impl ScoredResult {
    pub fn is_fraud(&self) -> bool {
        self.failure == 1
    }
}

/// A message that could not be processed after all retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Raw payload as received (lossy UTF-8)
    pub payload: String,

    pub error: String,

    pub attempts: u32,

    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(payload: &[u8], error: impl ToString, attempts: u32) -> Self {
        Self {
            payload: String::from_utf8_lossy(payload).into_owned(),
            error: error.to_string(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}
