//! Fraud alert notices derived from scored results

use crate::types::result::ScoredResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification raised for a transaction predicted as fraud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertNotice {
    /// Unique alert identifier
    pub alert_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// Fraud probability reported by the scorer
    pub prediction_score: f64,

    /// Notification subject line
    pub subject: String,

    /// Notification body
    pub body: String,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl AlertNotice {
    /// Build a notice for a fraud prediction; `None` for legitimate ones.
    pub fn from_result(result: &ScoredResult) -> Option<Self> {
        if !result.is_fraud() {
            return None;
        }

        let transaction_id = result.id.clone();
        let subject = format!("[Fraud alert] Suspected fraud in transaction {transaction_id}");
        let body = format!(
            "A transaction was flagged as fraudulent.\n\n\
             Transaction ID: {transaction_id}\n\
             Fraud score: {:.4}\n\
             Amount: {:.2}\n\n\
             Please investigate immediately.",
            result.prediction_score, result.amount
        );

        Some(Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transaction_id,
            prediction_score: result.prediction_score,
            subject,
            body,
            timestamp: Utc::now(),
        })
    }
}
