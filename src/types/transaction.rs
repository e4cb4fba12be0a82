//! Transaction records as they arrive on the ingress subject

use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::io;

/// Number of anonymised `V*` features in a record.
pub const V_FEATURE_COUNT: usize = 28;

/// Number of delimited fields in a serialised record.
pub const FIELD_COUNT: usize = 32;

/// Column name of the identifier; a first field equal to this marks a header row.
pub const ID_COLUMN: &str = "transaction_id";

/// Column names in wire order.
pub const COLUMN_NAMES: [&str; FIELD_COUNT] = [
    ID_COLUMN, "Time", "V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8", "V9", "V10", "V11", "V12",
    "V13", "V14", "V15", "V16", "V17", "V18", "V19", "V20", "V21", "V22", "V23", "V24", "V25",
    "V26", "V27", "V28", "Amount", "Class",
];

/// One card transaction: identifier, elapsed time, 28 PCA components, amount
/// and (for training or backfill data only) the ground-truth class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,

    /// Seconds since the first transaction of the capture window
    pub time: f64,

    /// V1..V28
    pub features: [f64; V_FEATURE_COUNT],

    pub amount: f64,

    /// Ground truth, absent in live traffic
    pub class: Option<i64>,
}

impl TransactionRecord {
    /// Create a record with all `V*` features set to zero.
    pub fn new(transaction_id: impl Into<String>, time: f64, amount: f64) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            time,
            features: [0.0; V_FEATURE_COUNT],
            amount,
            class: None,
        }
    }

    pub fn with_features(mut self, features: [f64; V_FEATURE_COUNT]) -> Self {
        self.features = features;
        self
    }

    pub fn with_class(mut self, class: i64) -> Self {
        self.class = Some(class);
        self
    }

    /// Serialise back to the 32-field wire format, quoting where needed.
    pub fn to_csv_line(&self) -> csv::Result<String> {
        let mut fields = Vec::with_capacity(FIELD_COUNT);
        fields.push(self.transaction_id.clone());
        fields.push(self.time.to_string());
        fields.extend(self.features.iter().map(|v| v.to_string()));
        fields.push(self.amount.to_string());
        fields.push(self.class.map(|c| c.to_string()).unwrap_or_default());

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(&fields)?;
        let mut line = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        String::from_utf8(line)
            .map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}
