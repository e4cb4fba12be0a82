//! Error types for the inference worker.
//!
//! Every error here is local to a single message. Only startup code turns
//! them into process-level failures (via `anyhow`).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A raw record could not be turned into a [`TransactionRecord`].
///
/// [`TransactionRecord`]: crate::types::TransactionRecord
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty record")]
    Empty,

    #[error("payload is not valid UTF-8")]
    Encoding,

    #[error("row {row}: expected {expected} fields, found {found}")]
    FieldCount {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("header is missing column {0}")]
    MissingColumn(String),

    #[error("row {row}: field {field} is not numeric: {value:?}")]
    InvalidNumber {
        row: usize,
        field: String,
        value: String,
    },

    #[error("expected a single record, found {0}")]
    NotSingle(usize),

    #[error("malformed delimited text: {0}")]
    Csv(String),
}

/// Model artifacts are missing, unreadable, or could not be fetched.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("artifact not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt artifact {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("ONNX runtime error: {0}")]
    Runtime(String),

    #[error("model registry error: {0}")]
    Registry(String),

    #[error("model load task failed: {0}")]
    Task(String),
}

/// The classifier rejected or failed on a feature vector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("feature vector has {found} columns, classifier expects {expected}")]
    FeatureShape { expected: usize, found: usize },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("classifier produced no usable {0} output")]
    MissingOutput(&'static str),
}

/// A scored result could not be delivered to the egress subject.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Send(String),

    #[error("no publish confirmation within {0:?}")]
    Timeout(Duration),
}

/// Why processing one message failed.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl ProcessError {
    /// Whether running the same payload again could succeed.
    ///
    /// Malformed input and shape mismatches fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Parse(_) => false,
            ProcessError::Scoring(ScoringError::FeatureShape { .. }) => false,
            ProcessError::Scoring(_) => true,
            ProcessError::Load(_) => true,
            ProcessError::Publish(PublishError::Serialize(_)) => false,
            ProcessError::Publish(_) => true,
        }
    }

    /// Short stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Parse(_) => "parse",
            ProcessError::Load(_) => "load",
            ProcessError::Scoring(_) => "scoring",
            ProcessError::Publish(_) => "publish",
        }
    }
}
