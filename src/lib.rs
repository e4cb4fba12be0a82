//! Fraud Inference Worker Library
//!
//! Streaming credit-card fraud scorer: pulls raw transaction records from a
//! JetStream subject, scores them with the latest registered classifier and
//! publishes one result per record.

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod feature_extractor;
pub mod flow_control;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod producer;
pub mod types;
pub mod worker_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use dispatcher::Dispatcher;
pub use error::ProcessError;
pub use feature_extractor::FeatureExtractor;
pub use models::{ModelCache, Scorer};
pub use parser::RecordParser;
pub use pipeline::{Outcome, Pipeline, RetryPolicy};
pub use producer::{AlertProducer, ResultPublisher};
pub use types::{AlertNotice, ScoredResult, TransactionRecord};
