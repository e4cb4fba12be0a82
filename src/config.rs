//! Configuration management for the inference worker

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "FRAUD_CONFIG";

/// When a delivery is acknowledged to the broker
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Ack once processing reached a terminal state; redelivery after a
    /// crash is absorbed by keyed downstream writes
    #[default]
    AfterProcessing,
    /// Ack as soon as the message is handed to the worker pool
    OnDispatch,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub registry: RegistryConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// JetStream stream holding raw transaction records
    pub ingress_stream: String,
    /// Subject raw transaction records are published on
    pub ingress_subject: String,
    /// Durable consumer name for this worker group
    pub consumer_name: String,
    /// Subject for scored results
    pub egress_subject: String,
    /// JetStream stream holding scored results
    #[serde(default = "default_egress_stream")]
    pub egress_stream: String,
    /// Subject for messages that failed all retries; unset drops them
    #[serde(default)]
    pub dead_letter_subject: Option<String>,
    /// Subject the alert relay publishes notices on
    #[serde(default = "default_alert_subject")]
    pub alert_subject: String,
}

fn default_egress_stream() -> String {
    "PREDICTIONS".to_string()
}

fn default_alert_subject() -> String {
    "fraud.alerts".to_string()
}

/// Model registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Root directory of the versioned registry
    pub root: String,
    /// Registered model name
    pub display_name: String,
    /// Seconds between checks for a newer version (0 disables)
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

/// Local model artifacts configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Directory artifacts are staged into
    pub staging_dir: String,
    #[serde(default = "default_scaler_file")]
    pub scaler_file: String,
    #[serde(default = "default_model_file")]
    pub model_file: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Number of inputs the ONNX classifier was exported with
    #[serde(default = "default_input_width")]
    pub input_width: usize,
    /// Refuse to start consuming without a loaded model
    #[serde(default = "default_true")]
    pub require_at_startup: bool,
}

fn default_scaler_file() -> String {
    "scalers.json".to_string()
}

fn default_model_file() -> String {
    "model.onnx".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

fn default_input_width() -> usize {
    crate::feature_extractor::FEATURE_COUNT
}

fn default_true() -> bool {
    true
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Jobs that may wait for a free worker before submission blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum unacknowledged deliveries
    pub max_in_flight_messages: usize,
    /// Maximum unacknowledged payload bytes
    pub max_in_flight_bytes: usize,
    /// Bound on waiting for publish confirmation, in milliseconds
    pub publish_timeout_ms: u64,
    /// Bound on acknowledging a delivery, in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default)]
    pub ack_mode: AckMode,
    /// Extra attempts for retryable failures before dead-lettering
    #[serde(default)]
    pub max_retries: u32,
    /// Linear backoff step between attempts, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Seconds between metrics summaries (0 disables)
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_metrics_interval() -> u64 {
    30
}

impl PipelineConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `FRAUD_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, with `FRAUD__*` environment
    /// overrides (e.g. `FRAUD__NATS__URL`)
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the pipeline
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        anyhow::ensure!(pipeline.workers > 0, "pipeline.workers must be at least 1");
        anyhow::ensure!(
            pipeline.queue_capacity > 0,
            "pipeline.queue_capacity must be at least 1"
        );
        anyhow::ensure!(
            pipeline.max_in_flight_messages > 0,
            "pipeline.max_in_flight_messages must be at least 1"
        );
        anyhow::ensure!(
            pipeline.max_in_flight_bytes > 0,
            "pipeline.max_in_flight_bytes must be at least 1"
        );
        anyhow::ensure!(
            pipeline.publish_timeout_ms > 0,
            "pipeline.publish_timeout_ms must be positive"
        );
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                ingress_stream: "TRANSACTIONS".to_string(),
                ingress_subject: "transactions.raw".to_string(),
                consumer_name: "inference".to_string(),
                egress_subject: "predictions".to_string(),
                egress_stream: default_egress_stream(),
                dead_letter_subject: None,
                alert_subject: default_alert_subject(),
            },
            registry: RegistryConfig {
                root: "registry".to_string(),
                display_name: "fraud-detection-xgboost".to_string(),
                refresh_interval_secs: 0,
            },
            model: ModelConfig {
                staging_dir: "artifacts".to_string(),
                scaler_file: default_scaler_file(),
                model_file: default_model_file(),
                onnx_threads: default_onnx_threads(),
                input_width: default_input_width(),
                require_at_startup: true,
            },
            pipeline: PipelineConfig {
                workers: 20,
                queue_capacity: default_queue_capacity(),
                max_in_flight_messages: 5,
                max_in_flight_bytes: 10 * 1024 * 1024,
                publish_timeout_ms: 5000,
                ack_timeout_ms: default_ack_timeout_ms(),
                ack_mode: AckMode::AfterProcessing,
                max_retries: 0,
                retry_backoff_ms: default_retry_backoff_ms(),
                metrics_interval_secs: default_metrics_interval(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}
