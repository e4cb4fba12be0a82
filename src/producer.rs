//! NATS publisher for scored results and dead letters

use crate::config::NatsConfig;
use crate::error::PublishError;
use crate::types::{AlertNotice, DeadLetter, ScoredResult};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

/// Destination for scored results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Publish one result and wait for the broker's confirmation.
    async fn publish(&self, result: &ScoredResult) -> Result<(), PublishError>;

    /// Publish a payload that could not be processed.
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), PublishError>;

    /// Whether a dead-letter destination is configured.
    fn has_dead_letter(&self) -> bool;
}

/// Publishes results to a JetStream stream with bounded confirmation waits.
#[derive(Clone)]
pub struct ResultPublisher {
    context: jetstream::Context,
    subject: String,
    dead_letter_subject: Option<String>,
    timeout: Duration,
}

impl ResultPublisher {
    /// Bind the egress stream, creating it if needed.
    pub async fn connect(client: Client, config: &NatsConfig, timeout: Duration) -> Result<Self> {
        let context = jetstream::new(client);

        let mut subjects = vec![config.egress_subject.clone()];
        subjects.extend(config.dead_letter_subject.iter().cloned());

        context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.egress_stream.clone(),
                subjects,
                ..Default::default()
            })
            .await
            .with_context(|| format!("Failed to bind stream {}", config.egress_stream))?;

        info!(
            stream = %config.egress_stream,
            subject = %config.egress_subject,
            dead_letter_subject = ?config.dead_letter_subject,
            timeout_ms = timeout.as_millis() as u64,
            "Result publisher ready"
        );

        Ok(Self {
            context,
            subject: config.egress_subject.clone(),
            dead_letter_subject: config.dead_letter_subject.clone(),
            timeout,
        })
    }

    async fn send(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        let confirmed = async {
            let ack = self
                .context
                .publish(subject.to_string(), payload)
                .await
                .map_err(|e| PublishError::Send(e.to_string()))?;
            ack.await.map_err(|e| PublishError::Send(e.to_string()))?;
            Ok(())
        };

        tokio::time::timeout(self.timeout, confirmed)
            .await
            .map_err(|_| PublishError::Timeout(self.timeout))?
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl ResultSink for ResultPublisher {
    async fn publish(&self, result: &ScoredResult) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(result)?;
        self.send(&self.subject, payload.into()).await?;

        debug!(
            transaction_id = %result.id,
            failure = result.failure,
            prediction_score = result.prediction_score,
            "Published scored result"
        );

        Ok(())
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), PublishError> {
        let Some(subject) = &self.dead_letter_subject else {
            return Ok(());
        };
        let payload = serde_json::to_vec(letter)?;
        self.send(subject, payload.into()).await
    }

    fn has_dead_letter(&self) -> bool {
        self.dead_letter_subject.is_some()
    }
}

/// Producer for publishing fraud alert notices to NATS
#[derive(Clone)]
pub struct AlertProducer {
    client: Client,
    subject: String,
}

impl AlertProducer {
    /// Create a new alert producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish an alert notice
    pub async fn publish(&self, notice: &AlertNotice) -> Result<()> {
        let payload = serde_json::to_vec(notice)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            alert_id = %notice.alert_id,
            transaction_id = %notice.transaction_id,
            prediction_score = notice.prediction_score,
            "Published alert notice"
        );

        Ok(())
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}
