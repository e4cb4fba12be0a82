//! Ingress: deliveries of raw transaction records with explicit acks

use crate::config::NatsConfig;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Error, Debug)]
#[error("ingress error: {0}")]
pub struct IngressError(pub String);

#[derive(Error, Debug)]
#[error("acknowledgement failed: {0}")]
pub struct AckError(pub String);

/// Acknowledges one delivery back to the broker.
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), AckError>;
}

/// One received message, not yet acknowledged.
pub struct Delivery {
    payload: Bytes,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Bytes, acker: Box<dyn Acknowledger>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Remove the message from the broker's redelivery set.
    pub async fn ack(self) -> Result<(), AckError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.payload.len())
            .finish()
    }
}

/// A stream of deliveries.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery; `None` once the source is exhausted or closed.
    async fn next(&mut self) -> Option<Result<Delivery, IngressError>>;
}

/// Consumer for receiving transaction records from a JetStream stream
pub struct TransactionConsumer {
    client: Client,
    stream: String,
    subject: String,
    consumer_name: String,
}

impl TransactionConsumer {
    /// Create a new transaction consumer
    pub fn new(client: Client, config: &NatsConfig) -> Self {
        Self {
            client,
            stream: config.ingress_stream.clone(),
            subject: config.ingress_subject.clone(),
            consumer_name: config.consumer_name.clone(),
        }
    }

    /// Bind the durable pull consumer and start receiving.
    ///
    /// `max_ack_pending` caps unacknowledged deliveries on the server side,
    /// matching the local flow-control budget.
    pub async fn subscribe(&self, max_ack_pending: usize) -> Result<JetStreamSource> {
        let context = jetstream::new(self.client.clone());

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: self.stream.clone(),
                subjects: vec![self.subject.clone()],
                ..Default::default()
            })
            .await
            .with_context(|| format!("Failed to bind stream {}", self.stream))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.consumer_name,
                pull::Config {
                    durable_name: Some(self.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: max_ack_pending as i64,
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("Failed to bind consumer {}", self.consumer_name))?;

        let messages = consumer
            .messages()
            .await
            .context("Failed to start message stream")?;

        info!(
            stream = %self.stream,
            subject = %self.subject,
            consumer = %self.consumer_name,
            max_ack_pending = max_ack_pending,
            "Subscribed to transaction subject"
        );

        Ok(JetStreamSource { messages })
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Deliveries from a JetStream pull consumer.
pub struct JetStreamSource {
    messages: pull::Stream,
}

#[async_trait]
impl MessageSource for JetStreamSource {
    async fn next(&mut self) -> Option<Result<Delivery, IngressError>> {
        let item = self.messages.next().await?;
        Some(
            item.map(|message| {
                let payload = message.payload.clone();
                Delivery::new(payload, Box::new(JetStreamAck(message)))
            })
            .map_err(|e| IngressError(e.to_string())),
        )
    }
}

struct JetStreamAck(jetstream::Message);

#[async_trait]
impl Acknowledger for JetStreamAck {
    async fn ack(self: Box<Self>) -> Result<(), AckError> {
        self.0.ack().await.map_err(|e| AckError(e.to_string()))
    }
}

/// In-process source fed through a channel, e.g. for replaying records.
pub struct ChannelSource {
    receiver: mpsc::Receiver<Delivery>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<Delivery>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver })
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next(&mut self) -> Option<Result<Delivery, IngressError>> {
        self.receiver.recv().await.map(Ok)
    }
}

/// Acknowledger for sources without broker-side state.
pub struct NoopAck;

#[async_trait]
impl Acknowledger for NoopAck {
    async fn ack(self: Box<Self>) -> Result<(), AckError> {
        Ok(())
    }
}
