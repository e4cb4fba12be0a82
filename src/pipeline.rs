//! Per-message processing: parse, score, publish, and the retry policy
//! applied when any of those fail.

use crate::error::{ParseError, ProcessError};
use crate::metrics::PipelineMetrics;
use crate::models::inference::Scorer;
use crate::parser::RecordParser;
use crate::producer::ResultSink;
use crate::types::{DeadLetter, TransactionRecord};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How often a retryable failure is attempted again.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before retry `n` is `n * backoff`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

/// Terminal state of one message.
#[derive(Debug)]
pub enum Outcome {
    /// Every record was scored and its result confirmed
    Completed { results: usize },
    /// Failed and was published to the dead-letter subject
    DeadLettered(ProcessError),
    /// Failed and was discarded
    Dropped(ProcessError),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

pub struct Pipeline {
    parser: RecordParser,
    scorer: Scorer,
    sink: Arc<dyn ResultSink>,
    metrics: Arc<PipelineMetrics>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        scorer: Scorer,
        sink: Arc<dyn ResultSink>,
        metrics: Arc<PipelineMetrics>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            parser: RecordParser::new(),
            scorer,
            sink,
            metrics,
            retry,
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Drive one payload to a terminal state. Never panics on bad input.
    ///
    /// A retry resumes at the record that failed; results already confirmed
    /// are not published again.
    pub async fn process(&self, payload: &[u8]) -> Outcome {
        let records = match self.parse(payload) {
            Ok(records) => records,
            Err(e) => return self.fail(payload, e.into(), 1).await,
        };

        let mut next = 0;
        let mut attempt = 1;
        loop {
            match self.publish_from(&records, &mut next).await {
                Ok(()) => {
                    return Outcome::Completed {
                        results: records.len(),
                    }
                }
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    self.metrics.record_retry();
                    warn!(
                        attempt = attempt,
                        kind = e.kind(),
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying message"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return self.fail(payload, e, attempt).await,
            }
        }
    }

    fn parse(&self, payload: &[u8]) -> Result<Vec<TransactionRecord>, ParseError> {
        let text = std::str::from_utf8(payload).map_err(|_| ParseError::Encoding)?;
        self.parser.parse_batch(text)
    }

    async fn publish_from(
        &self,
        records: &[TransactionRecord],
        next: &mut usize,
    ) -> Result<(), ProcessError> {
        while let Some(record) = records.get(*next) {
            let start = Instant::now();
            let result = self.scorer.score_result(record).await?;
            self.sink.publish(&result).await?;

            let elapsed = start.elapsed();
            self.metrics
                .record_result(elapsed, result.prediction_score, result.is_fraud());
            debug!(
                transaction_id = %result.id,
                failure = result.failure,
                prediction_score = result.prediction_score,
                processing_time_us = elapsed.as_micros() as u64,
                "Record scored and published"
            );
            *next += 1;
        }
        Ok(())
    }

    async fn fail(&self, payload: &[u8], error: ProcessError, attempts: u32) -> Outcome {
        self.metrics.record_failure(error.kind());

        if self.sink.has_dead_letter() {
            let letter = DeadLetter::new(payload, &error, attempts);
            match self.sink.dead_letter(&letter).await {
                Ok(()) => {
                    self.metrics.record_dead_letter();
                    warn!(
                        kind = error.kind(),
                        error = %error,
                        attempts = attempts,
                        "Message dead-lettered"
                    );
                    return Outcome::DeadLettered(error);
                }
                Err(e) => {
                    error!(error = %e, "Failed to publish dead letter");
                }
            }
        }

        self.metrics.record_dropped();
        error!(
            kind = error.kind(),
            error = %error,
            attempts = attempts,
            "Message dropped"
        );
        Outcome::Dropped(error)
    }
}
