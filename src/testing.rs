//! In-memory fakes shared by unit tests.

use crate::consumer::{AckError, Acknowledger, Delivery};
use crate::error::{LoadError, PublishError};
use crate::models::cache::{ModelCache, ModelSnapshot};
use crate::models::classifier::LinearClassifier;
use crate::models::inference::Scorer;
use crate::models::loader::ArtifactLoader;
use crate::models::scaler::{ScalerBundle, StandardScaler};
use crate::producer::ResultSink;
use crate::types::{DeadLetter, ScoredResult, TransactionRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Linear model flagging strongly negative V14 values as fraud.
pub struct FraudModelLoader;

impl ArtifactLoader for FraudModelLoader {
    fn load(&self) -> Result<ModelSnapshot, LoadError> {
        let mut weights = vec![0.0; 30];
        weights[14] = -3.0;
        let scalers = ScalerBundle {
            scaler_time: StandardScaler::new(86400.0, 47000.0),
            scaler_amount: StandardScaler::new(88.0, 250.0),
        };
        Ok(ModelSnapshot::new(
            1,
            scalers,
            Box::new(LinearClassifier::new(weights, -5.0)),
        ))
    }
}

/// [`FraudModelLoader`] that blocks its thread before returning.
pub struct SlowModelLoader {
    delay: Duration,
    pub loads: AtomicUsize,
}

impl SlowModelLoader {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            loads: AtomicUsize::new(0),
        }
    }
}

impl ArtifactLoader for SlowModelLoader {
    fn load(&self) -> Result<ModelSnapshot, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        FraudModelLoader.load()
    }
}

pub fn fraud_scorer() -> Scorer {
    Scorer::new(Arc::new(ModelCache::new(Arc::new(FraudModelLoader))))
}

/// A CSV line for a legitimate-looking record.
pub fn legit_line(id: &str) -> String {
    TransactionRecord::new(id, 55363.0, 100.5).to_csv_line().unwrap()
}

/// A CSV line the fraud model flags.
pub fn fraud_line(id: &str) -> String {
    let mut v = [0.0; 28];
    v[13] = -9.5;
    TransactionRecord::new(id, 406.0, 0.0).with_features(v).to_csv_line().unwrap()
}

/// Sink that records what it publishes and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<ScoredResult>>,
    pub dead_letters: Mutex<Vec<DeadLetter>>,
    /// Publishes that fail before the sink starts succeeding
    pub failures_left: AtomicU32,
    /// Fail only the publish with this 1-based attempt number
    pub fail_attempt: Option<usize>,
    /// Fail every publish
    pub always_fail: bool,
    /// Never confirm; publishes time out after this long
    pub stall: Option<Duration>,
    pub dead_letter_enabled: bool,
    pub attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn with_dead_letter() -> Self {
        Self {
            dead_letter_enabled: true,
            ..Default::default()
        }
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Default::default()
        }
    }

    pub fn published_ids(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn publish(&self, result: &ScoredResult) -> Result<(), PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
            return Err(PublishError::Timeout(stall));
        }
        if self.always_fail || self.fail_attempt == Some(attempt) {
            return Err(PublishError::Send("broker unavailable".to_string()));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PublishError::Send("broker unavailable".to_string()));
        }
        self.published.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), PublishError> {
        self.dead_letters.lock().unwrap().push(letter.clone());
        Ok(())
    }

    fn has_dead_letter(&self) -> bool {
        self.dead_letter_enabled
    }
}

/// Acknowledger that appends a label to a shared log.
pub struct LoggedAck {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Acknowledger for LoggedAck {
    async fn ack(self: Box<Self>) -> Result<(), AckError> {
        self.log.lock().unwrap().push(self.label);
        Ok(())
    }
}

pub fn delivery(payload: &str, label: &str, log: &Arc<Mutex<Vec<String>>>) -> Delivery {
    Delivery::new(
        Bytes::from(payload.to_string()),
        Box::new(LoggedAck {
            label: label.to_string(),
            log: log.clone(),
        }),
    )
}
