//! Fraud Alert Relay
//!
//! Watches the scored-result subject and publishes an alert notice for every
//! transaction predicted as fraud.

use anyhow::Result;
use fraud_inference_worker::{
    config::AppConfig, logging, producer::AlertProducer, AlertNotice, ScoredResult,
};
use futures::StreamExt;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging, "fraud_alert_relay")?;

    info!("Starting Fraud Alert Relay");

    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let producer = AlertProducer::new(client.clone(), &config.nats.alert_subject);
    let mut subscription = client.subscribe(config.nats.egress_subject.clone()).await?;

    info!("Watching results on: {}", config.nats.egress_subject);
    info!("Publishing alerts to: {}", producer.subject());

    let mut relayed: u64 = 0;
    while let Some(message) = subscription.next().await {
        let result = match serde_json::from_slice::<ScoredResult>(&message.payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Failed to deserialize scored result");
                continue;
            }
        };

        let Some(notice) = AlertNotice::from_result(&result) else {
            continue;
        };

        match producer.publish(&notice).await {
            Ok(()) => {
                relayed += 1;
                info!(
                    transaction_id = %notice.transaction_id,
                    prediction_score = notice.prediction_score,
                    relayed = relayed,
                    "Fraud alert published"
                );
            }
            Err(e) => error!(
                transaction_id = %notice.transaction_id,
                error = %e,
                "Failed to publish fraud alert"
            ),
        }
    }

    info!(relayed = relayed, "Result subscription closed");
    Ok(())
}
