//! Fraud Inference Worker - Main Entry Point
//!
//! Stages the latest registered model, then consumes raw transaction records
//! from NATS, scores them and publishes one result per record.

use anyhow::{Context, Result};
use fraud_inference_worker::{
    config::AppConfig,
    consumer::TransactionConsumer,
    dispatcher::Dispatcher,
    flow_control::FlowControl,
    logging,
    metrics::{MetricsReporter, PipelineMetrics},
    models::{
        DirectoryRegistry, FileArtifactLoader, ModelCache, ModelRefresher, ModelRegistry, Scorer,
        StagingArea,
    },
    pipeline::{Pipeline, RetryPolicy},
    producer::ResultPublisher,
    worker_pool::WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    logging::init(&config.logging, "fraud_inference_worker")?;

    info!("Starting Fraud Inference Worker");
    info!(
        workers = config.pipeline.workers,
        max_in_flight_messages = config.pipeline.max_in_flight_messages,
        max_in_flight_bytes = config.pipeline.max_in_flight_bytes,
        ack_mode = ?config.pipeline.ack_mode,
        max_retries = config.pipeline.max_retries,
        "Configuration loaded successfully"
    );

    // Stage and load the model before consuming anything
    let staging = StagingArea::new(
        &config.model.staging_dir,
        &config.model.scaler_file,
        &config.model.model_file,
    );
    let registry: Arc<dyn ModelRegistry> = Arc::new(DirectoryRegistry::new(&config.registry.root));
    let loader = Arc::new(FileArtifactLoader::new(
        staging.clone(),
        config.model.onnx_threads,
        config.model.input_width,
    ));
    let cache = Arc::new(ModelCache::new(loader));

    let fetched = cache
        .fetch_latest(registry.as_ref(), &config.registry.display_name, &staging)
        .context("Failed to fetch model from registry")?;
    if fetched.is_none() {
        warn!(
            display_name = %config.registry.display_name,
            "No registered model, falling back to previously staged artifacts"
        );
    }

    match cache.ensure_loaded() {
        Ok(snapshot) => info!(
            version = snapshot.version,
            classifier = snapshot.classifier.name(),
            "Model ready"
        ),
        Err(e) if config.model.require_at_startup => {
            return Err(e).context("Failed to load model artifacts");
        }
        Err(e) => warn!(error = %e, "Model not loaded, scoring will retry the load"),
    }

    // Initialize metrics
    let metrics = Arc::new(PipelineMetrics::new());

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let publisher = ResultPublisher::connect(
        client.clone(),
        &config.nats,
        config.pipeline.publish_timeout(),
    )
    .await?;
    let consumer = TransactionConsumer::new(client.clone(), &config.nats);
    let mut source = consumer
        .subscribe(config.pipeline.max_in_flight_messages)
        .await?;

    info!("Listening on subject: {}", consumer.subject());
    info!("Publishing results to: {}", publisher.subject());

    let pipeline = Arc::new(Pipeline::new(
        Scorer::new(cache.clone()),
        Arc::new(publisher),
        metrics.clone(),
        RetryPolicy::new(config.pipeline.max_retries, config.pipeline.retry_backoff()),
    ));
    let dispatcher = Dispatcher::new(
        pipeline,
        WorkerPool::new(config.pipeline.workers, config.pipeline.queue_capacity),
        FlowControl::new(
            config.pipeline.max_in_flight_messages,
            config.pipeline.max_in_flight_bytes,
        ),
        config.pipeline.ack_mode,
        config.pipeline.ack_timeout(),
    );

    // Periodic metrics summary
    if config.pipeline.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    // Hot-swap newer registered versions
    if config.registry.refresh_interval_secs > 0 {
        let refresher = ModelRefresher::new(
            cache.clone(),
            registry.clone(),
            config.registry.display_name.clone(),
            staging.clone(),
            Duration::from_secs(config.registry.refresh_interval_secs),
        );
        tokio::spawn(refresher.start());
    }

    let dispatched = dispatcher.run(&mut source, shutdown_signal()).await;

    info!(dispatched = dispatched, "Pipeline shutting down...");
    if let Err(e) = client.flush().await {
        warn!(error = %e, "Failed to flush NATS connection");
    }
    metrics.print_summary();

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
