//! Dispatch loop: pulls deliveries, admits them through flow control, hands
//! them to the worker pool and acknowledges them according to [`AckMode`].

use crate::config::AckMode;
use crate::consumer::{Delivery, MessageSource};
use crate::flow_control::{FlowControl, FlowPermit};
use crate::metrics::PipelineMetrics;
use crate::pipeline::Pipeline;
use crate::worker_pool::{SubmitError, WorkerPool};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    pool: WorkerPool,
    flow: FlowControl,
    ack_mode: AckMode,
    ack_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl Dispatcher {
    pub fn new(
        pipeline: Arc<Pipeline>,
        pool: WorkerPool,
        flow: FlowControl,
        ack_mode: AckMode,
        ack_timeout: Duration,
    ) -> Self {
        let metrics = pipeline.metrics().clone();
        Self {
            pipeline,
            pool,
            flow,
            ack_mode,
            ack_timeout,
            metrics,
        }
    }

    /// Run until `shutdown` resolves or the source closes, then wait for
    /// every dispatched message to reach a terminal state.
    ///
    /// A delivery received but not yet dispatched when shutdown arrives is
    /// left unacknowledged for redelivery. Returns the number dispatched.
    pub async fn run<S, F>(self, source: &mut S, shutdown: F) -> u64
    where
        S: MessageSource + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut dispatched = 0u64;

        loop {
            let delivery = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer pulling");
                    break;
                }
                next = source.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to receive delivery");
                        continue;
                    }
                    None => {
                        info!("Ingress source closed");
                        break;
                    }
                },
            };
            self.metrics.record_received(delivery.size());

            let permit = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer pulling");
                    break;
                }
                permit = self.flow.acquire(delivery.size()) => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Err(e) = self.dispatch(delivery, permit).await {
                warn!(error = %e, "Worker pool rejected delivery");
                break;
            }
            dispatched += 1;
            debug!(
                dispatched = dispatched,
                in_flight = self.flow.in_flight_messages(),
                in_flight_bytes = self.flow.in_flight_bytes(),
                "Delivery dispatched"
            );
        }

        self.flow.close();
        info!(dispatched = dispatched, "Draining in-flight messages");
        self.pool.shutdown().await;
        dispatched
    }

    async fn dispatch(&self, delivery: Delivery, permit: FlowPermit) -> Result<(), SubmitError> {
        let pipeline = self.pipeline.clone();
        let metrics = self.metrics.clone();
        let ack_timeout = self.ack_timeout;
        let payload = delivery.payload().clone();

        match self.ack_mode {
            AckMode::OnDispatch => {
                acknowledge(delivery, ack_timeout, &metrics).await;
                self.pool
                    .submit(async move {
                        pipeline.process(&payload).await;
                        drop(permit);
                    })
                    .await
            }
            AckMode::AfterProcessing => {
                self.pool
                    .submit(async move {
                        pipeline.process(&payload).await;
                        acknowledge(delivery, ack_timeout, &metrics).await;
                        drop(permit);
                    })
                    .await
            }
        }
    }
}

/// Ack with a bounded wait; a lost ack only causes a redelivery.
async fn acknowledge(delivery: Delivery, timeout: Duration, metrics: &PipelineMetrics) {
    match tokio::time::timeout(timeout, delivery.ack()).await {
        Ok(Ok(())) => metrics.record_ack(),
        Ok(Err(e)) => warn!(error = %e, "Failed to acknowledge delivery"),
        Err(_) => warn!(
            timeout_ms = timeout.as_millis() as u64,
            "Acknowledgement timed out"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ChannelSource;
    use crate::models::{ModelCache, Scorer};
    use crate::pipeline::RetryPolicy;
    use crate::testing::{
        delivery, fraud_line, fraud_scorer, legit_line, RecordingSink, SlowModelLoader,
    };
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn dispatcher(sink: Arc<RecordingSink>, ack_mode: AckMode, workers: usize) -> Dispatcher {
        let pipeline = Arc::new(Pipeline::new(
            fraud_scorer(),
            sink,
            Arc::new(PipelineMetrics::new()),
            RetryPolicy::default(),
        ));
        Dispatcher::new(
            pipeline,
            WorkerPool::new(workers, 4),
            FlowControl::new(5, 10 * 1024 * 1024),
            ack_mode,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_scores_and_acks_every_message() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(sink.clone(), AckMode::AfterProcessing, 4);
        let metrics = dispatcher.metrics.clone();
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(16);

        for i in 0..10 {
            let line = if i % 5 == 0 {
                fraud_line(&format!("tx_{i}"))
            } else {
                legit_line(&format!("tx_{i}"))
            };
            sender.send(delivery(&line, &format!("tx_{i}"), &acks)).await.unwrap();
        }
        drop(sender);

        let dispatched = dispatcher.run(&mut source, std::future::pending()).await;

        assert_eq!(dispatched, 10);
        let mut ids = sink.published_ids();
        ids.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("tx_{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(acks.lock().unwrap().len(), 10);
        assert_eq!(metrics.fraud_predictions.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.messages_acked.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn test_after_processing_acks_once_result_is_confirmed() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(sink.clone(), AckMode::AfterProcessing, 1);
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(4);

        sender.send(delivery(&legit_line("tx_a"), "tx_a", &acks)).await.unwrap();
        drop(sender);
        dispatcher.run(&mut source, std::future::pending()).await;

        assert_eq!(sink.published_ids(), vec!["tx_a"]);
        assert_eq!(*acks.lock().unwrap(), vec!["tx_a"]);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_still_acknowledged() {
        let sink = Arc::new(RecordingSink::with_dead_letter());
        let dispatcher = dispatcher(sink.clone(), AckMode::AfterProcessing, 2);
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(4);

        sender.send(delivery("garbage", "bad", &acks)).await.unwrap();
        sender.send(delivery(&legit_line("tx_ok"), "good", &acks)).await.unwrap();
        drop(sender);
        dispatcher.run(&mut source, std::future::pending()).await;

        let mut acked = acks.lock().unwrap().clone();
        acked.sort();
        assert_eq!(acked, vec!["bad", "good"]);
        assert_eq!(sink.dead_letters.lock().unwrap()[0].payload, "garbage");
        assert_eq!(sink.published_ids(), vec!["tx_ok"]);
    }

    #[tokio::test]
    async fn test_on_dispatch_acks_before_processing() {
        let sink = Arc::new(RecordingSink {
            stall: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let dispatcher = dispatcher(sink, AckMode::OnDispatch, 1);
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(4);

        sender.send(delivery(&legit_line("tx_a"), "tx_a", &acks)).await.unwrap();

        let run = tokio::spawn(async move { dispatcher.run(&mut source, std::future::pending()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // publish is still stalled, yet the delivery is already acked
        assert_eq!(*acks.lock().unwrap(), vec!["tx_a"]);

        drop(sender);
        assert_eq!(run.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_pulling_and_drains() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(sink.clone(), AckMode::AfterProcessing, 2);
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(4);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        sender.send(delivery(&legit_line("tx_1"), "tx_1", &acks)).await.unwrap();

        let run = tokio::spawn(async move {
            dispatcher
                .run(&mut source, async {
                    let _ = stop_rx.await;
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(()).unwrap();

        assert_eq!(run.await.unwrap(), 1);
        assert_eq!(sink.published_ids(), vec!["tx_1"]);
        assert_eq!(*acks.lock().unwrap(), vec!["tx_1"]);
        // sender is still open; nothing after shutdown was pulled
        drop(sender);
    }

    #[tokio::test]
    async fn test_publish_timeout_dropped_and_acked() {
        let sink = Arc::new(RecordingSink {
            stall: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let dispatcher = dispatcher(sink.clone(), AckMode::AfterProcessing, 1);
        let metrics = dispatcher.metrics.clone();
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(4);

        sender.send(delivery(&legit_line("tx_slow"), "tx_slow", &acks)).await.unwrap();
        drop(sender);
        dispatcher.run(&mut source, std::future::pending()).await;

        assert!(sink.published_ids().is_empty());
        assert_eq!(metrics.dropped.load(Ordering::Relaxed), 1);
        // acked so the broker does not redeliver it
        assert_eq!(*acks.lock().unwrap(), vec!["tx_slow"]);
    }

    #[tokio::test]
    async fn test_unacked_budget_blocks_further_delivery() {
        let sink = Arc::new(RecordingSink {
            stall: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let pipeline = Arc::new(Pipeline::new(
            fraud_scorer(),
            sink,
            Arc::new(PipelineMetrics::new()),
            RetryPolicy::default(),
        ));
        let metrics = pipeline.metrics().clone();
        let flow = FlowControl::new(2, 1024 * 1024);
        let dispatcher = Dispatcher::new(
            pipeline,
            WorkerPool::new(4, 4),
            flow.clone(),
            AckMode::AfterProcessing,
            Duration::from_secs(1),
        );
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(8);
        for i in 0..5 {
            let id = format!("tx_{i}");
            sender.send(delivery(&legit_line(&id), &id, &acks)).await.unwrap();
        }
        drop(sender);

        let run = tokio::spawn(async move { dispatcher.run(&mut source, std::future::pending()).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(flow.in_flight_messages(), 2);
        // two admitted, one held waiting for a permit
        assert_eq!(metrics.messages_received.load(Ordering::Relaxed), 3);
        assert!(acks.lock().unwrap().is_empty());

        assert_eq!(run.await.unwrap(), 5);
        assert_eq!(acks.lock().unwrap().len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lazy_model_load_keeps_pulling() {
        let loader = Arc::new(SlowModelLoader::new(Duration::from_millis(300)));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(Pipeline::new(
            Scorer::new(Arc::new(ModelCache::new(loader.clone()))),
            sink.clone(),
            Arc::new(PipelineMetrics::new()),
            RetryPolicy::default(),
        ));
        let metrics = pipeline.metrics().clone();
        let dispatcher = Dispatcher::new(
            pipeline,
            WorkerPool::new(2, 4),
            FlowControl::new(5, 1024 * 1024),
            AckMode::AfterProcessing,
            Duration::from_secs(1),
        );
        let acks = Arc::new(Mutex::new(Vec::new()));
        let (sender, mut source) = ChannelSource::new(8);

        let run = tokio::spawn(async move { dispatcher.run(&mut source, std::future::pending()).await });
        for i in 0..4 {
            let id = format!("tx_{i}");
            sender.send(delivery(&legit_line(&id), &id, &acks)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // model still loading, yet every delivery has been pulled
        assert_eq!(metrics.messages_received.load(Ordering::Relaxed), 4);
        assert!(sink.published_ids().is_empty());

        drop(sender);
        assert_eq!(run.await.unwrap(), 4);
        assert_eq!(sink.published_ids().len(), 4);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_admission() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(Pipeline::new(
            fraud_scorer(),
            sink,
            Arc::new(PipelineMetrics::new()),
            RetryPolicy::default(),
        ));
        let flow = FlowControl::new(2, 1024);
        let dispatcher = Dispatcher::new(
            pipeline,
            WorkerPool::new(1, 1),
            flow.clone(),
            AckMode::AfterProcessing,
            Duration::from_secs(1),
        );
        let (_sender, mut source) = ChannelSource::new(1);

        dispatcher.run(&mut source, std::future::ready(())).await;

        assert!(flow.acquire(1).await.is_err());
    }
}
