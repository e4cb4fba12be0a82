//! In-process counters for the inference worker, summarised to the log.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Latency samples kept for percentile estimates.
const LATENCY_WINDOW: usize = 10_000;

/// Counters and distributions for one worker process.
pub struct PipelineMetrics {
    /// Deliveries pulled from the ingress subject
    pub messages_received: AtomicU64,
    /// Payload bytes pulled from the ingress subject
    pub bytes_received: AtomicU64,
    /// Deliveries acknowledged back to the broker
    pub messages_acked: AtomicU64,
    /// Records scored and published
    pub results_published: AtomicU64,
    /// Published results predicted as fraud
    pub fraud_predictions: AtomicU64,
    /// Extra attempts made for retryable failures
    pub retries: AtomicU64,
    /// Messages routed to the dead-letter subject
    pub dead_lettered: AtomicU64,
    /// Messages dropped after a terminal failure
    pub dropped: AtomicU64,
    failures_by_kind: RwLock<HashMap<&'static str, u64>>,
    /// Most recent per-record latencies in microseconds, oldest first
    latencies: RwLock<VecDeque<u64>>,
    /// Prediction scores in tenths: `[0.0, 0.1)`, ..., `[0.9, 1.0]`
    score_histogram: RwLock<[u64; 10]>,
    started: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_acked: AtomicU64::new(0),
            results_published: AtomicU64::new(0),
            fraud_predictions: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            latencies: RwLock::new(VecDeque::with_capacity(1024)),
            score_histogram: RwLock::new([0; 10]),
            started: Instant::now(),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one published result and how long it took end to end.
    pub fn record_result(&self, latency: Duration, prediction_score: f64, fraud: bool) {
        self.results_published.fetch_add(1, Ordering::Relaxed);
        if fraud {
            self.fraud_predictions.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut samples) = self.latencies.write() {
            if samples.len() == LATENCY_WINDOW {
                samples.pop_front();
            }
            samples.push_back(latency.as_micros() as u64);
        }

        let tenth = (prediction_score.clamp(0.0, 1.0) * 10.0) as usize;
        if let Ok(mut histogram) = self.score_histogram.write() {
            histogram[tenth.min(9)] += 1;
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a message that reached a terminal failure.
    pub fn record_failure(&self, kind: &'static str) {
        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(kind).or_insert(0) += 1;
        }
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency summary over the sample window.
    pub fn latency_stats(&self) -> LatencyStats {
        let mut samples: Vec<u64> = match self.latencies.read() {
            Ok(window) => window.iter().copied().collect(),
            Err(_) => return LatencyStats::default(),
        };
        if samples.is_empty() {
            return LatencyStats::default();
        }
        samples.sort_unstable();

        let total: u64 = samples.iter().sum();
        LatencyStats {
            count: samples.len() as u64,
            mean_us: total / samples.len() as u64,
            p50_us: percentile(&samples, 0.50),
            p95_us: percentile(&samples, 0.95),
            p99_us: percentile(&samples, 0.99),
            max_us: samples[samples.len() - 1],
        }
    }

    /// Published results per second since startup.
    pub fn throughput(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.results_published.load(Ordering::Relaxed) as f64 / elapsed
    }

    pub fn score_histogram(&self) -> [u64; 10] {
        self.score_histogram.read().map(|h| *h).unwrap_or_default()
    }

    pub fn failures_by_kind(&self) -> HashMap<&'static str, u64> {
        self.failures_by_kind
            .read()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Log a snapshot of every counter and distribution.
    pub fn print_summary(&self) {
        let published = self.results_published.load(Ordering::Relaxed);
        let fraud = self.fraud_predictions.load(Ordering::Relaxed);
        let fraud_rate = if published == 0 {
            0.0
        } else {
            fraud as f64 * 100.0 / published as f64
        };
        let latency = self.latency_stats();

        info!("═══════════════ FRAUD INFERENCE WORKER METRICS ═══════════════");
        info!(
            "Messages  received={} acked={} bytes={}",
            self.messages_received.load(Ordering::Relaxed),
            self.messages_acked.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed)
        );
        info!(
            "Results   published={} fraud={} ({:.2}%) rate={:.1}/s",
            published,
            fraud,
            fraud_rate,
            self.throughput()
        );
        info!(
            "Latency   mean={}μs p50={}μs p95={}μs p99={}μs max={}μs (n={})",
            latency.mean_us,
            latency.p50_us,
            latency.p95_us,
            latency.p99_us,
            latency.max_us,
            latency.count
        );
        info!(
            "Failures  retries={} dead_lettered={} dropped={}",
            self.retries.load(Ordering::Relaxed),
            self.dead_lettered.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed)
        );

        let mut failures: Vec<_> = self.failures_by_kind().into_iter().collect();
        failures.sort_unstable();
        for (kind, count) in failures {
            info!("  {:<8} {:>8}", kind, count);
        }

        let histogram = self.score_histogram();
        let peak = histogram.iter().copied().max().unwrap_or(0).max(1);
        info!("Score distribution");
        for (tenth, &count) in histogram.iter().enumerate() {
            let width = (count * 30 / peak) as usize;
            info!(
                "  {:.1}..{:.1} {:>8} {}",
                tenth as f64 / 10.0,
                (tenth + 1) as f64 / 10.0,
                count,
                "▇".repeat(width)
            );
        }
        info!("══════════════════════════════════════════════════════════════");
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn percentile(sorted: &[u64], q: f64) -> u64 {
    let rank = (sorted.len() as f64 * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-record latency summary in microseconds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Logs [`PipelineMetrics::print_summary`] on a fixed period.
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    period: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            period: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Run until the task is dropped.
    pub async fn start(self) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.period, self.period);
        loop {
            ticker.tick().await;
            self.metrics.print_summary();
        }
    }
}
