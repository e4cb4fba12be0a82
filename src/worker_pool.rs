//! Fixed-size worker pool with a bounded job queue.
//!
//! Submission waits when the queue is full, so a slow pool pushes back on
//! the dispatch loop instead of buffering without limit. A job that panics
//! is logged and counted; its worker keeps going.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Unit of work run by a worker.
pub type Job = BoxFuture<'static, ()>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker pool queue is full")]
    Full,

    #[error("worker pool is shut down")]
    Closed,
}

/// Job counters shared by all workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub panicked: AtomicU64,
}

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Start `workers` worker tasks sharing a queue of `queue_capacity` jobs.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(PoolStats::default());

        let handles = (0..workers)
            .map(|id| tokio::spawn(run_worker(id, receiver.clone(), stats.clone())))
            .collect();

        info!(workers = workers, queue_capacity = queue_capacity, "Worker pool started");

        Self {
            sender,
            workers: handles,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<PoolStats> {
        &self.stats
    }

    /// Queue a job, waiting for space if the queue is full.
    pub async fn submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender
            .send(job.boxed())
            .await
            .map_err(|_| SubmitError::Closed)?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Queue a job only if there is room right now.
    pub fn try_submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender.try_send(job.boxed()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop accepting jobs, run everything already queued, and wait for
    /// the workers to exit.
    pub async fn shutdown(self) {
        let Self {
            sender,
            workers,
            stats,
        } = self;
        drop(sender);

        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }

        info!(
            completed = stats.completed.load(Ordering::Relaxed),
            panicked = stats.panicked.load(Ordering::Relaxed),
            "Worker pool drained"
        );
    }
}

async fn run_worker(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>, stats: Arc<PoolStats>) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker = id, "Queue closed, worker exiting");
            break;
        };

        if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            error!(worker = id, panic = %panic_message(&*panic), "Job panicked");
        }
        stats.completed.fetch_add(1, Ordering::Relaxed);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_runs_all_jobs_before_shutdown_returns() {
        let pool = WorkerPool::new(4, 8);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let done = done.clone();
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        let stats = pool.stats().clone();
        pool.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 50);
        assert_eq!(stats.completed.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_worker_count() {
        let pool = WorkerPool::new(3, 16);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let active = active.clone();
            let peak = peak.clone();
            pool.submit(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        pool.shutdown().await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_full_queue_applies_back_pressure() {
        let pool = WorkerPool::new(1, 1);
        let gate = Arc::new(Notify::new());

        // occupies the only worker
        let blocker = gate.clone();
        pool.submit(async move { blocker.notified().await }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // fills the queue
        pool.submit(async {}).await.unwrap();
        assert_eq!(pool.try_submit(async {}), Err(SubmitError::Full));
        assert!(timeout(Duration::from_millis(30), pool.submit(async {}))
            .await
            .is_err());

        gate.notify_one();
        assert!(timeout(Duration::from_millis(500), pool.submit(async {}))
            .await
            .is_ok());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 4);
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit(async { panic!("bad record"); }).await.unwrap();
        let after = done.clone();
        pool.submit(async move {
            after.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        let stats = pool.stats().clone();
        pool.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(stats.panicked.load(Ordering::SeqCst), 1);
        assert_eq!(stats.completed.load(Ordering::SeqCst), 2);
    }
}
