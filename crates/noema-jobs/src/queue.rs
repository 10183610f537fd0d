//! Single-consumer job queue.
//!
//! Producers enqueue from any task; one consumer executes jobs strictly in
//! FIFO order, one at a time. A retryable failure puts the consumer to sleep
//! for `base_delay * attempt` before the same job runs again, so backoff
//! throttles the whole queue. Non-retryable failures and exhausted retries
//! drop the job.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};

use noema_core::config::QueueConfig;

use crate::error::JobError;
use crate::job::Job;

enum Message {
    Run(Job),
    Stop,
}

/// Counters since the queue was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
    discarded: AtomicU64,
}

struct Shared {
    config: QueueConfig,
    rx: tokio::sync::Mutex<UnboundedReceiver<Message>>,
    depth: AtomicUsize,
    stopping: AtomicBool,
    in_flight: Mutex<Option<AbortHandle>>,
    cancel: Notify,
    counters: Counters,
}

/// FIFO mutation queue with bounded, linearly backed-off retry.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct JobQueue {
    tx: UnboundedSender<Message>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            shared: Arc::new(Shared {
                config,
                rx: tokio::sync::Mutex::new(rx),
                depth: AtomicUsize::new(0),
                stopping: AtomicBool::new(false),
                in_flight: Mutex::new(None),
                cancel: Notify::new(),
                counters: Counters::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the consumer on the current runtime. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            tracing::warn!("Job queue consumer already running");
            return;
        }
        let shared = self.shared.clone();
        *worker = Some(tokio::spawn(async move { shared.consume().await }));
    }

    /// Run the consumer loop on the calling task until shutdown.
    pub async fn run(&self) {
        self.shared.consume().await;
    }

    /// Add a job to the tail of the queue and return the new depth.
    ///
    /// Never fails. After shutdown has begun the job is logged and dropped.
    pub fn enqueue(&self, job: Job) -> usize {
        let shared = &self.shared;
        if shared.stopping.load(Ordering::SeqCst) {
            shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(job_id = %job.id(), name = job.name(), "Queue shutting down, job discarded");
            return shared.depth.load(Ordering::SeqCst);
        }

        let (job_id, name) = (job.id(), job.name().to_string());
        let depth = shared.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(Message::Run(job)).is_err() {
            shared.depth.fetch_sub(1, Ordering::SeqCst);
            shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%job_id, %name, "Queue closed, job discarded");
            return depth - 1;
        }
        shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%job_id, %name, depth, "Job enqueued");
        depth
    }

    /// Jobs waiting to run, excluding the one in flight.
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop the consumer and return the number of queued jobs discarded.
    ///
    /// The in-flight job gets up to `shutdown_timeout` to finish; after that
    /// it is cancelled. Jobs still waiting are dropped, not run. The same
    /// bound applies whether the consumer came from [`start`](Self::start)
    /// or a caller driving [`run`](Self::run).
    pub async fn shutdown(&self) -> usize {
        let shared = &self.shared;
        shared.stopping.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Message::Stop);

        // The consumer holds the receiver for as long as it runs.
        let limit = shared.config.shutdown_timeout();
        let mut rx = match tokio::time::timeout(limit, shared.rx.lock()).await {
            Ok(rx) => rx,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = limit.as_secs_f64(),
                    "Shutdown timed out, cancelling in-flight job"
                );
                shared.cancel.notify_one();
                shared.rx.lock().await
            }
        };

        // Closing first makes any send that raced past the stopping check
        // fail in `enqueue`, which accounts for it there.
        rx.close();
        let mut discarded = 0usize;
        while let Ok(msg) = rx.try_recv() {
            if let Message::Run(job) = msg {
                shared.depth.fetch_sub(1, Ordering::SeqCst);
                tracing::debug!(job_id = %job.id(), name = job.name(), "Discarding queued job");
                discarded += 1;
            }
        }
        drop(rx);
        shared
            .counters
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);

        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            match handle.await {
                Ok(()) => tracing::debug!("Job queue consumer stopped"),
                Err(e) if e.is_panic() => tracing::error!(error = %e, "Job queue consumer panicked"),
                Err(_) => {}
            }
        }

        tracing::info!(discarded, "Job queue shut down");
        discarded
    }
}

impl Shared {
    async fn consume(&self) {
        let mut rx = self.rx.lock().await;
        tracing::info!(
            max_retries = self.config.max_retries,
            base_delay_ms = self.config.base_delay_ms,
            "Job queue consumer started"
        );

        while !self.stopping.load(Ordering::SeqCst) {
            match rx.recv().await {
                Some(Message::Run(job)) => {
                    self.depth.fetch_sub(1, Ordering::SeqCst);
                    let (job_id, name) = (job.id(), job.name().to_string());
                    tokio::select! {
                        _ = self.execute(job) => {}
                        _ = self.cancel.notified() => {
                            if let Some(attempt) = lock(&self.in_flight).take() {
                                attempt.abort();
                            }
                            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(%job_id, %name, "In-flight job cancelled by shutdown");
                            break;
                        }
                    }
                }
                Some(Message::Stop) | None => break,
            }
        }
    }

    /// Run one job to completion, retrying retryable failures in place.
    async fn execute(&self, mut job: Job) {
        let max_retries = job.max_retries.unwrap_or(self.config.max_retries);

        loop {
            match self.attempt(&job).await {
                Ok(()) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(job_id = %job.id(), name = job.name(), retries = job.retries, "Job completed");
                    return;
                }
                Err(e) if e.retryable && job.retries < max_retries => {
                    job.retries += 1;
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    let delay = self.config.base_delay() * job.retries;
                    tracing::warn!(
                        job_id = %job.id(),
                        name = job.name(),
                        attempt = job.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        job_id = %job.id(),
                        name = job.name(),
                        retries = job.retries,
                        retryable = e.retryable,
                        error = %e,
                        "Job abandoned"
                    );
                    return;
                }
            }
        }
    }

    /// One attempt, isolated in its own task so a panic surfaces as a
    /// non-retryable failure instead of killing the consumer.
    async fn attempt(&self, job: &Job) -> Result<(), JobError> {
        let handle = tokio::spawn(job.attempt());
        *lock(&self.in_flight) = Some(handle.abort_handle());
        let outcome = handle.await;
        lock(&self.in_flight).take();

        match outcome {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobError::fatal("job panicked")),
            Err(_) => Err(JobError::fatal("job cancelled")),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
