use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::format_duration;
use crate::error::ApiError;

use super::protocol::{Operation, ReplicationMetrics, ReplicationRequest};

/// Bounded capacity of the eventual-mode FIFO queue.
pub const QUEUE_CAPACITY: usize = 1000;

/// Capacity of the retry channel.
const RETRY_CAPACITY: usize = 500;

/// Workers draining the eventual queue.
const WORKER_COUNT: usize = 5;

/// Retry budget per task, beyond the initial attempt.
const MAX_ATTEMPTS: u32 = 3;

/// A retry is scheduled `attempts * RETRY_BASE_DELAY` after the failure.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Per-replica call timeout; strictly less than the strong-mode deadline.
const REPLICA_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Overall deadline for reaching quorum in strong mode.
const STRONG_MODE_DEADLINE: Duration = Duration::from_secs(10);

/// Sliding-window length for the average ack time.
const ACK_WINDOW: usize = 1000;

/// Queue depth at which health flips to degraded.
const DEGRADED_THRESHOLD: usize = QUEUE_CAPACITY * 9 / 10;

/// A queued eventual-mode replication task.
pub struct ReplicationTask {
    pub request: ReplicationRequest,
    pub attempts: u32,
    pub enqueued_at: Instant,
    pub last_attempt_at: Option<Instant>,
}

/// Outcome of one replica call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaStatus {
    Acked,
    /// Transport error or 5xx: worth retrying.
    Retryable,
    /// 4xx: the replica rejected the request; retrying cannot help.
    Rejected,
}

#[derive(Default)]
struct Metrics {
    total_replications: AtomicU64,
    successful_replicas: AtomicU64,
    failed_replicas: AtomicU64,
    permanent_failures: AtomicU64,
    retries_in_progress: AtomicI64,
    max_lag_ms: AtomicU64,
    ack_times_ms: Mutex<VecDeque<f64>>,
}

impl Metrics {
    fn record_ack_time(&self, elapsed: Duration) {
        let mut window = self
            .ack_times_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        window.push_back(elapsed.as_secs_f64() * 1000.0);
        while window.len() > ACK_WINDOW {
            window.pop_front();
        }
    }

    fn record_lag(&self, lag: Duration) {
        self.max_lag_ms
            .fetch_max(lag.as_millis() as u64, Ordering::Relaxed);
    }
}

/// The replication coordinator: owns the eventual queue, its worker pool,
/// the retry channel, and the strong-mode fan-out path.
pub struct Coordinator {
    http_client: reqwest::Client,
    queue_tx: mpsc::Sender<ReplicationTask>,
    /// Shared by the worker pool; held here so the queue outlives workers.
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ReplicationTask>>>,
    retry_tx: mpsc::Sender<ReplicationTask>,
    metrics: Metrics,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Creates the coordinator and starts its worker pool.
    pub fn start() -> Arc<Self> {
        Self::start_with_workers(WORKER_COUNT)
    }

    /// Creates the coordinator with an explicit worker count. Zero workers
    /// leaves the queue undrained, which tests use to exercise backpressure.
    pub fn start_with_workers(worker_count: usize) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<ReplicationTask>(QUEUE_CAPACITY);
        let (retry_tx, retry_rx) = mpsc::channel::<ReplicationTask>(RETRY_CAPACITY);

        let coordinator = Arc::new(Self {
            http_client: reqwest::Client::new(),
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            retry_tx,
            metrics: Metrics::default(),
            shutdown: CancellationToken::new(),
        });

        for worker_id in 0..worker_count {
            let worker = coordinator.clone();
            let rx = worker.queue_rx.clone();
            tokio::spawn(async move {
                worker.worker_loop(worker_id, rx).await;
            });
        }

        let retry_worker = coordinator.clone();
        tokio::spawn(async move {
            retry_worker.retry_loop(retry_rx).await;
        });

        tracing::info!(workers = worker_count, "replication workers started");
        coordinator
    }

    /// Signals workers to stop after their current task. Queued tasks are
    /// not drained; they are eventual by definition.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn note_request(&self) {
        self.metrics
            .total_replications
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Enqueues an eventual-mode task. A full queue fails immediately with
    /// 503 rather than blocking the caller.
    pub fn enqueue(&self, request: ReplicationRequest) -> Result<(), ApiError> {
        let task = ReplicationTask {
            request,
            attempts: 0,
            enqueued_at: Instant::now(),
            last_attempt_at: None,
        };
        self.queue_tx.try_send(task).map_err(|_| {
            ApiError::Unavailable("Replication queue is full".to_string())
        })
    }

    pub fn queue_size(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    pub fn is_degraded(&self) -> bool {
        self.queue_size() >= DEGRADED_THRESHOLD
    }

    pub fn metrics_snapshot(&self) -> ReplicationMetrics {
        let average_ack_time_ms = {
            let window = self
                .metrics
                .ack_times_ms
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if window.is_empty() {
                0.0
            } else {
                window.iter().sum::<f64>() / window.len() as f64
            }
        };

        ReplicationMetrics {
            total_replications: self.metrics.total_replications.load(Ordering::Relaxed),
            successful_replicas: self.metrics.successful_replicas.load(Ordering::Relaxed),
            failed_replicas: self.metrics.failed_replicas.load(Ordering::Relaxed),
            permanent_failures: self.metrics.permanent_failures.load(Ordering::Relaxed),
            queue_size: self.queue_size(),
            average_ack_time_ms,
            max_replication_lag_ms: self.metrics.max_lag_ms.load(Ordering::Relaxed),
            retries_in_progress: self.metrics.retries_in_progress.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Eventual mode
    // ------------------------------------------------------------------

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ReplicationTask>>>,
    ) {
        tracing::debug!(worker_id, "replication worker started");
        loop {
            let task = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    task = rx.recv() => task,
                    _ = self.shutdown.cancelled() => return,
                }
            };
            let Some(task) = task else { return };
            self.process_task(task).await;
        }
    }

    async fn retry_loop(self: Arc<Self>, mut rx: mpsc::Receiver<ReplicationTask>) {
        loop {
            let task = tokio::select! {
                task = rx.recv() => task,
                _ = self.shutdown.cancelled() => return,
            };
            let Some(task) = task else { return };

            self.metrics
                .retries_in_progress
                .fetch_sub(1, Ordering::Relaxed);
            tracing::info!(
                key = %task.request.key,
                attempt = task.attempts,
                max_attempts = MAX_ATTEMPTS,
                "retrying replication"
            );
            self.process_task(task).await;
        }
    }

    /// Runs one pass of a task: every replica in sequence, then either
    /// completion accounting or a scheduled retry. Retries target all
    /// replicas again; SET and DELETE are idempotent, so over-replication
    /// is harmless and cheaper than tracking per-replica state.
    async fn process_task(&self, mut task: ReplicationTask) {
        task.last_attempt_at = Some(Instant::now());

        let total = task.request.replica_nodes.len();
        let mut acked = 0usize;
        let mut retryable_failure = false;

        for node in task.request.replica_nodes.clone() {
            match self.replicate_to_node(&node, &task.request).await {
                ReplicaStatus::Acked => {
                    acked += 1;
                    self.metrics
                        .successful_replicas
                        .fetch_add(1, Ordering::Relaxed);
                }
                status => {
                    retryable_failure |= status == ReplicaStatus::Retryable;
                    self.metrics.failed_replicas.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.metrics.record_lag(task.enqueued_at.elapsed());

        if acked == total {
            self.metrics.record_ack_time(task.enqueued_at.elapsed());
            return;
        }

        if retryable_failure && task.attempts < MAX_ATTEMPTS {
            task.attempts += 1;
            self.schedule_retry(task);
            return;
        }

        // Out of retries but some replicas did ack: the task still carried
        // data to completion on those, so its latency counts.
        if acked > 0 {
            self.metrics.record_ack_time(task.enqueued_at.elapsed());
        }

        self.metrics
            .permanent_failures
            .fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            key = %task.request.key,
            acked,
            replicas = total,
            attempts = task.attempts,
            "replication task dropped"
        );
    }

    /// Hands the task to a timer that re-enqueues it after a delay growing
    /// with the attempt count, plus a little jitter so a burst of failures
    /// does not retry in lockstep. The timer aborts on shutdown.
    fn schedule_retry(&self, task: ReplicationTask) {
        self.metrics
            .retries_in_progress
            .fetch_add(1, Ordering::Relaxed);

        let jitter = Duration::from_millis(rand::random::<u64>() % 50);
        let delay = RETRY_BASE_DELAY * task.attempts + jitter;
        let retry_tx = self.retry_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = retry_tx.send(task).await;
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }

    // ------------------------------------------------------------------
    // Strong mode
    // ------------------------------------------------------------------

    /// Fans out to every replica concurrently and returns the acked node
    /// list as soon as a majority of `replica_nodes` has acknowledged.
    /// Remaining calls continue best-effort and only metrics observe them.
    /// The primary has already written; it is not part of the count.
    pub async fn replicate_strong(
        self: &Arc<Self>,
        request: ReplicationRequest,
    ) -> Result<Vec<String>, ApiError> {
        let started = Instant::now();
        let total = request.replica_nodes.len();
        let majority = total / 2 + 1;

        let request = Arc::new(request);
        let (tx, mut rx) = mpsc::channel::<(String, ReplicaStatus)>(total.max(1));
        let deadline_token = CancellationToken::new();

        for node in request.replica_nodes.clone() {
            let coordinator = self.clone();
            let request = request.clone();
            let token = deadline_token.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = coordinator.replicate_to_node(&node, &request) => status,
                    // Dropping the call future aborts its I/O immediately.
                    _ = token.cancelled() => ReplicaStatus::Retryable,
                };
                match status {
                    ReplicaStatus::Acked => coordinator
                        .metrics
                        .successful_replicas
                        .fetch_add(1, Ordering::Relaxed),
                    _ => coordinator
                        .metrics
                        .failed_replicas
                        .fetch_add(1, Ordering::Relaxed),
                };
                let _ = tx.send((node, status)).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(STRONG_MODE_DEADLINE);
        tokio::pin!(deadline);

        let mut acked_nodes: Vec<String> = Vec::new();
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Some((node, ReplicaStatus::Acked)) => {
                            acked_nodes.push(node);
                            if acked_nodes.len() >= majority {
                                self.metrics.record_ack_time(started.elapsed());
                                return Ok(acked_nodes);
                            }
                        }
                        Some(_) => {}
                        // Every replica responded without reaching quorum.
                        None => {
                            return Err(ApiError::Internal(format!(
                                "Failed to achieve majority: {}/{} nodes acked",
                                acked_nodes.len(),
                                majority
                            )));
                        }
                    }
                }
                _ = &mut deadline => {
                    deadline_token.cancel();
                    return Err(ApiError::Timeout(
                        "Replication timeout - majority not reached".to_string(),
                    ));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Replica wire call
    // ------------------------------------------------------------------

    async fn replicate_to_node(&self, node_url: &str, request: &ReplicationRequest) -> ReplicaStatus {
        let url = format!("{}/store/{}", node_url, request.key);

        let mut builder = match request.operation {
            Operation::Set => self
                .http_client
                .put(&url)
                .header("Content-Type", "application/octet-stream")
                .body(request.value.clone().unwrap_or_default()),
            Operation::Delete => self.http_client.delete(&url),
        };

        if let Some(ttl_ns) = request.ttl_ns {
            if ttl_ns > 0 {
                let ttl = format_duration(Duration::from_nanos(ttl_ns));
                builder = builder.query(&[("ttl", ttl)]);
            }
        }

        let response = builder
            .header("X-Replication", "true")
            .timeout(REPLICA_CALL_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => ReplicaStatus::Acked,
            Ok(response) => {
                let status = response.status();
                tracing::warn!(
                    node = %node_url,
                    key = %request.key,
                    status = %status,
                    "replica rejected write"
                );
                if status.is_client_error() {
                    ReplicaStatus::Rejected
                } else {
                    ReplicaStatus::Retryable
                }
            }
            Err(e) => {
                tracing::warn!(node = %node_url, key = %request.key, error = %e, "replica unreachable");
                ReplicaStatus::Retryable
            }
        }
    }
}
