//! Bounded, auto-scalable worker pools.
//!
//! Each stage (Build, Verify, Publish) owns one [`WorkerPool`] pulling from
//! one queue. Stage behavior is injected through the [`StageAction`] trait,
//! so the queue/worker/reporting machinery is written once. A task is
//! exclusively owned by one worker from dequeue until its completion report
//! reaches the orchestrator; nothing re-enqueues it in between.

mod scaler;

pub use scaler::AutoScaler;

use crate::task::{Task, TaskStage};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;

/// Samples kept in the rolling latency window.
const LATENCY_WINDOW: usize = 64;

/// Result of running one stage action on one task.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// The stage action succeeded with this result payload.
    Completed {
        /// The opaque result payload.
        payload: serde_json::Value,
    },
    /// Verify ran to completion but the automated checks failed.
    Rejected {
        /// The verdict payload from the checks.
        payload: serde_json::Value,
    },
    /// A transient failure; the attempt counts and may be retried.
    Retryable {
        /// What went wrong.
        reason: String,
    },
    /// A permanent failure; the task fails without retry.
    Fatal {
        /// What went wrong.
        reason: String,
    },
    /// The circuit breaker rejected the call. No attempt was consumed; the
    /// task is held until the breaker admits traffic again.
    Suspended,
}

/// A worker's completion report to the orchestrator.
#[derive(Debug)]
pub struct StageCompletion {
    /// The task, returned unchanged by the worker.
    pub task: Task,
    /// The stage the action ran in.
    pub stage: TaskStage,
    /// What happened.
    pub outcome: StageOutcome,
    /// Wall-clock processing time.
    pub duration: Duration,
}

/// Stage-specific behavior plugged into a [`WorkerPool`].
#[async_trait]
pub trait StageAction: Send + Sync + 'static {
    /// The stage this action implements.
    fn stage(&self) -> TaskStage;

    /// Executes the stage for one task.
    async fn execute(&self, task: &Task) -> StageOutcome;
}

/// Unbounded FIFO queue feeding one pool's workers.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<Task>>,
    notify: Notify,
}

impl TaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task and wakes one waiting worker.
    pub fn push(&self, task: Task) {
        self.inner.lock().push_back(task);
        self.notify.notify_one();
    }

    /// Removes the next task, waiting up to `wait` for one to arrive.
    pub async fn pop(&self, wait: Duration) -> Option<Task> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(task) = self.inner.lock().pop_front() {
                return Some(task);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let notified = self.notify.notified();
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return self.inner.lock().pop_front();
            }
        }
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Point-in-time pool observation used by the scaler and for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Current worker count.
    pub workers: usize,
    /// Current queue depth.
    pub queue_depth: usize,
    /// Mean processing latency over the rolling window, if any samples exist.
    pub avg_latency_ms: Option<f64>,
}

struct WorkerHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A bounded set of concurrent workers executing one stage's action.
pub struct WorkerPool<A: StageAction> {
    action: Arc<A>,
    queue: Arc<TaskQueue>,
    completions: mpsc::UnboundedSender<StageCompletion>,
    config: PoolConfig,
    workers: Mutex<Vec<WorkerHandle>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    latencies: Arc<Mutex<VecDeque<Duration>>>,
    next_worker_id: AtomicUsize,
}

impl<A: StageAction> WorkerPool<A> {
    /// Creates a pool and starts its initial workers.
    #[must_use]
    pub fn new(
        action: Arc<A>,
        config: PoolConfig,
        completions: mpsc::UnboundedSender<StageCompletion>,
    ) -> Self {
        let pool = Self {
            action,
            queue: Arc::new(TaskQueue::new()),
            completions,
            config: config.clone(),
            workers: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            latencies: Arc::new(Mutex::new(VecDeque::new())),
            next_worker_id: AtomicUsize::new(0),
        };
        let initial = config
            .initial_workers
            .clamp(config.min_workers, config.max_workers);
        pool.scale_to(initial);
        pool
    }

    /// The stage this pool serves.
    #[must_use]
    pub fn stage(&self) -> TaskStage {
        self.action.stage()
    }

    /// The pool's configured bounds.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Hands a task to the pool.
    pub fn enqueue(&self, task: Task) {
        tracing::debug!(
            task_id = task.id.as_str(),
            stage = %self.stage(),
            "Enqueueing task"
        );
        self.queue.push(task);
    }

    /// Returns the current worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Returns the current queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Returns current pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let latencies = self.latencies.lock();
        let avg_latency_ms = if latencies.is_empty() {
            None
        } else {
            let total: Duration = latencies.iter().sum();
            Some(total.as_secs_f64() * 1000.0 / latencies.len() as f64)
        };
        PoolMetrics {
            workers: self.worker_count(),
            queue_depth: self.queue_depth(),
            avg_latency_ms,
        }
    }

    /// Grows or shrinks the pool toward `target`, clamped to the configured
    /// bounds. Shrinking stops workers after their current task, if any.
    pub fn scale_to(&self, target: usize) {
        let target = target.clamp(self.config.min_workers, self.config.max_workers);
        let mut workers = self.workers.lock();

        while workers.len() < target {
            workers.push(self.spawn_worker());
        }
        while workers.len() > target {
            if let Some(worker) = workers.pop() {
                worker.stop.store(true, Ordering::SeqCst);
                self.retired.lock().push(worker.handle);
            }
        }
    }

    /// Stops every worker and waits for them to drain.
    pub async fn shutdown(&self) {
        let mut handles = Vec::new();
        {
            let mut workers = self.workers.lock();
            for worker in workers.drain(..) {
                worker.stop.store(true, Ordering::SeqCst);
                handles.push(worker.handle);
            }
            handles.append(&mut self.retired.lock());
        }
        for result in futures::future::join_all(handles).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "Worker task panicked during shutdown");
            }
        }
    }

    fn spawn_worker(&self) -> WorkerHandle {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(worker_loop(
            id,
            self.action.clone(),
            self.queue.clone(),
            self.completions.clone(),
            self.latencies.clone(),
            stop.clone(),
            self.config.dequeue_timeout(),
        ));
        WorkerHandle { stop, handle }
    }
}

/// One worker's processing loop: dequeue with timeout, execute, report.
async fn worker_loop<A: StageAction>(
    worker_id: usize,
    action: Arc<A>,
    queue: Arc<TaskQueue>,
    completions: mpsc::UnboundedSender<StageCompletion>,
    latencies: Arc<Mutex<VecDeque<Duration>>>,
    stop: Arc<AtomicBool>,
    dequeue_timeout: Duration,
) {
    let stage = action.stage();
    tracing::debug!(worker_id, %stage, "Worker started");

    while !stop.load(Ordering::SeqCst) {
        let Some(task) = queue.pop(dequeue_timeout).await else {
            continue;
        };

        let started = Instant::now();
        let outcome = action.execute(&task).await;
        let duration = started.elapsed();

        {
            let mut window = latencies.lock();
            window.push_back(duration);
            while window.len() > LATENCY_WINDOW {
                window.pop_front();
            }
        }

        let completion = StageCompletion {
            task,
            stage,
            outcome,
            duration,
        };
        if completions.send(completion).is_err() {
            // Orchestrator is gone; nothing left to report to.
            break;
        }
    }

    tracing::debug!(worker_id, %stage, "Worker stopped");
}
