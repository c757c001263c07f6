//! Pipeline orchestration.
//!
//! The orchestrator owns the task table and drives every task through
//! Build, Verify and Publish. It admits tasks whose dependencies are
//! satisfied, reacts to worker completion reports, applies the retry
//! budget with exponential backoff, grants one fix attempt after a failed
//! verification, and holds work back while the circuit breaker is open.
//! Held tasks are released again on a timer: all of them once the breaker
//! closes, a single one while it is half-open so a trial call can actually
//! happen.

mod actions;
mod integration_tests;

pub use actions::{BuildAction, PublishAction, VerifyAction};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::{CacheMetrics, ResponseCache};
use crate::config::{AdmissionThreshold, OrchestratorConfig, PipelineConfig};
use crate::errors::PipelineError;
use crate::events::{EventKind, EventSink, NoOpEventSink, PipelineEvent};
use crate::graph::DependencyGraph;
use crate::pool::{AutoScaler, StageCompletion, StageOutcome, WorkerPool};
use crate::service::{backoff_delay, GenerationService, GuardedService};
use crate::store::ResultStore;
use crate::task::{RunId, Task, TaskId, TaskSpec, TaskStage};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// How often the run loop re-checks held-back work against the breaker.
const RELEASE_TICK: Duration = Duration::from_millis(50);

/// Final accounting of one pipeline run. Every submitted task lands in
/// exactly one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// The run this summary describes.
    pub run_id: RunId,
    /// Tasks that were published successfully.
    pub deployed: Vec<TaskId>,
    /// Tasks that ran and failed.
    pub failed: Vec<TaskId>,
    /// Tasks that never ran because a dependency failed.
    pub blocked: Vec<TaskId>,
}

impl PipelineSummary {
    /// Returns true when every task deployed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    /// Total number of tasks accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.deployed.len() + self.failed.len() + self.blocked.len()
    }
}

/// Drives planner-submitted task batches through the staged pipeline.
///
/// The cache and breaker live on the orchestrator and persist across
/// [`run`](Self::run) calls; pools, scalers and the task table are
/// per-run.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    service: Arc<dyn GenerationService>,
    store: Arc<dyn ResultStore>,
    sink: Arc<dyn EventSink>,
    cache: Arc<ResponseCache>,
    breaker: Arc<CircuitBreaker>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator that emits no events.
    #[must_use]
    pub fn new(
        service: Arc<dyn GenerationService>,
        store: Arc<dyn ResultStore>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_sink(service, store, Arc::new(NoOpEventSink), config)
    }

    /// Creates an orchestrator emitting events to the given sink.
    #[must_use]
    pub fn with_sink(
        service: Arc<dyn GenerationService>,
        store: Arc<dyn ResultStore>,
        sink: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let breaker = Arc::new(CircuitBreaker::with_sink(
            config.breaker.clone(),
            sink.clone(),
        ));
        Self {
            config,
            service,
            store,
            sink,
            cache,
            breaker,
        }
    }

    /// Returns cache hit/miss counters.
    #[must_use]
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Returns the breaker's current state.
    #[must_use]
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Runs one batch of tasks to completion and returns the summary.
    ///
    /// Fails before admitting anything if the batch contains duplicate ids,
    /// unknown dependencies or a dependency cycle.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the dependency graph is invalid or the
    /// run loop loses its workers.
    pub async fn run(&self, specs: Vec<TaskSpec>) -> Result<PipelineSummary, PipelineError> {
        let run_id = RunId::new();
        let graph = DependencyGraph::build(&specs)?;
        tracing::info!(%run_id, tasks = specs.len(), "Pipeline run starting");

        let tasks: HashMap<TaskId, Task> = specs
            .into_iter()
            .map(|spec| (spec.id.clone(), Task::from_spec(spec)))
            .collect();

        let (completions_tx, mut completions_rx) = mpsc::unbounded_channel::<StageCompletion>();
        let guarded = Arc::new(GuardedService::new(
            self.service.clone(),
            self.cache.clone(),
            self.breaker.clone(),
            self.sink.clone(),
        ));

        let build_pool = Arc::new(WorkerPool::new(
            Arc::new(BuildAction::new(guarded.clone())),
            self.config.build_pool.clone(),
            completions_tx.clone(),
        ));
        let verify_pool = Arc::new(WorkerPool::new(
            Arc::new(VerifyAction::new(guarded)),
            self.config.verify_pool.clone(),
            completions_tx.clone(),
        ));
        let publish_pool = Arc::new(WorkerPool::new(
            Arc::new(PublishAction::new(self.store.clone())),
            self.config.publish_pool.clone(),
            completions_tx,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scaler = AutoScaler::new(self.config.scaler.clone());
        let scaler_handles = vec![
            scaler.spawn(build_pool.clone(), shutdown_rx.clone()),
            scaler.spawn(verify_pool.clone(), shutdown_rx.clone()),
            scaler.spawn(publish_pool.clone(), shutdown_rx),
        ];

        let mut state = RunState {
            graph,
            tasks,
            completed: HashSet::new(),
            failed: HashSet::new(),
            deferred: VecDeque::new(),
            build_pool: build_pool.clone(),
            verify_pool: verify_pool.clone(),
            publish_pool: publish_pool.clone(),
            sink: self.sink.clone(),
            store: self.store.clone(),
            breaker: self.breaker.clone(),
            config: self.config.orchestrator.clone(),
        };

        state.admit_ready().await;

        let mut tick = tokio::time::interval(RELEASE_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while state.has_active_tasks() {
            tokio::select! {
                maybe = completions_rx.recv() => {
                    let Some(completion) = maybe else {
                        return Err(PipelineError::internal("completion channel closed"));
                    };
                    state.handle_completion(completion).await;
                }
                _ = tick.tick() => {
                    state.release_deferred().await;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        for handle in scaler_handles {
            let _ = handle.await;
        }
        build_pool.shutdown().await;
        verify_pool.shutdown().await;
        publish_pool.shutdown().await;

        let summary = state.into_summary(run_id).await;
        tracing::info!(
            run_id = %summary.run_id,
            deployed = summary.deployed.len(),
            failed = summary.failed.len(),
            blocked = summary.blocked.len(),
            "Pipeline run finished"
        );
        Ok(summary)
    }
}

/// Mutable per-run state, owned by the run loop.
struct RunState {
    graph: DependencyGraph,
    tasks: HashMap<TaskId, Task>,
    /// Ids that satisfy the admission threshold for their dependents.
    completed: HashSet<TaskId>,
    failed: HashSet<TaskId>,
    /// Tasks held back because the breaker refused their stage's traffic.
    deferred: VecDeque<TaskId>,
    build_pool: Arc<WorkerPool<BuildAction>>,
    verify_pool: Arc<WorkerPool<VerifyAction>>,
    publish_pool: Arc<WorkerPool<PublishAction>>,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn ResultStore>,
    breaker: Arc<CircuitBreaker>,
    config: OrchestratorConfig,
}

impl RunState {
    fn has_active_tasks(&self) -> bool {
        self.tasks.values().any(|task| task.stage.is_active())
    }

    /// Admits every Pending task whose dependencies have all reached the
    /// admission threshold.
    async fn admit_ready(&mut self) {
        let ready = self.graph.admissible(&self.completed);
        for id in ready {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if task.stage != TaskStage::Pending {
                continue;
            }
            task.set_stage(TaskStage::Building);
            self.sink
                .emit(PipelineEvent::for_task(
                    EventKind::TaskAdmitted,
                    id.clone(),
                    TaskStage::Building,
                ))
                .await;
            self.dispatch(&id).await;
        }
    }

    /// Hands a task to its stage's pool, or holds it back when the breaker
    /// is open and the stage needs the external service.
    async fn dispatch(&mut self, id: &TaskId) {
        let Some(task) = self.tasks.get(id).cloned() else {
            return;
        };
        match task.stage {
            TaskStage::Building | TaskStage::Verifying
                if self.breaker.state() == BreakerState::Open =>
            {
                tracing::debug!(task_id = %id, stage = %task.stage, "Holding task, breaker open");
                self.deferred.push_back(id.clone());
            }
            TaskStage::Building => {
                self.sink
                    .emit(
                        PipelineEvent::for_task(
                            EventKind::BuildStarted,
                            id.clone(),
                            TaskStage::Building,
                        )
                        .with_data(serde_json::json!({
                            "attempt": task.build_attempts + 1,
                            "fix": task.fix_requested,
                        })),
                    )
                    .await;
                self.build_pool.enqueue(task);
            }
            TaskStage::Verifying => self.verify_pool.enqueue(task),
            TaskStage::Publishing => self.publish_pool.enqueue(task),
            _ => {}
        }
    }

    /// Re-dispatches held-back tasks: all of them once the breaker closes,
    /// exactly one while it is half-open so the trial call can run.
    async fn release_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        match self.breaker.state() {
            BreakerState::Open => {}
            BreakerState::HalfOpen => {
                if let Some(id) = self.deferred.pop_front() {
                    self.dispatch(&id).await;
                }
            }
            BreakerState::Closed => {
                let held: Vec<TaskId> = self.deferred.drain(..).collect();
                for id in held {
                    self.dispatch(&id).await;
                }
            }
        }
    }

    async fn handle_completion(&mut self, completion: StageCompletion) {
        let id = completion.task.id.clone();
        let Some(current_stage) = self.tasks.get(&id).map(|task| task.stage) else {
            return;
        };
        // Drop reports that no longer match the task table.
        if current_stage != completion.stage {
            tracing::warn!(
                task_id = %id,
                reported = %completion.stage,
                current = %current_stage,
                "Discarding stale completion report"
            );
            return;
        }

        match (completion.stage, completion.outcome) {
            (TaskStage::Building, StageOutcome::Completed { payload }) => {
                self.on_build_completed(&id, payload).await;
            }
            (TaskStage::Verifying, StageOutcome::Completed { payload }) => {
                self.on_verify_passed(&id, payload).await;
            }
            (TaskStage::Verifying, StageOutcome::Rejected { payload }) => {
                self.on_verify_rejected(&id, payload).await;
            }
            (TaskStage::Publishing, StageOutcome::Completed { .. }) => {
                self.on_published(&id).await;
            }
            (stage, StageOutcome::Retryable { reason }) => {
                self.on_retryable(&id, stage, &reason).await;
            }
            (stage, StageOutcome::Fatal { reason }) => {
                self.on_fatal(&id, stage, &reason).await;
            }
            (_, StageOutcome::Suspended) => {
                // No attempt consumed; hold until the breaker admits traffic.
                self.deferred.push_back(id);
            }
            (stage, outcome) => {
                tracing::warn!(task_id = %id, %stage, ?outcome, "Unexpected stage outcome");
                self.fail_task(&id).await;
            }
        }
    }

    async fn on_build_completed(&mut self, id: &TaskId, payload: serde_json::Value) {
        self.persist(id, &payload).await;
        let was_fix = {
            let Some(task) = self.tasks.get_mut(id) else {
                return;
            };
            task.last_result = Some(payload);
            task.fix_requested
        };

        let next = if was_fix {
            self.sink
                .emit(PipelineEvent::for_task(
                    EventKind::FixApplied,
                    id.clone(),
                    TaskStage::Building,
                ))
                .await;
            if self.config.reverify_after_fix {
                TaskStage::Verifying
            } else {
                TaskStage::Publishing
            }
        } else {
            TaskStage::Verifying
        };

        if let Some(task) = self.tasks.get_mut(id) {
            task.set_stage(next);
        }
        self.dispatch(id).await;
    }

    async fn on_verify_passed(&mut self, id: &TaskId, payload: serde_json::Value) {
        self.persist(id, &payload).await;
        if let Some(task) = self.tasks.get_mut(id) {
            task.last_result = Some(payload);
        }
        self.sink
            .emit(PipelineEvent::for_task(
                EventKind::VerifyPassed,
                id.clone(),
                TaskStage::Verifying,
            ))
            .await;

        if self.config.admission_threshold == AdmissionThreshold::Verified {
            self.completed.insert(id.clone());
            self.admit_ready().await;
        }
        if let Some(task) = self.tasks.get_mut(id) {
            task.set_stage(TaskStage::Publishing);
        }
        self.dispatch(id).await;
    }

    async fn on_verify_rejected(&mut self, id: &TaskId, payload: serde_json::Value) {
        self.sink
            .emit(
                PipelineEvent::for_task(EventKind::VerifyFailed, id.clone(), TaskStage::Verifying)
                    .with_data(payload.clone()),
            )
            .await;

        let already_fixed = self
            .tasks
            .get(id)
            .is_some_and(|task| task.fix_requested);
        if already_fixed {
            // The one fix attempt is spent.
            self.fail_task(id).await;
            return;
        }

        if let Some(task) = self.tasks.get_mut(id) {
            task.fix_requested = true;
            task.last_result = Some(payload);
            task.set_stage(TaskStage::Building);
        }
        self.dispatch(id).await;
    }

    async fn on_published(&mut self, id: &TaskId) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.set_stage(TaskStage::Deployed);
        }
        self.sink
            .emit(PipelineEvent::for_task(
                EventKind::Published,
                id.clone(),
                TaskStage::Deployed,
            ))
            .await;
        self.completed.insert(id.clone());
        self.admit_ready().await;
    }

    async fn on_retryable(&mut self, id: &TaskId, stage: TaskStage, reason: &str) {
        let (attempts, exhausted) = {
            let Some(task) = self.tasks.get_mut(id) else {
                return;
            };
            let attempts = task.record_attempt();
            (attempts, attempts >= self.config.retry.max_attempts)
        };
        self.emit_stage_failure(id, stage, reason, attempts, false)
            .await;

        if exhausted {
            tracing::warn!(task_id = %id, %stage, attempts, "Retry budget exhausted");
            self.fail_task(id).await;
        } else {
            self.schedule_retry(id, attempts);
        }
    }

    async fn on_fatal(&mut self, id: &TaskId, stage: TaskStage, reason: &str) {
        let attempts = self
            .tasks
            .get_mut(id)
            .map_or(0, Task::record_attempt);
        self.emit_stage_failure(id, stage, reason, attempts, true)
            .await;
        self.fail_task(id).await;
    }

    async fn emit_stage_failure(
        &self,
        id: &TaskId,
        stage: TaskStage,
        reason: &str,
        attempt: usize,
        fatal: bool,
    ) {
        let kind = match stage {
            TaskStage::Verifying => EventKind::VerifyFailed,
            _ => EventKind::BuildFailed,
        };
        self.sink
            .emit(
                PipelineEvent::for_task(kind, id.clone(), stage).with_data(serde_json::json!({
                    "reason": reason,
                    "attempt": attempt,
                    "fatal": fatal,
                })),
            )
            .await;
    }

    /// Re-enqueues the task after a backoff delay, without blocking the run
    /// loop. Held back instead if the breaker is refusing traffic.
    fn schedule_retry(&mut self, id: &TaskId, attempts: usize) {
        let Some(task) = self.tasks.get(id).cloned() else {
            return;
        };
        if task.stage != TaskStage::Publishing && self.breaker.state() == BreakerState::Open {
            self.deferred.push_back(id.clone());
            return;
        }

        let delay = backoff_delay(&self.config.retry, attempts);
        let sink = self.sink.clone();
        match task.stage {
            TaskStage::Building => {
                let pool = self.build_pool.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    sink.emit(
                        PipelineEvent::for_task(
                            EventKind::BuildStarted,
                            task.id.clone(),
                            TaskStage::Building,
                        )
                        .with_data(serde_json::json!({
                            "attempt": task.build_attempts + 1,
                            "fix": task.fix_requested,
                        })),
                    )
                    .await;
                    pool.enqueue(task);
                });
            }
            TaskStage::Verifying => {
                let pool = self.verify_pool.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    pool.enqueue(task);
                });
            }
            _ => {
                let pool = self.publish_pool.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    pool.enqueue(task);
                });
            }
        }
    }

    /// Marks the task failed and transitively blocks every Pending dependent.
    async fn fail_task(&mut self, id: &TaskId) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.set_stage(TaskStage::Failed);
        }
        self.failed.insert(id.clone());

        let blocked = self.graph.blocked_by_failure(&self.failed);
        for blocked_id in blocked {
            let Some(task) = self.tasks.get_mut(&blocked_id) else {
                continue;
            };
            if task.stage != TaskStage::Pending {
                continue;
            }
            task.set_stage(TaskStage::Blocked);
            self.sink
                .emit(
                    PipelineEvent::for_task(
                        EventKind::Blocked,
                        blocked_id.clone(),
                        TaskStage::Blocked,
                    )
                    .with_data(serde_json::json!({"failed_dependency": id.as_str()})),
                )
                .await;
        }
    }

    async fn persist(&self, id: &TaskId, payload: &serde_json::Value) {
        if let Err(err) = self.store.save_result(id, payload).await {
            tracing::warn!(task_id = %id, error = %err, "Failed to persist stage result");
        }
    }

    /// Buckets every task into the summary. Anything still Pending at this
    /// point can never run and counts as blocked.
    async fn into_summary(mut self, run_id: RunId) -> PipelineSummary {
        let stragglers: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| task.stage == TaskStage::Pending)
            .map(|task| task.id.clone())
            .collect();
        for id in stragglers {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.set_stage(TaskStage::Blocked);
            }
            self.sink
                .emit(PipelineEvent::for_task(
                    EventKind::Blocked,
                    id,
                    TaskStage::Blocked,
                ))
                .await;
        }

        let mut deployed = Vec::new();
        let mut failed = Vec::new();
        let mut blocked = Vec::new();
        for task in self.tasks.values() {
            match task.stage {
                TaskStage::Deployed => deployed.push(task.id.clone()),
                TaskStage::Failed => failed.push(task.id.clone()),
                _ => blocked.push(task.id.clone()),
            }
        }
        deployed.sort();
        failed.sort();
        blocked.sort();

        PipelineSummary {
            run_id,
            deployed,
            failed,
            blocked,
        }
    }
}

