//! Error types for the forgeflow pipeline.
//!
//! The taxonomy distinguishes transient service failures (retried with
//! backoff), permanent failures (fail the task immediately), breaker-open
//! rejections (no attempt consumed) and dependency cycles (fatal for the
//! whole run before any task is admitted).

use crate::task::TaskId;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The task set contains a dependency cycle; the run is rejected.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// Two task specs share the same id.
    #[error("Duplicate task id: {id}")]
    DuplicateTask {
        /// The duplicated id.
        id: TaskId,
    },

    /// A task declares a dependency on an id not present in the task set.
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The declaring task.
        task: TaskId,
        /// The missing dependency id.
        dependency: TaskId,
    },

    /// An external service call failed.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// The durable result store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The orchestrator's completion channel closed unexpectedly.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

/// Error raised when the dependency graph contains a cycle.
///
/// Names every task id participating in the cycle. Fatal for the pipeline
/// run: a cyclic task set cannot be scheduled.
#[derive(Debug, Clone, Error)]
#[error("Dependency cycle: {}", self.cycle_path())]
pub struct CycleError {
    /// The task ids forming the cycle, in traversal order.
    pub cycle: Vec<TaskId>,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle: Vec<TaskId>) -> Self {
        Self { cycle }
    }

    fn cycle_path(&self) -> String {
        self.cycle
            .iter()
            .map(TaskId::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Typed failure from the external generation/verification service path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Timeout or rate-limit; the attempt may be retried with backoff.
    #[error("Transient service error: {reason}")]
    Transient {
        /// What went wrong.
        reason: String,
    },

    /// Malformed input or validation failure; never retried.
    #[error("Permanent service error: {reason}")]
    Permanent {
        /// What went wrong.
        reason: String,
    },

    /// The circuit breaker rejected the call without touching the service.
    /// Does not consume a task attempt.
    #[error("Circuit breaker is open; call rejected")]
    BreakerOpen,
}

impl ServiceError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    /// Returns true if the error may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if the breaker rejected the call.
    #[must_use]
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, Self::BreakerOpen)
    }
}

/// Error from the external durable result store.
#[derive(Debug, Clone, Error)]
#[error("Store error: {reason}")]
pub struct StoreError {
    /// What went wrong.
    pub reason: String,
}

impl StoreError {
    /// Creates a new store error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
