//! Pipeline event model and sinks.
//!
//! The orchestrator emits one [`PipelineEvent`] per task state transition to
//! the external notification channel. Delivery is fire-and-forget: sinks
//! must never fail the pipeline.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::task::{TaskId, TaskStage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of events the pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task's dependencies are satisfied and it was queued for Build.
    TaskAdmitted,
    /// A task was handed to the build pool.
    BuildStarted,
    /// A build attempt failed.
    BuildFailed,
    /// Automated checks passed.
    VerifyPassed,
    /// Automated checks failed.
    VerifyFailed,
    /// The single post-verify-failure fix attempt completed.
    FixApplied,
    /// The final publish side effect completed; the task is deployed.
    Published,
    /// A generation call was served from the response cache.
    CacheHit,
    /// The circuit breaker opened.
    BreakerOpened,
    /// The circuit breaker closed.
    BreakerClosed,
    /// A task can never run because a dependency failed.
    Blocked,
}

impl EventKind {
    /// Returns the wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskAdmitted => "task_admitted",
            Self::BuildStarted => "build_started",
            Self::BuildFailed => "build_failed",
            Self::VerifyPassed => "verify_passed",
            Self::VerifyFailed => "verify_failed",
            Self::FixApplied => "fix_applied",
            Self::Published => "published",
            Self::CacheHit => "cache_hit",
            Self::BreakerOpened => "breaker_opened",
            Self::BreakerClosed => "breaker_closed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification emitted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// What happened.
    pub kind: EventKind,
    /// The task involved, if any (breaker events are task-less).
    pub task_id: Option<TaskId>,
    /// The stage the task occupied when the event fired.
    pub stage: Option<TaskStage>,
    /// When the event fired.
    pub timestamp: DateTime<Utc>,
    /// Extra event payload.
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    /// Creates a task-less event.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            task_id: None,
            stage: None,
            timestamp: Utc::now(),
            data: None,
        }
    }

    /// Creates an event for a task at a stage.
    #[must_use]
    pub fn for_task(kind: EventKind, task_id: TaskId, stage: TaskStage) -> Self {
        Self {
            kind,
            task_id: Some(task_id),
            stage: Some(stage),
            timestamp: Utc::now(),
            data: None,
        }
    }

    /// Attaches extra payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(EventKind::TaskAdmitted.as_str(), "task_admitted");
        assert_eq!(EventKind::BreakerOpened.as_str(), "breaker_opened");
        assert_eq!(EventKind::FixApplied.as_str(), "fix_applied");
        assert_eq!(EventKind::Blocked.as_str(), "blocked");
    }

    #[test]
    fn test_event_construction() {
        let event = PipelineEvent::for_task(
            EventKind::BuildStarted,
            TaskId::new("a"),
            TaskStage::Building,
        )
        .with_data(serde_json::json!({"attempt": 1}));

        assert_eq!(event.kind, EventKind::BuildStarted);
        assert_eq!(event.task_id, Some(TaskId::new("a")));
        assert_eq!(event.stage, Some(TaskStage::Building));
        assert!(event.data.is_some());
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = PipelineEvent::new(EventKind::BreakerClosed);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "breaker_closed");
    }
}
