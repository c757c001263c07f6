//! Task data model.
//!
//! A [`Task`] is one schedulable unit of generated work with declared
//! dependencies. Tasks are created from planner-supplied [`TaskSpec`]s at
//! pipeline start and mutated only by the orchestrator; while a task is in
//! flight in a stage it is exclusively owned by one worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a task within one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new task id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a fresh run id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stage a task currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    /// Not yet admitted; dependencies are outstanding.
    Pending,
    /// In the build pool (includes the post-verify fix attempt).
    Building,
    /// In the verify pool.
    Verifying,
    /// In the publish pool.
    Publishing,
    /// Terminal: published successfully.
    Deployed,
    /// Terminal: ran and failed after exhausting its retry budget.
    Failed,
    /// Terminal: never ran because a dependency failed.
    Blocked,
}

impl TaskStage {
    /// Returns the snake_case name of the stage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Verifying => "verifying",
            Self::Publishing => "publishing",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    /// Returns true for terminal stages.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Failed | Self::Blocked)
    }

    /// Returns true while a worker may be processing the task.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Building | Self::Verifying | Self::Publishing)
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Planner-supplied description of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task id.
    pub id: TaskId,
    /// Natural-language description of the work.
    pub description: String,
    /// Ids of tasks this one depends on.
    pub dependencies: Vec<TaskId>,
}

impl TaskSpec {
    /// Creates a spec with no dependencies.
    #[must_use]
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: Vec::new(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Replaces the dependency list.
    #[must_use]
    pub fn with_dependencies(mut self, ids: Vec<TaskId>) -> Self {
        self.dependencies = ids;
        self
    }
}

/// One schedulable unit of work moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: TaskId,
    /// Natural-language description of the work.
    pub description: String,
    /// Ids of tasks this one depends on.
    pub dependencies: Vec<TaskId>,
    /// Current stage.
    pub stage: TaskStage,
    /// Attempts consumed in the build stage.
    pub build_attempts: usize,
    /// Attempts consumed in the verify stage.
    pub verify_attempts: usize,
    /// Attempts consumed in the publish stage.
    pub publish_attempts: usize,
    /// Set when the single post-verify-failure fix attempt has been taken.
    pub fix_requested: bool,
    /// Last result payload produced by a stage action; opaque to the pipeline.
    pub last_result: Option<serde_json::Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last stage transition.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a pending task from a planner spec.
    #[must_use]
    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: spec.id,
            description: spec.description,
            dependencies: spec.dependencies,
            stage: TaskStage::Pending,
            build_attempts: 0,
            verify_attempts: 0,
            publish_attempts: 0,
            fix_requested: false,
            last_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the task to a new stage, bumping the transition timestamp.
    pub fn set_stage(&mut self, stage: TaskStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Records one consumed attempt for the task's current stage and returns
    /// the new attempt count for that stage.
    pub fn record_attempt(&mut self) -> usize {
        let counter = match self.stage {
            TaskStage::Building => &mut self.build_attempts,
            TaskStage::Verifying => &mut self.verify_attempts,
            _ => &mut self.publish_attempts,
        };
        *counter += 1;
        *counter
    }

    /// Returns the attempt count for the task's current stage.
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self.stage {
            TaskStage::Building => self.build_attempts,
            TaskStage::Verifying => self.verify_attempts,
            _ => self.publish_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("task-a");
        assert_eq!(id.to_string(), "task-a");
        assert_eq!(id.as_str(), "task-a");
    }

    #[test]
    fn test_stage_terminal() {
        assert!(TaskStage::Deployed.is_terminal());
        assert!(TaskStage::Failed.is_terminal());
        assert!(TaskStage::Blocked.is_terminal());
        assert!(!TaskStage::Pending.is_terminal());
        assert!(!TaskStage::Building.is_terminal());
    }

    #[test]
    fn test_stage_active() {
        assert!(TaskStage::Building.is_active());
        assert!(TaskStage::Verifying.is_active());
        assert!(TaskStage::Publishing.is_active());
        assert!(!TaskStage::Pending.is_active());
        assert!(!TaskStage::Deployed.is_active());
    }

    #[test]
    fn test_spec_builder() {
        let spec = TaskSpec::new("c", "combine outputs")
            .with_dependency("a")
            .with_dependency("b");
        assert_eq!(spec.dependencies.len(), 2);
    }

    #[test]
    fn test_task_from_spec_starts_pending() {
        let task = Task::from_spec(TaskSpec::new("a", "build a thing"));
        assert_eq!(task.stage, TaskStage::Pending);
        assert_eq!(task.build_attempts, 0);
        assert!(task.last_result.is_none());
    }

    #[test]
    fn test_record_attempt_tracks_stage() {
        let mut task = Task::from_spec(TaskSpec::new("a", "x"));
        task.set_stage(TaskStage::Building);
        assert_eq!(task.record_attempt(), 1);
        assert_eq!(task.record_attempt(), 2);
        task.set_stage(TaskStage::Verifying);
        assert_eq!(task.record_attempt(), 1);
        assert_eq!(task.build_attempts, 2);
        assert_eq!(task.verify_attempts, 1);
    }
}
