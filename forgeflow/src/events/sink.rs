//! Event sink trait and implementations.

use super::PipelineEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

use crate::events::EventKind;

/// Trait for sinks receiving pipeline notifications.
///
/// Sinks stand in for the external notification channel. Emission is
/// fire-and-forget; a sink must never propagate an error back into the
/// pipeline.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: PipelineEvent);

    /// Emits an event from a synchronous context without blocking.
    ///
    /// Errors are logged and suppressed.
    fn try_emit(&self, event: PipelineEvent);
}

/// A no-op sink that discards all events.
///
/// Used as the default when no notification channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipelineEvent) {
        // Intentionally empty - discards all events
    }

    fn try_emit(&self, _event: PipelineEvent) {
        // Intentionally empty - discards all events
    }
}

/// A sink that logs events through the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipelineEvent) {
        let task = event.task_id.as_ref().map_or("-", |id| id.as_str());
        match self.level {
            Level::DEBUG => {
                debug!(
                    event = %event.kind,
                    task_id = task,
                    stage = ?event.stage,
                    data = ?event.data,
                    "Pipeline event"
                );
            }
            _ => {
                info!(
                    event = %event.kind,
                    task_id = task,
                    stage = ?event.stage,
                    data = ?event.data,
                    "Pipeline event"
                );
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the events of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: EventKind) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns how many events of one kind were collected.
    #[must_use]
    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events.read().iter().filter(|e| e.kind == kind).count()
    }

    /// Returns the kinds in emission order.
    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.read().iter().map(|e| e.kind).collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}
