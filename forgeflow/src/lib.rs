//! # Forgeflow
//!
//! A dependency-aware task pipeline that drives generated work through
//! Build, Verify and Publish stages against an external generation service.
//!
//! Forgeflow provides:
//!
//! - **Dependency scheduling**: Tasks declare dependencies; admission waits
//!   until every dependency completes, and cycles are rejected up front
//! - **Staged worker pools**: One bounded, auto-scaled pool per stage
//! - **Resilient service calls**: Response caching plus a circuit breaker
//!   between the pipeline and the external service
//! - **Bounded retries**: Exponential backoff with jitter for transient
//!   failures, one fix attempt after a failed verification
//! - **Event-driven observability**: Every task transition is emitted to a
//!   pluggable sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forgeflow::prelude::*;
//!
//! let orchestrator = PipelineOrchestrator::new(service, store, PipelineConfig::default());
//!
//! let summary = orchestrator
//!     .run(vec![
//!         TaskSpec::new("lexer", "build the lexer"),
//!         TaskSpec::new("parser", "build the parser").with_dependency("lexer"),
//!     ])
//!     .await?;
//!
//! assert!(summary.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod graph;
pub mod logging;
pub mod orchestrator;
pub mod pool;
pub mod service;
pub mod store;
pub mod task;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{BreakerState, CircuitBreaker};
    pub use crate::cache::{CacheMetrics, ResponseCache};
    pub use crate::config::{
        AdmissionThreshold, BreakerConfig, CacheConfig, OrchestratorConfig, PipelineConfig,
        PoolConfig, RetryConfig, ScalerConfig,
    };
    pub use crate::errors::{CycleError, PipelineError, ServiceError, StoreError};
    pub use crate::events::{
        CollectingEventSink, EventKind, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
    };
    pub use crate::graph::DependencyGraph;
    pub use crate::orchestrator::{PipelineOrchestrator, PipelineSummary};
    pub use crate::pool::{AutoScaler, PoolMetrics, StageAction, StageOutcome, WorkerPool};
    pub use crate::service::{GenerationService, ServiceRequest, ServiceResponse};
    pub use crate::store::{InMemoryResultStore, ResultStore};
    pub use crate::task::{RunId, Task, TaskId, TaskSpec, TaskStage};
}
