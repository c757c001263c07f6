//! Test doubles for the external service boundary.

use crate::errors::ServiceError;
use crate::service::{GenerationService, ServiceRequest, ServiceResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One scripted outcome for the double to play back.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Respond with this payload.
    Ok(serde_json::Value),
    /// Fail with a transient error.
    Transient(String),
    /// Fail with a permanent error.
    Permanent(String),
}

/// A [`GenerationService`] double that records calls and plays back scripted
/// outcomes.
///
/// Outcomes are queued per operation (`build`, `verify`, `fix`); once a
/// queue is drained, calls fall through to a default success response.
#[derive(Debug)]
pub struct ScriptedService {
    default_response: serde_json::Value,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    requests: Mutex<Vec<ServiceRequest>>,
    calls: AtomicUsize,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self {
            default_response: serde_json::json!({"status": "ok"}),
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedService {
    /// Creates a double that always succeeds with a default payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the payload returned when no script is queued.
    #[must_use]
    pub fn with_default_response(mut self, payload: serde_json::Value) -> Self {
        self.default_response = payload;
        self
    }

    /// Queues one outcome for an operation.
    pub fn push_outcome(&self, operation: &str, outcome: ScriptedOutcome) {
        self.scripts
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Queues `count` transient failures for an operation.
    pub fn fail_transient_times(&self, operation: &str, count: usize) {
        for _ in 0..count {
            self.push_outcome(operation, ScriptedOutcome::Transient("rate limited".into()));
        }
    }

    /// Queues one permanent failure for an operation.
    pub fn fail_permanent(&self, operation: &str) {
        self.push_outcome(operation, ScriptedOutcome::Permanent("invalid input".into()));
    }

    /// Returns the total number of calls that reached the double.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns how many calls carried the given operation.
    #[must_use]
    pub fn calls_for(&self, operation: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    /// Returns every recorded request in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ServiceRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(&self, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let scripted = self
            .scripts
            .lock()
            .get_mut(&request.operation)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(ScriptedOutcome::Ok(payload)) => Ok(ServiceResponse::new(payload)),
            Some(ScriptedOutcome::Transient(reason)) => Err(ServiceError::transient(reason)),
            Some(ScriptedOutcome::Permanent(reason)) => Err(ServiceError::permanent(reason)),
            None => Ok(ServiceResponse::new(self.default_response.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;

    fn request(operation: &str) -> ServiceRequest {
        ServiceRequest::new(operation, TaskId::new("t"), serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_default_success() {
        let service = ScriptedService::new();
        let response = service.generate(&request("build")).await.unwrap();
        assert_eq!(response.payload["status"], "ok");
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_default() {
        let service = ScriptedService::new();
        service.fail_transient_times("build", 2);

        assert!(service.generate(&request("build")).await.is_err());
        assert!(service.generate(&request("build")).await.is_err());
        assert!(service.generate(&request("build")).await.is_ok());
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripts_are_per_operation() {
        let service = ScriptedService::new();
        service.fail_permanent("verify");

        assert!(service.generate(&request("build")).await.is_ok());
        assert!(service.generate(&request("verify")).await.is_err());
        assert_eq!(service.calls_for("build"), 1);
        assert_eq!(service.calls_for("verify"), 1);
    }
}
