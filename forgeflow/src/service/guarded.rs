//! Breaker- and cache-wrapped service call path.

use super::{GenerationService, ServiceRequest, ServiceResponse};
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::ResponseCache;
use crate::errors::ServiceError;
use crate::events::{EventKind, EventSink, PipelineEvent};
use crate::task::TaskStage;
use std::sync::Arc;

/// The production call path to the external generation service.
///
/// A cache hit short-circuits everything: no breaker bookkeeping, no service
/// call of any kind. Misses go through the circuit breaker; only successful
/// responses are cached. Failed calls are never memoized, so retries reach
/// the service again.
pub struct GuardedService {
    service: Arc<dyn GenerationService>,
    cache: Arc<ResponseCache>,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn EventSink>,
}

impl GuardedService {
    /// Wires the guard around a raw service.
    #[must_use]
    pub fn new(
        service: Arc<dyn GenerationService>,
        cache: Arc<ResponseCache>,
        breaker: Arc<CircuitBreaker>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            service,
            cache,
            breaker,
            sink,
        }
    }

    /// Performs one guarded call.
    pub async fn call(&self, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
        let fingerprint = request.fingerprint();

        if let Some(value) = self.cache.get(&fingerprint) {
            tracing::debug!(
                task_id = request.task_id.as_str(),
                operation = request.operation,
                "Serving response from cache"
            );
            self.sink.try_emit(
                PipelineEvent::for_task(
                    EventKind::CacheHit,
                    request.task_id.clone(),
                    stage_of(&request.operation),
                )
                .with_data(serde_json::json!({"fingerprint": fingerprint.as_str()})),
            );
            return Ok(ServiceResponse::new(value));
        }

        let response = self
            .breaker
            .call(|| self.service.generate(request))
            .await?;

        self.cache.put(fingerprint, response.payload.clone());
        Ok(response)
    }

    /// Returns the breaker state, for admission backpressure decisions.
    #[must_use]
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

fn stage_of(operation: &str) -> TaskStage {
    match operation {
        "verify" => TaskStage::Verifying,
        _ => TaskStage::Building,
    }
}
