//! External generation/verification service boundary.
//!
//! The pipeline talks to exactly one external service through the
//! [`GenerationService`] trait. Requests carry an opaque normalized payload;
//! responses are opaque results. Failures are typed transient or permanent
//! (see [`crate::errors::ServiceError`]). Production calls go through
//! [`GuardedService`], which layers the response cache and circuit breaker
//! over the raw trait.

mod guarded;
mod retry;

pub use guarded::GuardedService;
pub use retry::backoff_delay;

use crate::cache::Fingerprint;
use crate::errors::ServiceError;
use crate::task::TaskId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(test)]
use mockall::automock;

/// A normalized request to the external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// What the service is asked to do: `build`, `verify` or `fix`.
    pub operation: String,
    /// The task this request belongs to.
    pub task_id: TaskId,
    /// Normalized request content. Must not contain volatile fields such as
    /// timestamps or attempt counters; the fingerprint is derived from it.
    pub payload: serde_json::Value,
}

impl ServiceRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        task_id: TaskId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            operation: operation.into(),
            task_id,
            payload,
        }
    }

    /// Computes the cache fingerprint for this request.
    ///
    /// The digest covers the operation and the normalized payload only. The
    /// task id is identity, not content: two tasks asking for the same work
    /// share a fingerprint and therefore a cached response.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let normalized = serde_json::json!({
            "operation": self.operation,
            "payload": self.payload,
        });
        let canonical = normalized.to_string();

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Fingerprint::new(hex::encode(digest))
    }
}

/// An opaque result from the external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Opaque result payload, owned by the external collaborator.
    pub payload: serde_json::Value,
}

impl ServiceResponse {
    /// Wraps a payload.
    #[must_use]
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }
}

/// The external generation/verification service.
///
/// Invoked only through the breaker and cache (see [`GuardedService`]); the
/// raw trait exists so tests and alternative transports can plug in.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Performs one generation or verification call.
    async fn generate(&self, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError>;
}
