//! Circuit breaker guarding the external generation service.
//!
//! One breaker instance wraps one external dependency. It never wraps
//! purely local computation. Callers go through [`CircuitBreaker::call`];
//! the state machine is mutated only by that wrapping logic.
//!
//! States:
//! - **Closed**: calls pass through. Transient failures within a sliding
//!   window count toward a threshold; any success clears the window.
//! - **Open**: calls fail fast with [`ServiceError::BreakerOpen`]. After the
//!   cooldown the breaker moves to half-open.
//! - **HalfOpen**: a bounded number of trial calls pass through. A trial
//!   success closes the breaker; a trial failure re-opens it and restarts
//!   the cooldown. Calls beyond the trial budget are rejected as if open.

use crate::config::BreakerConfig;
use crate::errors::ServiceError;
use crate::events::{EventKind, EventSink, NoOpEventSink, PipelineEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast.
    Open,
    /// A limited number of trial calls pass through.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// Times of transient failures inside the current window.
    failures: VecDeque<Instant>,
    /// When the breaker last opened.
    opened_at: Option<Instant>,
    /// Trial calls currently in flight while half-open.
    trials_in_flight: usize,
}

/// Transition observed while holding the lock; events fire after release.
enum Transition {
    Opened,
    Closed,
}

/// Fail-fast guard around the external generation service.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: BreakerConfig,
    sink: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// Creates a closed breaker that emits no transition events.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_sink(config, Arc::new(NoOpEventSink))
    }

    /// Creates a closed breaker emitting `breaker_opened`/`breaker_closed`
    /// events to the given sink.
    #[must_use]
    pub fn with_sink(config: BreakerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trials_in_flight: 0,
            }),
            config,
            sink,
        }
    }

    /// Returns the current state, promoting Open to HalfOpen when the
    /// cooldown has elapsed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner);
        inner.state
    }

    /// Executes `op` under the breaker.
    ///
    /// Returns [`ServiceError::BreakerOpen`] without invoking `op` when the
    /// breaker is open or the half-open trial budget is spent. Only
    /// transient failures count toward the failure window; permanent
    /// failures report on the input, not on service health.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.begin()?;

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_transient() {
                    self.on_failure();
                } else {
                    self.on_pass_through();
                }
                Err(err)
            }
        }
    }

    /// Admission check before the wrapped call.
    fn begin(&self) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        self.promote_if_cooled(&mut inner);

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(ServiceError::BreakerOpen),
            BreakerState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_trials {
                    inner.trials_in_flight += 1;
                    Ok(())
                } else {
                    Err(ServiceError::BreakerOpen)
                }
            }
        }
    }

    fn on_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::HalfOpen => {
                    inner.state = BreakerState::Closed;
                    inner.failures.clear();
                    inner.opened_at = None;
                    inner.trials_in_flight = 0;
                    Some(Transition::Closed)
                }
                _ => {
                    // Each success resets the window's failure count.
                    inner.failures.clear();
                    None
                }
            }
        };
        self.emit(transition);
    }

    fn on_failure(&self) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::HalfOpen => {
                    // Trial failed: back to open, cooldown restarts.
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.trials_in_flight = 0;
                    Some(Transition::Opened)
                }
                BreakerState::Closed => {
                    inner.failures.push_back(now);
                    let window = self.config.window();
                    while let Some(&oldest) = inner.failures.front() {
                        if now.duration_since(oldest) > window {
                            inner.failures.pop_front();
                        } else {
                            break;
                        }
                    }
                    if inner.failures.len() >= self.config.failure_threshold {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(now);
                        inner.failures.clear();
                        Some(Transition::Opened)
                    } else {
                        None
                    }
                }
                BreakerState::Open => None,
            }
        };
        self.emit(transition);
    }

    /// A permanent failure releases a half-open trial slot without judging
    /// service health either way.
    fn on_pass_through(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn promote_if_cooled(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.cooldown() {
                    inner.state = BreakerState::HalfOpen;
                    inner.trials_in_flight = 0;
                    tracing::debug!("Circuit breaker cooled down; allowing trial calls");
                }
            }
        }
    }

    fn emit(&self, transition: Option<Transition>) {
        match transition {
            Some(Transition::Opened) => {
                tracing::warn!("Circuit breaker opened");
                self.sink.try_emit(PipelineEvent::new(EventKind::BreakerOpened));
            }
            Some(Transition::Closed) => {
                tracing::info!("Circuit breaker closed");
                self.sink.try_emit(PipelineEvent::new(EventKind::BreakerClosed));
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> BreakerConfig {
        BreakerConfig::new()
            .with_failure_threshold(3)
            .with_window_ms(10_000)
            .with_cooldown_ms(50)
            .with_half_open_trials(1)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), ServiceError> {
        breaker
            .call(|| async { Err::<(), _>(ServiceError::transient("boom")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), ServiceError> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_starts_closed_and_passes_calls() {
        let breaker = CircuitBreaker::new(config());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn test_opens_at_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new(config());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = breaker
                .call(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ServiceError::transient("rate limited"))
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Next call is rejected without touching the service.
        let result = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(result, Err(ServiceError::BreakerOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_window() {
        let breaker = CircuitBreaker::new(config());
        assert!(fail(&breaker).await.is_err());
        assert!(fail(&breaker).await.is_err());
        assert!(succeed(&breaker).await.is_ok());
        assert!(fail(&breaker).await.is_err());
        assert!(fail(&breaker).await.is_err());
        // Still closed: the success cleared the count.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_permanent_failures_do_not_trip_breaker() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            let result = breaker
                .call(|| async { Err::<(), _>(ServiceError::permanent("bad input")) })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let sink = Arc::new(CollectingEventSink::new());
        let breaker = CircuitBreaker::with_sink(config(), sink.clone());

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert_eq!(sink.count_of(EventKind::BreakerOpened), 1);
        assert_eq!(sink.count_of(EventKind::BreakerClosed), 1);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        // Cooldown restarted: still open right away.
        let result = succeed(&breaker).await;
        assert_eq!(result, Err(ServiceError::BreakerOpen));
    }

    #[tokio::test]
    async fn test_half_open_excess_calls_rejected() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // Hold the single trial slot open, then try a second call.
        let trial = breaker.call(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        });
        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            succeed(&breaker).await
        };

        let (trial_result, second_result) = tokio::join!(trial, second);
        assert!(trial_result.is_ok());
        assert_eq!(second_result, Err(ServiceError::BreakerOpen));
    }
}
