//! Pipeline configuration.
//!
//! Every tunable lives here: retry budgets, cache sizing, breaker
//! thresholds, pool bounds and scaler timing. Structs are serde-friendly,
//! carry sensible defaults and expose `with_*` builders.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completion threshold a dependency must reach before dependents may be
/// admitted to Build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionThreshold {
    /// Dependents wait for the dependency to be fully deployed.
    #[default]
    Deployed,
    /// Dependents may start once the dependency passes Verify.
    Verified,
}

/// Retry policy for transient stage failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per task per stage (including the first).
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the computed delay in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to apply full jitter to computed delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Response cache sizing and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction kicks in.
    pub max_entries: usize,
    /// Entry time-to-live in milliseconds.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            ttl_ms: 3_600_000,
        }
    }
}

impl CacheConfig {
    /// Creates a cache config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum entry count.
    #[must_use]
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Sets the entry TTL.
    #[must_use]
    pub fn with_ttl_ms(mut self, ttl: u64) -> Self {
        self.ttl_ms = ttl;
        self
    }

    /// Returns the TTL as a [`Duration`].
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Circuit breaker thresholds and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures within the window that open the breaker.
    pub failure_threshold: usize,
    /// Sliding window length in milliseconds.
    pub window_ms: u64,
    /// Cooldown after opening before trial calls are allowed, in milliseconds.
    pub cooldown_ms: u64,
    /// Number of trial calls permitted while half-open.
    pub half_open_trials: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            cooldown_ms: 30_000,
            half_open_trials: 1,
        }
    }
}

impl BreakerConfig {
    /// Creates a breaker config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the sliding window length.
    #[must_use]
    pub fn with_window_ms(mut self, window: u64) -> Self {
        self.window_ms = window;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.cooldown_ms = cooldown;
        self
    }

    /// Sets the half-open trial budget.
    #[must_use]
    pub fn with_half_open_trials(mut self, trials: usize) -> Self {
        self.half_open_trials = trials;
        self
    }

    /// Returns the window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Returns the cooldown as a [`Duration`].
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Worker pool bounds for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum worker count the scaler may shrink to.
    pub min_workers: usize,
    /// Maximum worker count the scaler may grow to.
    pub max_workers: usize,
    /// Workers started at pool creation.
    pub initial_workers: usize,
    /// How long a worker blocks on an empty queue before re-polling,
    /// in milliseconds.
    pub dequeue_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 8,
            initial_workers: 2,
            dequeue_timeout_ms: 100,
        }
    }
}

impl PoolConfig {
    /// Creates a pool config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker bounds.
    #[must_use]
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    /// Sets the initial worker count.
    #[must_use]
    pub fn with_initial_workers(mut self, count: usize) -> Self {
        self.initial_workers = count;
        self
    }

    /// Sets the dequeue timeout.
    #[must_use]
    pub fn with_dequeue_timeout_ms(mut self, timeout: u64) -> Self {
        self.dequeue_timeout_ms = timeout;
        self
    }

    /// Returns the dequeue timeout as a [`Duration`].
    #[must_use]
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

/// Auto-scaler control loop timing and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,
    /// Scale up when queue depth exceeds this multiple of the worker count.
    pub backlog_factor: usize,
    /// Scale down after the queue has been empty this long, in milliseconds.
    pub idle_after_ms: u64,
    /// Minimum time between scaling actions, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            backlog_factor: 2,
            idle_after_ms: 5_000,
            cooldown_ms: 2_000,
        }
    }
}

impl ScalerConfig {
    /// Creates a scaler config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sampling interval.
    #[must_use]
    pub fn with_interval_ms(mut self, interval: u64) -> Self {
        self.interval_ms = interval;
        self
    }

    /// Sets the backlog factor.
    #[must_use]
    pub fn with_backlog_factor(mut self, factor: usize) -> Self {
        self.backlog_factor = factor;
        self
    }

    /// Sets the idle threshold.
    #[must_use]
    pub fn with_idle_after_ms(mut self, idle: u64) -> Self {
        self.idle_after_ms = idle;
        self
    }

    /// Sets the action cooldown.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.cooldown_ms = cooldown;
        self
    }

    /// Returns the sampling interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the idle threshold as a [`Duration`].
    #[must_use]
    pub fn idle_after(&self) -> Duration {
        Duration::from_millis(self.idle_after_ms)
    }

    /// Returns the action cooldown as a [`Duration`].
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Orchestrator policy knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// When a dependency counts as complete for admission purposes.
    pub admission_threshold: AdmissionThreshold,
    /// Whether a fixed task re-enters Verify instead of going straight to
    /// Publish. Off by default to match the documented source behavior;
    /// turning it on is the safer policy.
    pub reverify_after_fix: bool,
    /// Retry policy applied per task per stage.
    pub retry: RetryConfig,
}

impl OrchestratorConfig {
    /// Creates an orchestrator config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the admission threshold.
    #[must_use]
    pub fn with_admission_threshold(mut self, threshold: AdmissionThreshold) -> Self {
        self.admission_threshold = threshold;
        self
    }

    /// Enables or disables re-verification after the fix attempt.
    #[must_use]
    pub fn with_reverify_after_fix(mut self, reverify: bool) -> Self {
        self.reverify_after_fix = reverify;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Top-level configuration for one pipeline instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Response cache sizing.
    pub cache: CacheConfig,
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Build pool bounds.
    pub build_pool: PoolConfig,
    /// Verify pool bounds.
    pub verify_pool: PoolConfig,
    /// Publish pool bounds.
    pub publish_pool: PoolConfig,
    /// Scaler timing, shared by all three pools.
    pub scaler: ScalerConfig,
    /// Orchestrator policy.
    pub orchestrator: OrchestratorConfig,
}

impl PipelineConfig {
    /// Creates a pipeline config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache config.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the breaker config.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Applies one pool config to all three stage pools.
    #[must_use]
    pub fn with_pools(mut self, pool: PoolConfig) -> Self {
        self.build_pool = pool.clone();
        self.verify_pool = pool.clone();
        self.publish_pool = pool;
        self
    }

    /// Sets the scaler config.
    #[must_use]
    pub fn with_scaler(mut self, scaler: ScalerConfig) -> Self {
        self.scaler = scaler;
        self
    }

    /// Sets the orchestrator config.
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.cache.max_entries, 256);
        assert_eq!(config.orchestrator.retry.max_attempts, 3);
        assert_eq!(
            config.orchestrator.admission_threshold,
            AdmissionThreshold::Deployed
        );
        assert!(!config.orchestrator.reverify_after_fix);
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::new()
            .with_breaker(BreakerConfig::new().with_failure_threshold(2))
            .with_cache(CacheConfig::new().with_max_entries(8))
            .with_pools(PoolConfig::new().with_bounds(1, 4))
            .with_orchestrator(
                OrchestratorConfig::new()
                    .with_admission_threshold(AdmissionThreshold::Verified)
                    .with_reverify_after_fix(true),
            );

        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.cache.max_entries, 8);
        assert_eq!(config.verify_pool.max_workers, 4);
        assert!(config.orchestrator.reverify_after_fix);
    }

    #[test]
    fn test_duration_accessors() {
        let breaker = BreakerConfig::new().with_cooldown_ms(250);
        assert_eq!(breaker.cooldown(), Duration::from_millis(250));

        let scaler = ScalerConfig::new().with_interval_ms(50);
        assert_eq!(scaler.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.breaker.failure_threshold, config.breaker.failure_threshold);
    }
}
