//! Backoff computation for transient-failure retries.

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Computes the delay before retrying a given attempt.
///
/// Exponential in the number of consumed attempts (`base * 2^(attempt-1)`),
/// capped at the configured maximum, with optional full jitter to avoid
/// thundering-herd retries against a rate-limited service.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    let raw = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(exponent));
    let capped = raw.min(config.max_delay_ms);

    let delay = if config.jitter && capped > 0 {
        rand::thread_rng().gen_range(0..=capped)
    } else {
        capped
    };

    Duration::from_millis(delay)
}
