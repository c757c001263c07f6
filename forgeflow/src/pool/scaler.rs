//! Timer-driven auto-scaling control loop.
//!
//! One scaler loop runs per pool, independent of the workers: it samples
//! queue depth and the rolling latency window on a fixed interval, grows the
//! pool by one worker when the backlog outpaces the worker count, and
//! shrinks by one after a sustained idle period. A cooldown between actions
//! keeps the pool from oscillating.

use super::{StageAction, WorkerPool};
use crate::config::ScalerConfig;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodic scaling controller for one [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct AutoScaler {
    config: ScalerConfig,
}

impl AutoScaler {
    /// Creates a scaler with the given timing.
    #[must_use]
    pub fn new(config: ScalerConfig) -> Self {
        Self { config }
    }

    /// Spawns the control loop for a pool. The loop exits when `shutdown`
    /// flips to true.
    pub fn spawn<A: StageAction>(
        &self,
        pool: Arc<WorkerPool<A>>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let config = self.config.clone();
        tokio::spawn(run_loop(config, pool, shutdown))
    }
}

async fn run_loop<A: StageAction>(
    config: ScalerConfig,
    pool: Arc<WorkerPool<A>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stage = pool.stage();
    let mut tick = tokio::time::interval(config.interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut idle_since: Option<Instant> = None;
    let mut last_action: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        let metrics = pool.metrics();
        let now = Instant::now();

        if metrics.queue_depth == 0 {
            idle_since.get_or_insert(now);
        } else {
            idle_since = None;
        }

        let cooling = last_action
            .is_some_and(|at| now.duration_since(at) < config.cooldown());
        if cooling {
            continue;
        }

        let max = pool.config().max_workers;
        let min = pool.config().min_workers;

        if metrics.queue_depth > config.backlog_factor * metrics.workers
            && metrics.workers < max
        {
            tracing::info!(
                %stage,
                workers = metrics.workers,
                queue_depth = metrics.queue_depth,
                avg_latency_ms = ?metrics.avg_latency_ms,
                "Scaling pool up"
            );
            pool.scale_to(metrics.workers + 1);
            last_action = Some(now);
        } else if metrics.workers > min
            && idle_since.is_some_and(|since| now.duration_since(since) >= config.idle_after())
        {
            tracing::info!(
                %stage,
                workers = metrics.workers,
                "Scaling idle pool down"
            );
            pool.scale_to(metrics.workers - 1);
            last_action = Some(now);
            // Restart the idle clock so shrinking proceeds one step per
            // idle period, not one per tick.
            idle_since = Some(now);
        }
    }

    tracing::debug!(%stage, "Scaler loop stopped");
}
