//! End-to-end pipeline runs against a scripted service double.

#[cfg(test)]
mod tests {
    use crate::config::{
        AdmissionThreshold, BreakerConfig, CacheConfig, OrchestratorConfig, PipelineConfig,
        PoolConfig, RetryConfig, ScalerConfig,
    };
    use crate::errors::PipelineError;
    use crate::events::{CollectingEventSink, EventKind, PipelineEvent};
    use crate::orchestrator::PipelineOrchestrator;
    use crate::store::{InMemoryResultStore, ResultStore};
    use crate::task::{TaskId, TaskSpec};
    use crate::testing::{ScriptedOutcome, ScriptedService};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn fast_config() -> PipelineConfig {
        PipelineConfig::new()
            .with_cache(CacheConfig::new().with_max_entries(64))
            .with_pools(
                PoolConfig::new()
                    .with_bounds(1, 4)
                    .with_initial_workers(2)
                    .with_dequeue_timeout_ms(10),
            )
            .with_scaler(ScalerConfig::new().with_interval_ms(20).with_cooldown_ms(20))
            .with_orchestrator(OrchestratorConfig::new().with_retry(
                RetryConfig::new()
                    .with_base_delay_ms(1)
                    .with_max_delay_ms(5)
                    .with_jitter(false),
            ))
    }

    struct Harness {
        orchestrator: PipelineOrchestrator,
        service: Arc<ScriptedService>,
        store: Arc<InMemoryResultStore>,
        sink: Arc<CollectingEventSink>,
    }

    fn harness(config: PipelineConfig) -> Harness {
        let service = Arc::new(ScriptedService::new());
        let store = Arc::new(InMemoryResultStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = PipelineOrchestrator::with_sink(
            service.clone(),
            store.clone(),
            sink.clone(),
            config,
        );
        Harness {
            orchestrator,
            service,
            store,
            sink,
        }
    }

    fn event_index(events: &[PipelineEvent], kind: EventKind, task_id: &str) -> usize {
        events
            .iter()
            .position(|event| {
                event.kind == kind
                    && event.task_id.as_ref().map(TaskId::as_str) == Some(task_id)
            })
            .unwrap_or_else(|| panic!("missing {kind} for {task_id}"))
    }

    #[tokio::test]
    async fn test_diamond_respects_dependency_order() {
        let h = harness(fast_config());
        let specs = vec![
            TaskSpec::new("a", "build the lexer"),
            TaskSpec::new("b", "build the parser"),
            TaskSpec::new("c", "wire lexer and parser together")
                .with_dependency("a")
                .with_dependency("b"),
        ];

        let summary = h.orchestrator.run(specs).await.unwrap();
        assert_eq!(
            summary.deployed,
            vec![TaskId::new("a"), TaskId::new("b"), TaskId::new("c")]
        );
        assert!(summary.is_success());

        let events = h.sink.events();
        let c_admitted = event_index(&events, EventKind::TaskAdmitted, "c");
        assert!(event_index(&events, EventKind::Published, "a") < c_admitted);
        assert!(event_index(&events, EventKind::Published, "b") < c_admitted);
    }

    #[tokio::test]
    async fn test_identical_work_served_from_cache_across_runs() {
        let h = harness(fast_config());
        let spec = || vec![TaskSpec::new("x", "generate the changelog")];

        let first = h.orchestrator.run(spec()).await.unwrap();
        assert!(first.is_success());
        let calls_after_first = h.service.call_count();

        let second = h.orchestrator.run(spec()).await.unwrap();
        assert!(second.is_success());

        // Build and verify both hit the cache the second time around.
        assert_eq!(h.service.call_count(), calls_after_first);
        assert!(h.orchestrator.cache_metrics().hits >= 2);
        assert!(h.sink.count_of(EventKind::CacheHit) >= 2);
    }

    #[tokio::test]
    async fn test_transient_build_failures_retry_until_success() {
        let h = harness(fast_config());
        h.service.fail_transient_times("build", 2);

        let summary = h
            .orchestrator
            .run(vec![TaskSpec::new("x", "flaky work")])
            .await
            .unwrap();

        assert_eq!(summary.deployed, vec![TaskId::new("x")]);
        assert_eq!(h.service.calls_for("build"), 3);
        assert_eq!(h.sink.count_of(EventKind::BuildFailed), 2);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_stops_traffic_to_service() {
        let config = fast_config()
            .with_breaker(
                BreakerConfig::new()
                    .with_failure_threshold(5)
                    .with_window_ms(60_000)
                    .with_cooldown_ms(100),
            )
            .with_orchestrator(OrchestratorConfig::new().with_retry(
                RetryConfig::new()
                    .with_max_attempts(6)
                    .with_base_delay_ms(1)
                    .with_max_delay_ms(5)
                    .with_jitter(false),
            ));
        let h = harness(config);
        h.service.fail_transient_times("build", 20);

        let summary = h
            .orchestrator
            .run(vec![TaskSpec::new("x", "doomed work")])
            .await
            .unwrap();

        assert_eq!(summary.failed, vec![TaskId::new("x")]);
        // Five failures open the breaker; only the half-open trial gets
        // through afterwards.
        assert_eq!(h.service.calls_for("build"), 6);
        assert!(h.sink.count_of(EventKind::BreakerOpened) >= 1);
    }

    #[tokio::test]
    async fn test_verify_failure_takes_one_fix_then_publishes() {
        let h = harness(fast_config());
        h.service.push_outcome(
            "build",
            ScriptedOutcome::Ok(serde_json::json!({"artifact": "v1"})),
        );
        h.service.push_outcome(
            "verify",
            ScriptedOutcome::Ok(serde_json::json!({"verdict": "fail", "details": "lint"})),
        );

        let summary = h
            .orchestrator
            .run(vec![TaskSpec::new("x", "needs one fix")])
            .await
            .unwrap();

        assert_eq!(summary.deployed, vec![TaskId::new("x")]);
        assert_eq!(h.sink.count_of(EventKind::VerifyFailed), 1);
        assert_eq!(h.sink.count_of(EventKind::FixApplied), 1);
        assert_eq!(h.sink.count_of(EventKind::VerifyPassed), 0);
        assert_eq!(h.service.calls_for("fix"), 1);

        // The fix output is what got published.
        let stored = h.store.load_result(&TaskId::new("x")).await.unwrap();
        assert_eq!(stored, Some(serde_json::json!({"status": "ok"})));
    }

    #[tokio::test]
    async fn test_reverify_after_fix_runs_checks_again() {
        let config = fast_config().with_orchestrator(
            OrchestratorConfig::new()
                .with_reverify_after_fix(true)
                .with_retry(RetryConfig::new().with_base_delay_ms(1).with_jitter(false)),
        );
        let h = harness(config);
        h.service.push_outcome(
            "build",
            ScriptedOutcome::Ok(serde_json::json!({"artifact": "v1"})),
        );
        h.service.push_outcome(
            "fix",
            ScriptedOutcome::Ok(serde_json::json!({"artifact": "v2"})),
        );
        h.service.push_outcome(
            "verify",
            ScriptedOutcome::Ok(serde_json::json!({"verdict": "fail"})),
        );

        let summary = h
            .orchestrator
            .run(vec![TaskSpec::new("x", "fixable work")])
            .await
            .unwrap();

        assert_eq!(summary.deployed, vec![TaskId::new("x")]);
        let events = h.sink.events();
        let failed = event_index(&events, EventKind::VerifyFailed, "x");
        let fixed = event_index(&events, EventKind::FixApplied, "x");
        let passed = event_index(&events, EventKind::VerifyPassed, "x");
        assert!(failed < fixed);
        assert!(fixed < passed);
    }

    #[tokio::test]
    async fn test_second_verify_failure_fails_the_task() {
        let config = fast_config().with_orchestrator(
            OrchestratorConfig::new()
                .with_reverify_after_fix(true)
                .with_retry(RetryConfig::new().with_base_delay_ms(1).with_jitter(false)),
        );
        let h = harness(config);
        h.service.push_outcome(
            "build",
            ScriptedOutcome::Ok(serde_json::json!({"artifact": "v1"})),
        );
        h.service.push_outcome(
            "fix",
            ScriptedOutcome::Ok(serde_json::json!({"artifact": "v2"})),
        );
        h.service.push_outcome(
            "verify",
            ScriptedOutcome::Ok(serde_json::json!({"verdict": "fail"})),
        );
        h.service.push_outcome(
            "verify",
            ScriptedOutcome::Ok(serde_json::json!({"verdict": "fail"})),
        );

        let summary = h
            .orchestrator
            .run(vec![TaskSpec::new("x", "unfixable work")])
            .await
            .unwrap();

        assert_eq!(summary.failed, vec![TaskId::new("x")]);
        assert_eq!(h.sink.count_of(EventKind::VerifyFailed), 2);
        assert_eq!(h.service.calls_for("fix"), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_blocks_dependents() {
        let h = harness(fast_config());
        h.service.fail_permanent("build");

        let summary = h
            .orchestrator
            .run(vec![
                TaskSpec::new("a", "root work"),
                TaskSpec::new("c", "middle work").with_dependency("a"),
                TaskSpec::new("b", "leaf work").with_dependency("c"),
            ])
            .await
            .unwrap();

        assert_eq!(summary.failed, vec![TaskId::new("a")]);
        assert_eq!(summary.blocked, vec![TaskId::new("b"), TaskId::new("c")]);
        // Permanent failures never retry.
        assert_eq!(h.service.calls_for("build"), 1);
        assert_eq!(h.sink.count_of(EventKind::Blocked), 2);
    }

    #[tokio::test]
    async fn test_verified_threshold_admits_before_publish() {
        let config = fast_config().with_orchestrator(
            OrchestratorConfig::new()
                .with_admission_threshold(AdmissionThreshold::Verified)
                .with_retry(RetryConfig::new().with_base_delay_ms(1).with_jitter(false)),
        );
        let h = harness(config);

        let summary = h
            .orchestrator
            .run(vec![
                TaskSpec::new("a", "upstream work"),
                TaskSpec::new("c", "downstream work").with_dependency("a"),
            ])
            .await
            .unwrap();

        assert!(summary.is_success());
        let events = h.sink.events();
        let a_verified = event_index(&events, EventKind::VerifyPassed, "a");
        let c_admitted = event_index(&events, EventKind::TaskAdmitted, "c");
        let a_published = event_index(&events, EventKind::Published, "a");
        assert!(a_verified < c_admitted);
        assert!(c_admitted < a_published);
    }

    #[tokio::test]
    async fn test_cycle_fails_before_admitting_anything() {
        let h = harness(fast_config());

        let result = h
            .orchestrator
            .run(vec![
                TaskSpec::new("a", "x").with_dependency("b"),
                TaskSpec::new("b", "y").with_dependency("a"),
            ])
            .await;

        assert!(matches!(result, Err(PipelineError::Cycle(_))));
        assert!(h.sink.events().is_empty());
        assert_eq!(h.service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_returns_empty_summary() {
        let h = harness(fast_config());
        let summary = h.orchestrator.run(Vec::new()).await.unwrap();
        assert_eq!(summary.total(), 0);
        assert!(summary.is_success());
    }
}
