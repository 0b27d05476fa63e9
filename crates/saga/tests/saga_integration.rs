//! Integration tests for saga orchestration.

use std::sync::Arc;
use std::time::Duration;

use common::{BackoffStrategy, RetryPolicy, SagaId, SystemClock};
use futures_util::future::join_all;
use saga::{
    CallKind, CompensationOutcome, InMemoryStepInvoker, SagaError, SagaOrchestrator, SagaStatus,
    StartSaga, StepDefinition, StepResult,
};
use serde_json::json;

struct TestHarness {
    orchestrator: SagaOrchestrator,
    invoker: InMemoryStepInvoker,
}

impl TestHarness {
    fn new() -> Self {
        let invoker = InMemoryStepInvoker::new();
        let orchestrator = SagaOrchestrator::new(Arc::new(invoker.clone()), SystemClock::shared());
        Self {
            orchestrator,
            invoker,
        }
    }

    async fn run(&self, request: StartSaga) -> saga::SagaSnapshot {
        let saga_id = self.orchestrator.start(request).unwrap();
        self.orchestrator.wait_for_terminal(saga_id).await.unwrap()
    }
}

fn step(name: &str) -> StepDefinition {
    StepDefinition::new(
        name,
        format!("svc-{name}"),
        format!("do-{name}"),
        format!("undo-{name}"),
    )
}

fn abc() -> Vec<StepDefinition> {
    vec![step("a"), step("b"), step("c")]
}

#[tokio::test]
async fn test_all_steps_succeed() {
    let h = TestHarness::new();

    let snapshot = h.run(StartSaga::new("checkout", abc())).await;

    assert_eq!(snapshot.status, SagaStatus::Completed);
    assert_eq!(snapshot.current_step_index, 2);
    assert!(snapshot.compensation_log.is_empty());
    assert!(snapshot.failed_step_index.is_none());
    assert!(snapshot.in_flight.is_none());
    assert!(
        snapshot
            .steps
            .iter()
            .all(|s| s.result.as_ref().is_some_and(StepResult::is_success))
    );

    let operations: Vec<String> = h.invoker.calls().into_iter().map(|c| c.operation).collect();
    assert_eq!(operations, vec!["do-a", "do-b", "do-c"]);
}

#[tokio::test]
async fn test_exhausted_retries_compensate_in_reverse_order() {
    let h = TestHarness::new();
    h.invoker.fail_always("svc-c", "do-c");

    let steps = vec![
        step("a"),
        step("b"),
        step("c").with_retry_policy(RetryPolicy::with_retries(
            2,
            BackoffStrategy::Fixed,
            Duration::ZERO,
        )),
    ];
    let snapshot = h.run(StartSaga::new("checkout", steps)).await;

    assert_eq!(snapshot.status, SagaStatus::Compensated);
    assert_eq!(snapshot.failed_step_index, Some(2));
    let compensated: Vec<&str> = snapshot
        .compensation_log
        .iter()
        .map(|e| e.step_name.as_str())
        .collect();
    assert_eq!(compensated, vec!["b", "a"]);
    assert!(snapshot.compensation_log.iter().all(|e| e.is_compensated()));

    assert_eq!(h.invoker.call_count("svc-c", "do-c"), 3);
    assert_eq!(h.invoker.call_count("svc-c", "undo-c"), 0);
    assert!(matches!(
        snapshot.steps[2].result,
        Some(StepResult::Failed { attempts: 3, .. })
    ));
    assert!(
        snapshot
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("after 3 attempt(s)"))
    );
}

#[tokio::test]
async fn test_first_step_failure_compensates_nothing() {
    let h = TestHarness::new();
    h.invoker.fail_always("svc-a", "do-a");

    let snapshot = h.run(StartSaga::new("checkout", abc())).await;

    assert_eq!(snapshot.status, SagaStatus::Compensated);
    assert!(snapshot.compensation_log.is_empty());
    assert_eq!(h.invoker.calls().len(), 1);
}

#[tokio::test]
async fn test_retry_then_success() {
    let h = TestHarness::new();
    h.invoker.fail_times("svc-b", "do-b", 2);

    let steps = vec![
        step("a"),
        step("b").with_retry_policy(RetryPolicy::with_retries(
            3,
            BackoffStrategy::Fixed,
            Duration::ZERO,
        )),
    ];
    let snapshot = h.run(StartSaga::new("checkout", steps)).await;

    assert_eq!(snapshot.status, SagaStatus::Completed);
    assert!(matches!(
        snapshot.steps[1].result,
        Some(StepResult::Succeeded { attempts: 3, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_backoff() {
    let h = TestHarness::new();
    h.invoker.fail_times("svc-a", "do-a", 2);

    let steps = vec![step("a").with_retry_policy(RetryPolicy::with_retries(
        2,
        BackoffStrategy::Exponential,
        Duration::from_millis(100),
    ))];
    let start = tokio::time::Instant::now();
    let snapshot = h.run(StartSaga::new("checkout", steps)).await;

    assert_eq!(snapshot.status, SagaStatus::Completed);
    // 100ms after the first failure, 200ms after the second.
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_triggers_compensation() {
    let h = TestHarness::new();
    h.invoker.delay("svc-b", "do-b", Duration::from_secs(60));

    let steps = vec![step("a"), step("b").with_timeout(Duration::from_secs(1))];
    let snapshot = h.run(StartSaga::new("checkout", steps)).await;

    assert_eq!(snapshot.status, SagaStatus::Compensated);
    assert!(snapshot.in_flight.is_none());
    assert!(
        snapshot
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("timed out"))
    );
    let compensated: Vec<&str> = snapshot
        .compensation_log
        .iter()
        .map(|e| e.step_name.as_str())
        .collect();
    assert_eq!(compensated, vec!["a"]);
}

#[tokio::test]
async fn test_failed_compensation_continues_and_ends_compensation_failed() {
    let h = TestHarness::new();
    h.invoker.fail_always("svc-c", "do-c");
    h.invoker.fail_always("svc-b", "undo-b");

    let snapshot = h.run(StartSaga::new("checkout", abc())).await;

    assert_eq!(snapshot.status, SagaStatus::CompensationFailed);
    assert_eq!(snapshot.compensation_log.len(), 2);
    assert_eq!(snapshot.compensation_log[0].step_name, "b");
    assert_eq!(snapshot.compensation_log[0].outcome, CompensationOutcome::Failed);
    assert!(snapshot.compensation_log[0].error.is_some());
    assert_eq!(snapshot.compensation_log[1].step_name, "a");
    assert_eq!(
        snapshot.compensation_log[1].outcome,
        CompensationOutcome::Compensated
    );
}

#[tokio::test]
async fn test_invalid_plan_is_rejected_synchronously() {
    let h = TestHarness::new();

    let result = h.orchestrator.start(StartSaga::new("empty", vec![]));
    assert!(matches!(result, Err(SagaError::InvalidSagaPlan(_))));

    let mut no_compensation = step("a");
    no_compensation.compensation = String::new();
    let result = h
        .orchestrator
        .start(StartSaga::new("bad", vec![no_compensation]));
    assert!(matches!(result, Err(SagaError::InvalidSagaPlan(_))));

    assert_eq!(h.orchestrator.saga_count(), 0);
}

#[tokio::test]
async fn test_step_timeout_above_ceiling_is_rejected() {
    let h = TestHarness::new();

    let huge = step("a").with_timeout(Duration::from_secs(u64::MAX));
    let result = h.orchestrator.start(StartSaga::new("huge", vec![huge]));
    assert!(matches!(result, Err(SagaError::InvalidSagaPlan(_))));
    assert_eq!(h.orchestrator.saga_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_step_timeout_still_runs_to_completion() {
    let invoker = InMemoryStepInvoker::new();
    let orchestrator = SagaOrchestrator::with_max_step_timeout(
        Arc::new(invoker.clone()),
        SystemClock::shared(),
        Duration::MAX,
    );
    invoker.delay("svc-a", "do-a", Duration::from_secs(5));

    let unbounded = step("a").with_timeout(Duration::MAX);
    let saga_id = orchestrator
        .start(StartSaga::new("unbounded", vec![unbounded, step("b")]))
        .unwrap();
    let snapshot = orchestrator.wait_for_terminal(saga_id).await.unwrap();

    assert_eq!(snapshot.status, SagaStatus::Completed);
    assert!(snapshot.in_flight.is_none());
}

#[tokio::test]
async fn test_unknown_saga_is_not_found() {
    let h = TestHarness::new();
    let missing = SagaId::new();

    assert_eq!(
        h.orchestrator.status(missing).unwrap_err(),
        SagaError::SagaNotFound(missing)
    );
    assert!(h.orchestrator.events(missing).is_err());
    assert!(h.orchestrator.wait_for_terminal(missing).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_start_returns_before_steps_finish() {
    let h = TestHarness::new();
    h.invoker.delay("svc-a", "do-a", Duration::from_secs(5));

    let saga_id = h
        .orchestrator
        .start(StartSaga::new("slow", vec![step("a")]))
        .unwrap();
    let snapshot = h.orchestrator.status(saga_id).unwrap();
    assert_eq!(snapshot.status, SagaStatus::Running);

    let snapshot = h.orchestrator.wait_for_terminal(saga_id).await.unwrap();
    assert_eq!(snapshot.status, SagaStatus::Completed);
}

#[tokio::test]
async fn test_payload_and_metadata_pass_through() {
    let h = TestHarness::new();
    h.invoker.fail_always("svc-b", "do-b");

    let payload = json!({"order_id": "ord-42", "items": [1, 2, 3]});
    let steps = vec![step("a").with_payload(payload.clone()), step("b")];
    let snapshot = h
        .run(StartSaga::new("checkout", steps).with_metadata(json!({"tenant": "acme"})))
        .await;

    assert_eq!(snapshot.metadata["tenant"], "acme");
    let calls: Vec<_> = h
        .invoker
        .calls()
        .into_iter()
        .filter(|c| c.step_name == "a")
        .collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].kind, CallKind::Action);
    assert_eq!(calls[1].kind, CallKind::Compensation);
    assert!(calls.iter().all(|c| c.payload == payload));
}

#[tokio::test]
async fn test_timeline_records_compensation_flow() {
    let h = TestHarness::new();
    h.invoker.fail_always("svc-b", "do-b");

    let saga_id = h
        .orchestrator
        .start(StartSaga::new("checkout", vec![step("a"), step("b")]))
        .unwrap();
    h.orchestrator.wait_for_terminal(saga_id).await.unwrap();

    let events = h.orchestrator.events(saga_id).unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "SagaStarted",
            "StepStarted",
            "StepCompleted",
            "StepStarted",
            "StepAttemptFailed",
            "StepFailed",
            "CompensationStarted",
            "StepStarted",
            "CompensationStepCompleted",
            "SagaCompensated",
        ]
    );
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sagas_run_independently() {
    let h = TestHarness::new();
    h.invoker.fail_always("svc-c", "do-c");

    let ids: Vec<SagaId> = (0..20)
        .map(|i| {
            let steps = if i % 2 == 0 {
                vec![step("a"), step("b")]
            } else {
                abc()
            };
            h.orchestrator
                .start(StartSaga::new(format!("saga-{i}"), steps))
                .unwrap()
        })
        .collect();

    let snapshots = join_all(ids.iter().map(|id| h.orchestrator.wait_for_terminal(*id))).await;

    for (i, snapshot) in snapshots.into_iter().enumerate() {
        let snapshot = snapshot.unwrap();
        let expected = if i % 2 == 0 {
            SagaStatus::Completed
        } else {
            SagaStatus::Compensated
        };
        assert_eq!(snapshot.status, expected, "saga-{i}");
    }
    assert_eq!(h.orchestrator.saga_count(), 20);
}
