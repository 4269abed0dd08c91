//! End-to-end runs against a scripted service

use super::support::{config, item_id, items, FakeService};
use bio_batch::quota::{QuotaFeedback, ResetHint};
use bio_batch::runner::{Orchestrator, RunConfig, RunStatus};
use bio_batch::service::ServiceFailure;
use bio_batch::sink::MemorySink;
use bio_batch::{ErrorKind, OutcomeStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_rate_limited_item_retried_once() {
    let service = Arc::new(FakeService::new().script(
        &item_id(0),
        vec![Err(
            ServiceFailure::http(429, "Rate limit reached").with_retry_after(Duration::from_secs(2))
        )],
    ));
    let sink = Arc::new(MemorySink::new());

    let report = Orchestrator::new(config(1), service.clone(), sink.clone())
        .unwrap()
        .run(items(1))
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    let outcomes = sink.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(outcomes[0].attempt_count, 2);
    assert_eq!(report.stats.retried, 1);
    assert_eq!(service.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_fails_after_one_attempt() {
    let service = Arc::new(FakeService::new().script(
        &item_id(1),
        vec![Err(ServiceFailure::http(400, "Invalid prompt variables"))],
    ));
    let sink = Arc::new(MemorySink::new());

    let report = Orchestrator::new(config(2), service.clone(), sink.clone())
        .unwrap()
        .run(items(3))
        .await;

    assert_eq!(report.status, RunStatus::CompletedWithFailures);
    assert_eq!(report.stats.succeeded, 2);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.retried, 0);

    let failed: Vec<_> = sink
        .outcomes()
        .into_iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, item_id(1));
    assert_eq!(failed[0].attempt_count, 1);
    assert_eq!(failed[0].error_kind, Some(ErrorKind::ClientError));
    assert_eq!(service.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_server_errors_become_failed_outcome() {
    let service = Arc::new(FakeService::new().script(
        &item_id(0),
        (0..3)
            .map(|_| Err(ServiceFailure::http(503, "overloaded")))
            .collect(),
    ));
    let sink = Arc::new(MemorySink::new());

    let report = Orchestrator::new(config(1), service, sink.clone())
        .unwrap()
        .run(items(1))
        .await;

    assert_eq!(report.status, RunStatus::CompletedWithFailures);
    let outcome = &sink.outcomes()[0];
    assert_eq!(outcome.error_kind, Some(ErrorKind::ServerError));
    assert_eq!(outcome.attempt_count, 3);
    assert_eq!(report.stats.retried, 2);
}

#[tokio::test(start_paused = true)]
async fn test_budget_pause_at_eight_of_ten_then_resume() {
    let service = Arc::new(FakeService::new());
    let sink = Arc::new(MemorySink::new());
    let config = RunConfig {
        concurrency: 1,
        session_budget: Some(10),
        pause_threshold: 0.8,
        pause_duration: Duration::from_secs(3600),
        ..RunConfig::default()
    };

    let orchestrator = Orchestrator::new(config, service.clone(), sink.clone()).unwrap();
    let pause = orchestrator.pause_controller();
    let monitor = orchestrator.quota_monitor();

    let started = tokio::time::Instant::now();
    let report = orchestrator.run(items(12)).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stats.succeeded, 12);
    assert_eq!(report.pauses, 1);
    assert!(!pause.is_paused());
    assert!(report.stats.paused_duration_total >= Duration::from_secs(3600));
    assert!(started.elapsed() >= Duration::from_secs(3600));
    // The window restarted after the pause; items 9..=12 counted anew.
    assert_eq!(monitor.session_requests(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_provider_window_pause_can_be_lifted_early() {
    let service = Arc::new(FakeService::new().with_feedback(QuotaFeedback {
        requests_remaining: Some(2),
        requests_limit: Some(100),
        ..Default::default()
    }));
    let sink = Arc::new(MemorySink::new());
    let config = RunConfig {
        concurrency: 1,
        pause_duration: Duration::from_secs(24 * 3600),
        ..RunConfig::default()
    };

    let orchestrator = Orchestrator::new(config, service, sink.clone()).unwrap();
    let pause = orchestrator.pause_controller();
    let operator = tokio::spawn(async move {
        while !pause.is_paused() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        pause.resume_now("test operator");
    });

    let report = orchestrator.run(items(2)).await;
    operator.await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(sink.len(), 2);
    assert_eq!(report.pauses, 2);
    assert!(report.stats.paused_duration_total < Duration::from_secs(24 * 3600));
}

#[tokio::test(start_paused = true)]
async fn test_systemic_error_stops_dispatch() {
    let service = Arc::new(FakeService::new().script(
        &item_id(2),
        vec![Err(ServiceFailure::http(401, "Incorrect API key provided")
            .with_code("invalid_api_key"))],
    ));
    let sink = Arc::new(MemorySink::new());

    let report = Orchestrator::new(config(1), service.clone(), sink.clone())
        .unwrap()
        .run(items(10))
        .await;

    assert!(matches!(report.status, RunStatus::Systemic(_)));
    assert_eq!(report.stats.submitted, 3);
    assert_eq!(report.not_attempted, 7);
    // The systemic item itself is not persisted, so a rerun retries it.
    assert_eq!(sink.len(), 2);
    assert_eq!(service.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_count_equals_dispatched_count() {
    let service = Arc::new(
        FakeService::new()
            .with_delay(Duration::from_millis(250))
            .script(&item_id(3), vec![Err(ServiceFailure::transport("connection reset"))])
            .script(&item_id(7), vec![Err(ServiceFailure::http(422, "input too long"))]),
    );
    let sink = Arc::new(MemorySink::new());

    let report = Orchestrator::new(config(4), service, sink.clone())
        .unwrap()
        .run(items(20))
        .await;

    assert_eq!(report.stats.submitted, 20);
    assert_eq!(report.stats.completed(), 20);
    assert_eq!(sink.len(), 20);
    assert_eq!(report.stats.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_rate_limited_items_each_retried_once() {
    let rate_limited = || {
        vec![Err(
            ServiceFailure::http(429, "Rate limit reached").with_retry_after(Duration::from_secs(1))
        )]
    };
    let service = Arc::new(
        FakeService::new()
            .script(&item_id(3), rate_limited())
            .script(&item_id(7), rate_limited()),
    );
    let sink = Arc::new(MemorySink::new());

    let report = Orchestrator::new(config(4), service.clone(), sink.clone())
        .unwrap()
        .run(items(10))
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    let outcomes = sink.outcomes();
    assert_eq!(outcomes.len(), 10);
    for outcome in &outcomes {
        let expected = if outcome.id == item_id(3) || outcome.id == item_id(7) { 2 } else { 1 };
        assert_eq!(outcome.attempt_count, expected, "item {}", outcome.id);
        assert_eq!(outcome.status, OutcomeStatus::Success);
    }
    assert_eq!(report.stats.retried, 2);
    assert_eq!(service.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_systemic_error_while_paused_stops_without_waiting() {
    // Item 0 trips a one-request budget pause while item 1 is still in
    // flight; item 1 then fails with a bad key.
    let service = Arc::new(
        FakeService::new()
            .delay_for(&item_id(1), Duration::from_secs(5))
            .script(
                &item_id(1),
                vec![Err(ServiceFailure::http(401, "Incorrect API key provided")
                    .with_code("invalid_api_key"))],
            ),
    );
    let sink = Arc::new(MemorySink::new());
    let config = RunConfig {
        concurrency: 2,
        session_budget: Some(10),
        pause_threshold: 0.1,
        pause_duration: Duration::from_secs(24 * 3600),
        ..RunConfig::default()
    };

    let started = tokio::time::Instant::now();
    let report = Orchestrator::new(config, service.clone(), sink.clone())
        .unwrap()
        .run(items(10))
        .await;

    assert!(matches!(report.status, RunStatus::Systemic(_)));
    assert_eq!(report.pauses, 1);
    assert!(started.elapsed() < Duration::from_secs(60), "waited {:?}", started.elapsed());
    assert_eq!(report.stats.submitted, 2);
    assert_eq!(report.not_attempted, 8);
    assert_eq!(sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_window_pause_resumes_at_provider_reset() {
    let service = Arc::new(FakeService::new().with_feedback(QuotaFeedback {
        requests_remaining: Some(2),
        requests_limit: Some(100),
        reset_requests: Some(ResetHint::After(Duration::from_secs(30))),
        ..Default::default()
    }));
    let sink = Arc::new(MemorySink::new());
    let config = RunConfig {
        concurrency: 1,
        pause_duration: Duration::from_secs(24 * 3600),
        ..RunConfig::default()
    };

    let started = tokio::time::Instant::now();
    let report = Orchestrator::new(config, service, sink.clone())
        .unwrap()
        .run(items(2))
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(sink.len(), 2);
    assert!(report.pauses >= 1);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(started.elapsed() < Duration::from_secs(3600));
}

#[tokio::test(start_paused = true)]
async fn test_quota_monitoring_off_never_pauses() {
    let service = Arc::new(FakeService::new());
    let sink = Arc::new(MemorySink::new());
    let config = RunConfig {
        concurrency: 1,
        session_budget: Some(10),
        pause_threshold: 0.8,
        quota_monitoring: false,
        ..RunConfig::default()
    };

    let orchestrator = Orchestrator::new(config, service, sink.clone()).unwrap();
    let monitor = orchestrator.quota_monitor();
    let started = tokio::time::Instant::now();
    let report = orchestrator.run(items(12)).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.pauses, 0);
    assert_eq!(sink.len(), 12);
    assert!(started.elapsed() < Duration::from_secs(60));
    // Usage is still tracked.
    assert_eq!(monitor.session_requests(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_prompt_stops_the_run() {
    let service = Arc::new(FakeService::new().script(
        &item_id(0),
        vec![Err(ServiceFailure::http(404, "Prompt with id 'pmpt_1' not found."))],
    ));
    let sink = Arc::new(MemorySink::new());

    let report = Orchestrator::new(config(1), service, sink.clone())
        .unwrap()
        .run(items(5))
        .await;

    assert!(matches!(report.status, RunStatus::Systemic(_)));
    assert!(sink.is_empty());
    assert_eq!(report.not_attempted, 4);
}
