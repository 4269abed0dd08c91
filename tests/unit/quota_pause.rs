use std::time::Duration;

use bio_batch::quota::{GateOutcome, PauseController, QuotaFeedback, QuotaMonitor};

#[test]
fn monitor_pauses_at_budget_threshold() {
    let monitor = QuotaMonitor::new(Some(10), 0.8);
    let feedback = QuotaFeedback::default();
    for _ in 0..7 {
        assert!(!monitor.update(&feedback).should_pause);
    }
    let metrics = monitor.update(&feedback);
    assert!(metrics.should_pause);
    assert_eq!(metrics.session_requests, 8);
    assert!((metrics.usage_ratio - 0.8).abs() < 1e-9);
    assert!(metrics.reason.is_some());
}

#[test]
fn partial_feedback_keeps_known_limits() {
    let monitor = QuotaMonitor::new(None, 0.8);
    monitor.update(&QuotaFeedback {
        requests_remaining: Some(50),
        requests_limit: Some(100),
        ..Default::default()
    });
    let metrics = monitor.update(&QuotaFeedback {
        requests_remaining: Some(3),
        ..Default::default()
    });
    assert!(metrics.should_pause);
    let snapshot = monitor.snapshot().unwrap();
    assert_eq!(snapshot.requests_limit, Some(100));
    assert_eq!(snapshot.requests_used, 97);
}

#[tokio::test(start_paused = true)]
async fn pause_is_idempotent() {
    let pause = PauseController::new(Duration::from_secs(3600));
    let monitor = QuotaMonitor::new(Some(1), 0.5);
    let metrics = monitor.update(&QuotaFeedback::default());

    assert!(pause.maybe_pause(&metrics));
    let first = pause.state();
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(!pause.maybe_pause(&metrics));
    assert!(!pause.maybe_pause(&metrics));

    assert_eq!(pause.state(), first);
    assert_eq!(pause.pause_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn gate_waits_for_resume_at() {
    let pause = PauseController::new(Duration::from_secs(7200));
    pause.pause("daily budget");

    let started = tokio::time::Instant::now();
    match pause.gate().await {
        GateOutcome::Resumed { waited } => assert!(waited >= Duration::from_secs(7200)),
        GateOutcome::Open => panic!("gate should have blocked"),
    }
    assert!(started.elapsed() >= Duration::from_secs(7200));
    assert!(!pause.is_paused());
    assert_eq!(pause.gate().await, GateOutcome::Open);
}
