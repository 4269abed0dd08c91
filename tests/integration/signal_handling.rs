//! Interrupt handling: stop dispatch, drain, abandon after grace

use super::support::{config, item_id, items, FakeService};
use async_trait::async_trait;
use bio_batch::runner::{Orchestrator, RunConfig, RunStatus};
use bio_batch::service::ServiceFailure;
use bio_batch::shutdown::{SharedShutdown, ShutdownCoordinator};
use bio_batch::sink::{MemorySink, OutcomeSink, SinkResult};
use bio_batch::{CallOutcome, OutcomeStatus};
use std::sync::Arc;
use std::time::Duration;

fn interrupt_after(shutdown: &SharedShutdown, after: Duration) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        shutdown.request_shutdown();
    });
}

/// Records the outcome immediately, then takes `linger` to acknowledge it,
/// like a write that landed but has not returned yet.
struct LingeringSink {
    inner: MemorySink,
    linger: Duration,
}

#[async_trait]
impl OutcomeSink for LingeringSink {
    async fn append(&self, outcome: &CallOutcome) -> SinkResult<()> {
        self.inner.append(outcome).await?;
        tokio::time::sleep(self.linger).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_drains_in_flight_items() {
    let service = Arc::new(FakeService::new().with_delay(Duration::from_secs(10)));
    let sink = Arc::new(MemorySink::new());
    let shutdown = ShutdownCoordinator::shared();

    let orchestrator = Orchestrator::new(config(2), service, sink.clone())
        .unwrap()
        .with_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            shutdown.request_shutdown();
        }
    });

    let report = orchestrator.run(items(5)).await;

    assert_eq!(report.status, RunStatus::Interrupted);
    // Two finished before the interrupt, two in flight were allowed to finish.
    assert_eq!(sink.len(), 4);
    assert_eq!(report.not_attempted, 1);
    assert_eq!(report.abandoned, 0);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_backoff_is_not_persisted() {
    let service = Arc::new(FakeService::new().script(
        &item_id(0),
        vec![Err(ServiceFailure::http(429, "slow down").with_retry_after(Duration::from_secs(60)))],
    ));
    let sink = Arc::new(MemorySink::new());
    let shutdown = ShutdownCoordinator::shared();

    let orchestrator = Orchestrator::new(config(1), service, sink.clone())
        .unwrap()
        .with_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.request_shutdown();
        }
    });

    let report = orchestrator.run(items(3)).await;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert!(sink.is_empty());
    assert_eq!(report.stats.interrupted, 1);
    assert_eq!(report.not_attempted, 2);
}

#[tokio::test(start_paused = true)]
async fn test_items_abandoned_after_grace_period() {
    let service = Arc::new(FakeService::new().with_delay(Duration::from_secs(1000)));
    let sink = Arc::new(MemorySink::new());
    let shutdown = ShutdownCoordinator::shared();
    let config = RunConfig {
        concurrency: 2,
        grace_period: Duration::from_secs(5),
        ..RunConfig::default()
    };

    let orchestrator = Orchestrator::new(config, service, sink.clone())
        .unwrap()
        .with_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.request_shutdown();
        }
    });

    let started = tokio::time::Instant::now();
    let report = orchestrator.run(items(4)).await;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(report.abandoned, 2);
    assert_eq!(report.not_attempted, 2);
    assert!(sink.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1000));
}

#[tokio::test(start_paused = true)]
async fn test_second_interrupt_skips_grace_period() {
    let service = Arc::new(FakeService::new().with_delay(Duration::from_secs(1000)));
    let sink = Arc::new(MemorySink::new());
    let shutdown = ShutdownCoordinator::shared();

    let orchestrator = Orchestrator::new(config(1), service, sink)
        .unwrap()
        .with_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.request_shutdown();
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.request_shutdown();
        }
    });

    let started = tokio::time::Instant::now();
    let report = orchestrator.run(items(1)).await;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(report.abandoned, 1);
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_while_paused_does_not_hang() {
    let service = Arc::new(FakeService::new());
    let sink = Arc::new(MemorySink::new());
    let shutdown = ShutdownCoordinator::shared();
    let config = RunConfig {
        concurrency: 1,
        session_budget: Some(2),
        pause_threshold: 0.5,
        pause_duration: Duration::from_secs(72 * 3600),
        ..RunConfig::default()
    };

    let orchestrator = Orchestrator::new(config, service, sink.clone())
        .unwrap()
        .with_shutdown(shutdown.clone());
    let pause = orchestrator.pause_controller();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            while !pause.is_paused() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            shutdown.request_shutdown();
        }
    });

    let started = tokio::time::Instant::now();
    let report = orchestrator.run(items(5)).await;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(sink.len(), 1);
    assert_eq!(report.not_attempted, 4);
    assert!(started.elapsed() < Duration::from_secs(3600));
}

#[tokio::test(start_paused = true)]
async fn test_short_backoff_after_interrupt_still_persists() {
    let service = Arc::new(
        FakeService::new()
            .with_delay(Duration::from_millis(100))
            .script(&item_id(0), vec![Err(ServiceFailure::http(503, "overloaded"))]),
    );
    let sink = Arc::new(MemorySink::new());
    let shutdown = ShutdownCoordinator::shared();

    let orchestrator = Orchestrator::new(config(1), service.clone(), sink.clone())
        .unwrap()
        .with_shutdown(shutdown.clone());
    interrupt_after(&shutdown, Duration::from_millis(200));

    let report = orchestrator.run(items(3)).await;

    assert_eq!(report.status, RunStatus::Interrupted);
    let outcomes = sink.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(outcomes[0].attempt_count, 2);
    assert_eq!(report.stats.interrupted, 0);
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.not_attempted, 2);
    assert_eq!(service.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_item_cut_off_while_persisting_is_not_abandoned() {
    let sink = Arc::new(LingeringSink {
        inner: MemorySink::new(),
        linger: Duration::from_secs(1000),
    });
    let shutdown = ShutdownCoordinator::shared();
    let config = RunConfig {
        concurrency: 1,
        grace_period: Duration::from_secs(5),
        ..RunConfig::default()
    };

    let orchestrator = Orchestrator::new(config, Arc::new(FakeService::new()), sink.clone())
        .unwrap()
        .with_shutdown(shutdown.clone());
    interrupt_after(&shutdown, Duration::from_secs(1));

    let started = tokio::time::Instant::now();
    let report = orchestrator.run(items(1)).await;

    assert!(started.elapsed() < Duration::from_secs(1000));
    assert_eq!(sink.inner.len(), 1);
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.stats.interrupted, 0);
}
