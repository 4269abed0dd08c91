//! Orchestrator
//!
//! Owns one run: builds the quota monitor, pause controller, executor and
//! scheduler from a validated [`RunConfig`], runs the items, and turns the
//! result into a [`RunReport`].

use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::config::RunConfig;
use super::executor::CallExecutor;
use super::progress::{format_summary, ProgressReporter};
use super::scheduler::{Scheduler, StopReason};
use super::stats::{RunStats, StatsCounters};
use super::RunError;
use crate::quota::{PauseController, QuotaMonitor, QuotaState};
use crate::service::CompletionService;
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::sink::OutcomeSink;
use crate::WorkItem;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every item was processed and succeeded
    Completed,
    /// Every item was processed, some failed
    CompletedWithFailures,
    /// Stopped by an interrupt
    Interrupted,
    /// Stopped by a systemic service failure
    Systemic(String),
    /// Stopped because an outcome could not be persisted
    SinkFailure(String),
}

impl RunStatus {
    /// Whether every item was processed.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithFailures)
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// How the run ended
    pub status: RunStatus,
    /// Final counters
    pub stats: RunStats,
    /// Items never dispatched
    pub not_attempted: u64,
    /// In-flight items abandoned after the grace period
    pub abandoned: u64,
    /// Quota pauses entered
    pub pauses: u64,
    /// Wall time of the run
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Wires the engine together and runs a batch.
pub struct Orchestrator {
    config: RunConfig,
    service: Arc<dyn CompletionService>,
    sink: Arc<dyn OutcomeSink>,
    monitor: Arc<QuotaMonitor>,
    pause: Arc<PauseController>,
    shutdown: SharedShutdown,
    total_expected: Option<u64>,
    progress_bar: Option<ProgressBar>,
}

impl Orchestrator {
    /// Validate `config` and build an orchestrator.
    ///
    /// If `config.quota_state_path` points at a saved state it is restored.
    pub fn new(
        config: RunConfig,
        service: Arc<dyn CompletionService>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<Self, RunError> {
        config.validate()?;

        let monitor = Arc::new(QuotaMonitor::new(
            config.session_budget,
            config.pause_threshold,
        ));
        if let Some(path) = &config.quota_state_path {
            if let Some(state) = QuotaState::load(path)? {
                monitor.restore(state);
            }
        }
        let pause = Arc::new(PauseController::new(config.pause_duration));

        Ok(Self {
            config,
            service,
            sink,
            monitor,
            pause,
            shutdown: ShutdownCoordinator::shared(),
            total_expected: None,
            progress_bar: None,
        })
    }

    /// Use an externally owned shutdown coordinator.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Number of items the run is expected to process, for progress output.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total_expected = Some(total);
        self
    }

    /// Drive an interactive progress bar.
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Pause controller of this run, for operator overrides.
    pub fn pause_controller(&self) -> Arc<PauseController> {
        self.pause.clone()
    }

    /// Quota monitor of this run.
    pub fn quota_monitor(&self) -> Arc<QuotaMonitor> {
        self.monitor.clone()
    }

    /// Shutdown coordinator of this run.
    pub fn shutdown(&self) -> SharedShutdown {
        self.shutdown.clone()
    }

    /// Process `items` and return the report.
    ///
    /// Returns after every dispatched item has been persisted, or after the
    /// interrupt grace period has elapsed.
    pub async fn run<I>(&self, items: I) -> RunReport
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let stats = Arc::new(StatsCounters::new());
        let mut reporter = ProgressReporter::new(self.total_expected, self.config.log_interval);
        if let Some(bar) = &self.progress_bar {
            reporter = reporter.with_bar(bar.clone());
        }
        let progress = Arc::new(reporter);

        let executor = Arc::new(
            CallExecutor::new(
                self.service.clone(),
                self.monitor.clone(),
                self.config.retry_caps,
                self.shutdown.clone(),
                stats.clone(),
            )
            .with_grace_period(self.config.grace_period),
        );
        let scheduler = Scheduler::new(
            executor,
            self.sink.clone(),
            self.monitor.clone(),
            self.pause.clone(),
            self.shutdown.clone(),
            stats.clone(),
            progress.clone(),
            self.config.concurrency,
            self.config.grace_period,
        )
        .with_quota_pausing(self.config.quota_monitoring);

        info!(
            concurrency = self.config.concurrency,
            session_budget = ?self.config.session_budget,
            pause_threshold = self.config.pause_threshold,
            quota_monitoring = self.config.quota_monitoring,
            total = ?self.total_expected,
            "Run started"
        );

        let schedule = scheduler.run(items).await;
        progress.finish();
        self.persist_quota_state().await;

        let stats = stats.snapshot(self.pause.total_paused());
        let status = match schedule.stop {
            // Everything was dispatched but an interrupt cut some items short.
            StopReason::Exhausted if stats.interrupted > 0 => RunStatus::Interrupted,
            StopReason::Exhausted if stats.failed == 0 => RunStatus::Completed,
            StopReason::Exhausted => RunStatus::CompletedWithFailures,
            StopReason::Interrupted => RunStatus::Interrupted,
            StopReason::Systemic(detail) => RunStatus::Systemic(detail),
            StopReason::SinkFailure(detail) => RunStatus::SinkFailure(detail),
        };
        let report = RunReport {
            status,
            stats,
            not_attempted: schedule.not_attempted,
            abandoned: schedule.abandoned,
            pauses: self.pause.pause_count(),
            elapsed: progress.elapsed(),
        };

        info!(
            "{}",
            format_summary(&report.stats, report.not_attempted, report.elapsed)
        );
        match &report.status {
            RunStatus::Completed | RunStatus::CompletedWithFailures => {
                info!(status = ?report.status, "Run finished")
            }
            RunStatus::Interrupted => warn!(
                not_attempted = report.not_attempted,
                "Run interrupted, rerun with --resume to continue"
            ),
            RunStatus::Systemic(detail) | RunStatus::SinkFailure(detail) => error!(
                detail = %detail,
                not_attempted = report.not_attempted,
                "Run aborted"
            ),
        }
        report
    }

    async fn persist_quota_state(&self) {
        let Some(path) = self.config.quota_state_path.clone() else {
            return;
        };
        let state = self.monitor.export_state();
        let saved = tokio::task::spawn_blocking(move || state.save(&path)).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to save quota state"),
            Err(e) => warn!(error = %e, "Quota state save task failed"),
        }
    }
}
