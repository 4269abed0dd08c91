//! Scheduler / worker pool
//!
//! Pulls items lazily in input order and keeps at most `concurrency` of them
//! in flight, one tokio task per item, bounded by a semaphore. Before every
//! dispatch the pause gate is consulted; a pause parks the dispatch loop while
//! in-flight items carry on. A fatal worker failure or an interrupt wakes the
//! parked loop. Each worker hands its outcome to the sink, then reports quota
//! pressure before releasing its permit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use super::executor::{CallError, CallExecutor};
use super::progress::ProgressReporter;
use super::stats::StatsCounters;
use crate::metrics;
use crate::quota::{GateOutcome, PauseController, QuotaMonitor};
use crate::shutdown::SharedShutdown;
use crate::sink::OutcomeSink;
use crate::WorkItem;

/// Why dispatching stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every item was dispatched
    Exhausted,
    /// An interrupt stopped dispatch
    Interrupted,
    /// A systemic service failure stopped dispatch
    Systemic(String),
    /// An outcome could not be persisted
    SinkFailure(String),
}

/// What the dispatch loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Why dispatch stopped
    pub stop: StopReason,
    /// Items never dispatched
    pub not_attempted: u64,
    /// In-flight items abandoned after the grace period
    pub abandoned: u64,
}

/// First fatal condition reported by a worker.
#[derive(Debug, Default)]
struct Halt {
    reason: Mutex<Option<StopReason>>,
    notify: Notify,
}

impl Halt {
    fn set(&self, reason: StopReason) {
        let mut slot = self.reason.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.notify.notify_waiters();
    }

    fn get(&self) -> Option<StopReason> {
        self.reason.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Wait until a worker halts the run.
    async fn wait(&self) -> StopReason {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(reason) = self.get() {
                return reason;
            }
            notified.await;
        }
    }
}

/// Counts a worker as abandoned if its task is dropped before the outcome
/// was handed to the sink.
struct InFlight {
    stats: Arc<StatsCounters>,
    abandoned: Arc<AtomicU64>,
    armed: bool,
}

impl InFlight {
    fn settle(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.fetch_add(1, Ordering::Relaxed);
            self.stats.record_interrupted();
        }
    }
}

/// Bounded worker pool.
pub struct Scheduler {
    executor: Arc<CallExecutor>,
    sink: Arc<dyn OutcomeSink>,
    monitor: Arc<QuotaMonitor>,
    pause: Arc<PauseController>,
    shutdown: SharedShutdown,
    stats: Arc<StatsCounters>,
    progress: Arc<ProgressReporter>,
    concurrency: usize,
    grace_period: Duration,
    pause_on_quota: bool,
}

impl Scheduler {
    /// Create a scheduler.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<CallExecutor>,
        sink: Arc<dyn OutcomeSink>,
        monitor: Arc<QuotaMonitor>,
        pause: Arc<PauseController>,
        shutdown: SharedShutdown,
        stats: Arc<StatsCounters>,
        progress: Arc<ProgressReporter>,
        concurrency: usize,
        grace_period: Duration,
    ) -> Self {
        Self {
            executor,
            sink,
            monitor,
            pause,
            shutdown,
            stats,
            progress,
            concurrency: concurrency.max(1),
            grace_period,
            pause_on_quota: true,
        }
    }

    /// Whether quota pressure reported by workers may pause dispatch.
    pub fn with_quota_pausing(mut self, enabled: bool) -> Self {
        self.pause_on_quota = enabled;
        self
    }

    /// Dispatch every item, then wait for in-flight work.
    ///
    /// Returns once all dispatched items have finished, or once the grace
    /// period after an interrupt has elapsed.
    pub async fn run<I>(&self, items: I) -> ScheduleReport
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let halt = Arc::new(Halt::default());
        let abandoned = Arc::new(AtomicU64::new(0));
        let mut tasks = JoinSet::new();
        let mut items = items.into_iter();
        let mut not_attempted = 0u64;

        let stop = loop {
            if let Some(reason) = self.stop_reason(&halt) {
                break reason;
            }
            let Some(item) = items.next() else {
                break StopReason::Exhausted;
            };

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        not_attempted += 1;
                        break StopReason::Interrupted;
                    }
                },
                _ = self.shutdown.wait_for_shutdown() => {
                    not_attempted += 1;
                    break StopReason::Interrupted;
                }
                reason = halt.wait() => {
                    not_attempted += 1;
                    break reason;
                }
            };

            let gate = tokio::select! {
                gate = self.pause.gate() => gate,
                _ = self.shutdown.wait_for_shutdown() => {
                    not_attempted += 1;
                    break StopReason::Interrupted;
                }
                reason = halt.wait() => {
                    not_attempted += 1;
                    break reason;
                }
            };
            if let GateOutcome::Resumed { waited } = gate {
                info!(waited_secs = waited.as_secs(), "Dispatch resumed after pause");
                self.monitor.start_new_window();
            }

            // A worker may have failed while this loop waited.
            if let Some(reason) = self.stop_reason(&halt) {
                not_attempted += 1;
                break reason;
            }

            self.stats.record_submitted();
            let in_flight = InFlight {
                stats: self.stats.clone(),
                abandoned: abandoned.clone(),
                armed: true,
            };
            tasks.spawn(self.worker(item, permit, halt.clone(), in_flight));

            // Reap finished tasks so the set does not grow with the input.
            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }
        };

        not_attempted += items.count() as u64;
        match &stop {
            StopReason::Exhausted => {}
            reason => warn!(
                reason = ?reason,
                in_flight = tasks.len(),
                not_attempted,
                "Dispatch stopped, draining in-flight items"
            ),
        }

        self.drain(&mut tasks).await;

        ScheduleReport {
            stop,
            not_attempted,
            abandoned: abandoned.load(Ordering::Relaxed),
        }
    }

    fn stop_reason(&self, halt: &Halt) -> Option<StopReason> {
        if let Some(reason) = halt.get() {
            return Some(reason);
        }
        self.shutdown
            .is_shutdown_requested()
            .then_some(StopReason::Interrupted)
    }

    fn worker(
        &self,
        item: WorkItem,
        permit: tokio::sync::OwnedSemaphorePermit,
        halt: Arc<Halt>,
        mut in_flight: InFlight,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let executor = self.executor.clone();
        let sink = self.sink.clone();
        let pause = self.pause.clone();
        let stats = self.stats.clone();
        let progress = self.progress.clone();
        let pause_on_quota = self.pause_on_quota;
        let span = info_span!("item", item_id = %item.id);

        async move {
            let _permit = permit;
            let (result, quota) = executor.attempt(&item).await;
            in_flight.settle();
            match result {
                Ok(outcome) => {
                    // Counted before the write starts: an abort during the
                    // write cannot stop a write that is already running.
                    stats.record_outcome(&outcome);
                    match sink.append(&outcome).await {
                        Ok(()) => {
                            metrics::record_outcome(&outcome);
                            progress.on_outcome(&stats.snapshot(pause.total_paused()), &quota);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to persist outcome, stopping the run");
                            stats.revert_outcome(&outcome);
                            stats.record_write_error();
                            halt.set(StopReason::SinkFailure(e.to_string()));
                        }
                    }
                }
                Err(CallError::Systemic(detail)) => {
                    halt.set(StopReason::Systemic(detail));
                }
                Err(CallError::Interrupted(_)) => {
                    stats.record_interrupted();
                }
            }
            if pause_on_quota {
                pause.maybe_pause(&quota);
            }
        }
        .instrument(span)
    }

    /// Wait for in-flight items. After an interrupt they get `grace_period`;
    /// a second interrupt or the end of the grace period aborts the rest.
    /// Aborted workers count themselves as abandoned.
    async fn drain(&self, tasks: &mut JoinSet<()>) {
        let abandon = tokio::select! {
            _ = join_all(tasks) => false,
            _ = self.grace_expired() => true,
        };
        if !abandon {
            return;
        }

        warn!(
            in_flight = tasks.len(),
            "Abandoning in-flight items, they will be retried on resume"
        );
        tasks.abort_all();
        join_all(tasks).await;
    }

    async fn grace_expired(&self) {
        self.shutdown.wait_for_shutdown().await;
        tokio::select! {
            _ = tokio::time::sleep(self.grace_period) => {
                warn!(grace_secs = self.grace_period.as_secs(), "Grace period elapsed");
            }
            _ = self.shutdown.wait_for_forced() => {
                warn!("Second interrupt received");
            }
        }
    }
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        log_join_error(joined);
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Worker task panicked");
        }
    }
}
