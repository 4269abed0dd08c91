//! Call executor
//!
//! Runs one work item against the completion service: classify each failure,
//! back off inside the item's own task, retry up to the per-kind cap, and
//! record the item's quota feedback exactly once before returning.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::backoff;
use super::config::{RetryCaps, DEFAULT_GRACE_PERIOD};
use super::stats::StatsCounters;
use crate::metrics::{self, CallMetrics};
use crate::quota::{QuotaFeedback, QuotaMetrics, QuotaMonitor};
use crate::service::{classify, CompletionService, RetryContext};
use crate::shutdown::SharedShutdown;
use crate::{CallOutcome, ErrorKind, WorkItem};

/// Why an item ended without an outcome to persist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The failure affects every item; the run must stop
    #[error("systemic failure: {0}")]
    Systemic(String),
    /// Shutdown cut the item short while it was waiting to retry
    #[error("interrupted during backoff after {0} attempt(s)")]
    Interrupted(u32),
}

/// Executes work items one call at a time with retries.
pub struct CallExecutor {
    service: Arc<dyn CompletionService>,
    monitor: Arc<QuotaMonitor>,
    caps: RetryCaps,
    shutdown: SharedShutdown,
    stats: Arc<StatsCounters>,
    grace_period: Duration,
}

impl CallExecutor {
    /// Create an executor.
    pub fn new(
        service: Arc<dyn CompletionService>,
        monitor: Arc<QuotaMonitor>,
        caps: RetryCaps,
        shutdown: SharedShutdown,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            service,
            monitor,
            caps,
            shutdown,
            stats,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// How long after the first interrupt a retry may still be waited out.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Process `item` to a terminal outcome.
    ///
    /// Exhausted transient failures and client errors become `Failed`
    /// outcomes. Only systemic failures and interrupts are errors, and
    /// neither produces a record. The quota monitor is updated once with the
    /// most recent feedback, whatever the result.
    pub async fn attempt(&self, item: &WorkItem) -> (Result<CallOutcome, CallError>, QuotaMetrics) {
        let started = Instant::now();
        let mut feedback = QuotaFeedback::default();
        let result = self.run_attempts(item, started, &mut feedback).await;
        let metrics = self.monitor.update(&feedback);
        metrics::record_quota(&metrics);
        (result, metrics)
    }

    async fn run_attempts(
        &self,
        item: &WorkItem,
        started: Instant,
        feedback: &mut QuotaFeedback,
    ) -> Result<CallOutcome, CallError> {
        let mut attempt = 0u32;
        let mut last_kind: Option<ErrorKind> = None;

        loop {
            attempt += 1;
            let call = CallMetrics::start(&item.id, attempt);

            let failure = match self.service.complete(item).await {
                Ok(reply) => {
                    call.record_success();
                    if !reply.feedback.is_empty() {
                        *feedback = reply.feedback;
                    }
                    if let Some(kind) = last_kind {
                        let ctx = RetryContext::new(
                            attempt,
                            self.caps.for_kind(kind),
                            kind,
                            std::time::Duration::ZERO,
                            &item.name,
                            "",
                        );
                        info!(item_id = %item.id, "{}", ctx.format_success());
                    }
                    return Ok(CallOutcome::success(
                        item,
                        reply.text,
                        reply.response_id,
                        attempt,
                        started.elapsed(),
                    ));
                }
                Err(failure) => failure,
            };

            let kind = classify(&failure);
            call.record_failure(kind);
            if !failure.feedback.is_empty() {
                *feedback = failure.feedback.clone();
            }
            let detail = failure.to_string();

            if kind == ErrorKind::Systemic {
                error!(item_id = %item.id, error = %detail, "Systemic failure, stopping the run");
                return Err(CallError::Systemic(detail));
            }

            let max_attempts = self.caps.for_kind(kind);
            if !kind.is_transient() || attempt >= max_attempts {
                let ctx = RetryContext::new(
                    attempt,
                    max_attempts,
                    kind,
                    std::time::Duration::ZERO,
                    &item.name,
                    &detail,
                );
                warn!(item_id = %item.id, kind = %kind, "{}", ctx.format_failure());
                return Ok(CallOutcome::failure(
                    item,
                    kind,
                    detail,
                    attempt,
                    started.elapsed(),
                ));
            }

            let delay = backoff::delay(kind, attempt, failure.retry_after);
            let ctx = RetryContext::new(attempt, max_attempts, kind, delay, &item.name, &detail);
            warn!(item_id = %item.id, kind = %kind, error = %detail, "{}", ctx.format_retry());
            self.stats.record_retry();
            metrics::record_retry_backoff(kind, delay);
            last_kind = Some(kind);

            if !self.wait_backoff(delay).await {
                info!(item_id = %item.id, attempts = attempt, "Interrupted during backoff, item left for a resumed run");
                return Err(CallError::Interrupted(attempt));
            }
        }
    }

    /// Sleep for `delay`. Returns false if an interrupt means the retry will
    /// not happen.
    ///
    /// After the first interrupt a backoff that ends inside the grace period
    /// is still waited out, so the item can finish like any other in-flight
    /// call. A second interrupt cancels it.
    async fn wait_backoff(&self, delay: Duration) -> bool {
        let wake_at = Instant::now() + delay;
        let sleep = tokio::time::sleep_until(wake_at);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut sleep => return true,
            _ = self.shutdown.wait_for_shutdown() => {}
        }

        let grace_ends = self
            .shutdown
            .requested_at()
            .unwrap_or_else(Instant::now)
            + self.grace_period;
        if wake_at > grace_ends || self.shutdown.is_forced() {
            return false;
        }
        tokio::select! {
            _ = &mut sleep => true,
            _ = self.shutdown.wait_for_forced() => false,
        }
    }
}
