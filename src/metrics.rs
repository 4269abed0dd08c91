//! Production observability metrics.
//!
//! Counters and histograms for service calls, retries and outcomes, and
//! gauges for quota usage and pause state. Emission goes through the
//! `metrics` facade and is a no-op until [`init_metrics`] installs the
//! Prometheus exporter, so library users and tests pay nothing for it.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::quota::QuotaMetrics;
use crate::{CallOutcome, ErrorKind};

static METRICS_INITIALIZED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter on `addr` and register metric descriptions.
///
/// Idempotent: later calls are ignored.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        "service_calls_total",
        Unit::Count,
        "Completion service calls by result"
    );
    describe_histogram!(
        "service_call_duration_seconds",
        Unit::Seconds,
        "Duration of a single completion service call"
    );
    describe_counter!(
        "service_retries_total",
        Unit::Count,
        "Retries scheduled by the call executor"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff applied before a retry"
    );
    describe_counter!(
        "outcomes_written_total",
        Unit::Count,
        "Outcome records persisted by status"
    );
    describe_gauge!(
        "quota_usage_ratio",
        Unit::Count,
        "Current quota usage ratio used for pause decisions"
    );
    describe_gauge!(
        "quota_session_requests",
        Unit::Count,
        "Requests counted against the session budget"
    );
    describe_gauge!("quota_paused", Unit::Count, "1 while dispatch is paused");
    describe_counter!(
        "quota_pauses_total",
        Unit::Count,
        "Number of quota-triggered pauses"
    );

    *initialized = true;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Timing helper for one service call.
pub struct CallMetrics {
    item_id: String,
    attempt: u32,
    start_time: Instant,
}

impl CallMetrics {
    /// Start timing a call for `item_id`.
    pub fn start(item_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            item_id: item_id.into(),
            attempt,
            start_time: Instant::now(),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.record("success");
    }

    /// Record a failed call.
    pub fn record_failure(&self, kind: ErrorKind) {
        self.record(kind.as_str());
        if kind == ErrorKind::RateLimited {
            warn!(
                item_id = %self.item_id,
                attempt = self.attempt,
                "Rate limit response recorded"
            );
        }
    }

    fn record(&self, result: &'static str) {
        let duration = self.start_time.elapsed();
        counter!("service_calls_total", "result" => result).increment(1);
        histogram!("service_call_duration_seconds").record(duration.as_secs_f64());
        debug!(
            item_id = %self.item_id,
            attempt = self.attempt,
            result,
            duration_ms = duration.as_millis() as u64,
            "Service call finished"
        );
    }
}

/// Record a scheduled retry and its backoff.
pub fn record_retry_backoff(kind: ErrorKind, delay: Duration) {
    counter!("service_retries_total", "kind" => kind.as_str()).increment(1);
    histogram!("retry_backoff_duration_seconds", "kind" => kind.as_str())
        .record(delay.as_secs_f64());
}

/// Record a persisted outcome.
pub fn record_outcome(outcome: &CallOutcome) {
    let status = if outcome.is_success() {
        "success"
    } else {
        "failed"
    };
    counter!("outcomes_written_total", "status" => status).increment(1);
}

/// Publish the latest quota metrics.
pub fn record_quota(metrics: &QuotaMetrics) {
    gauge!("quota_usage_ratio").set(metrics.usage_ratio);
    gauge!("quota_session_requests").set(metrics.session_requests as f64);
}

/// Publish a pause state transition.
pub fn record_pause_transition(paused: bool) {
    gauge!("quota_paused").set(if paused { 1.0 } else { 0.0 });
    if paused {
        counter!("quota_pauses_total").increment(1);
    }
}
