//! Progress reporting for long-running batches.
//!
//! Every `log_interval` persisted outcomes a progress line with throughput,
//! ETA and quota position is logged. An optional `indicatif` bar is advanced
//! on every outcome when running interactively.

use indicatif::ProgressBar;
use std::time::{Duration, Instant};
use tracing::info;

use super::stats::RunStats;
use crate::quota::QuotaMetrics;

/// Emits progress lines and drives an optional progress bar.
#[derive(Debug)]
pub struct ProgressReporter {
    total_expected: Option<u64>,
    log_interval: u64,
    start_time: Instant,
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    /// Create a reporter. `total_expected` is the item count if known.
    pub fn new(total_expected: Option<u64>, log_interval: u64) -> Self {
        Self {
            total_expected,
            log_interval: log_interval.max(1),
            start_time: Instant::now(),
            bar: None,
        }
    }

    /// Attach a progress bar.
    pub fn with_bar(mut self, bar: ProgressBar) -> Self {
        self.bar = Some(bar);
        self
    }

    /// Whether `completed` outcomes is a logging boundary.
    pub fn should_log(&self, completed: u64) -> bool {
        completed > 0 && completed % self.log_interval == 0
    }

    /// Called after each persisted outcome.
    pub fn on_outcome(&self, stats: &RunStats, quota: &QuotaMetrics) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        if self.should_log(stats.completed()) {
            let line = self.format_progress(stats, quota, self.start_time.elapsed());
            match &self.bar {
                Some(bar) => bar.println(&line),
                None => info!(
                    completed = stats.completed(),
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    usage_ratio = quota.usage_ratio,
                    "{line}"
                ),
            }
        }
    }

    /// Finish the progress bar, if any.
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    /// Time since the reporter was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// `[PROGRESS] 200/1000 items (20.0%) - 198 ok, 2 failed at 3.2 items/sec - ~4m remaining - quota 41.0% (410 session requests)`
    pub fn format_progress(&self, stats: &RunStats, quota: &QuotaMetrics, elapsed: Duration) -> String {
        let completed = stats.completed();
        let mut parts = vec![match self.total_expected {
            Some(total) if total > 0 => format!(
                "[PROGRESS] {completed}/{total} items ({:.1}%)",
                completed as f64 / total as f64 * 100.0
            ),
            _ => format!("[PROGRESS] {completed} items"),
        }];
        parts.push(format!("- {} ok, {} failed", stats.succeeded, stats.failed));

        let rate = rate(completed, elapsed);
        if rate > 0.0 {
            parts.push(format!("at {rate:.1} items/sec"));
            if let Some(total) = self.total_expected {
                let remaining = total.saturating_sub(completed);
                if remaining > 0 {
                    let eta = Duration::from_secs_f64(remaining as f64 / rate);
                    parts.push(format!("- ~{} remaining", format_duration(eta)));
                }
            }
        }
        parts.push(format!(
            "- quota {:.1}% ({} session requests)",
            quota.usage_ratio * 100.0,
            quota.session_requests
        ));
        parts.join(" ")
    }
}

/// Multi-line end-of-run summary.
pub fn format_summary(stats: &RunStats, not_attempted: u64, elapsed: Duration) -> String {
    let completed = stats.completed();
    [
        "=".repeat(60),
        "RUN SUMMARY".to_string(),
        format!("  Duration:        {}", format_duration(elapsed)),
        format!("  Submitted:       {}", stats.submitted),
        format!(
            "  Succeeded:       {} ({:.1}%)",
            stats.succeeded,
            stats.success_rate()
        ),
        format!("  Failed:          {}", stats.failed),
        format!("  Retries:         {}", stats.retried),
        format!("  Interrupted:     {}", stats.interrupted),
        format!("  Not attempted:   {not_attempted}"),
        format!(
            "  Paused:          {}",
            format_duration(stats.paused_duration_total)
        ),
        format!("  Rate:            {:.2} items/sec", rate(completed, elapsed)),
        "=".repeat(60),
    ]
    .join("\n")
}

fn rate(completed: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        completed as f64 / secs
    } else {
        0.0
    }
}

/// `42s`, `7m`, `3.5h`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
