//! Quota monitor
//!
//! Folds per-call feedback into one [`QuotaSnapshot`] and answers whether new
//! work should be held back. All state sits behind a single mutex; every
//! critical section is a handful of arithmetic operations and never awaits.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::headers::QuotaFeedback;
use super::state::QuotaState;

/// Provider window usage ratio that always triggers a pause.
pub const WINDOW_PAUSE_RATIO: f64 = 0.95;

/// Latest known provider quota position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Requests consumed in the current provider window
    pub requests_used: u64,
    /// Request window size, if reported
    pub requests_limit: Option<u64>,
    /// Tokens consumed in the current provider window
    pub tokens_used: u64,
    /// Token window size, if reported
    pub tokens_limit: Option<u64>,
    /// When the request window resets
    pub reset_at_requests: Option<DateTime<Utc>>,
    /// When the token window resets
    pub reset_at_tokens: Option<DateTime<Utc>>,
    /// When this snapshot was observed
    pub observed_at: DateTime<Utc>,
}

impl QuotaSnapshot {
    fn request_ratio(&self) -> Option<f64> {
        ratio(self.requests_used, self.requests_limit)
    }

    fn token_ratio(&self) -> Option<f64> {
        ratio(self.tokens_used, self.tokens_limit)
    }
}

/// Pause decision derived from the current quota position.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaMetrics {
    /// Session budget usage if a budget applies, else provider request window usage
    pub usage_ratio: f64,
    /// Whether new work should be held back
    pub should_pause: bool,
    /// Why, when `should_pause` is set
    pub reason: Option<String>,
    /// Requests counted against the session budget
    pub session_requests: u64,
    /// When the provider window behind a window pause resets, if known
    pub resume_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct MonitorState {
    snapshot: Option<QuotaSnapshot>,
    session_requests: u64,
    day: NaiveDate,
}

/// Thread-safe quota tracker shared by every worker.
#[derive(Debug)]
pub struct QuotaMonitor {
    session_budget: Option<u64>,
    pause_threshold: f64,
    state: Mutex<MonitorState>,
}

impl QuotaMonitor {
    /// Create a monitor. `pause_threshold` applies to the session budget only;
    /// provider windows always pause at [`WINDOW_PAUSE_RATIO`].
    pub fn new(session_budget: Option<u64>, pause_threshold: f64) -> Self {
        Self {
            session_budget,
            pause_threshold,
            state: Mutex::new(MonitorState {
                snapshot: None,
                session_requests: 0,
                day: Local::now().date_naive(),
            }),
        }
    }

    /// Record the feedback of one finished item and count it against the
    /// session budget.
    ///
    /// Fields missing from `feedback` keep their prior values. A lower
    /// `requests_used` than already known is only accepted once the prior
    /// reset instant has passed.
    pub fn update(&self, feedback: &QuotaFeedback) -> QuotaMetrics {
        self.update_at(feedback, Utc::now(), Local::now().date_naive())
    }

    fn update_at(&self, feedback: &QuotaFeedback, now: DateTime<Utc>, today: NaiveDate) -> QuotaMetrics {
        let mut state = self.lock();
        if today != state.day {
            info!(
                previous = %state.day,
                today = %today,
                session_requests = state.session_requests,
                "Calendar day changed, resetting session request counter"
            );
            state.session_requests = 0;
            state.day = today;
        }
        state.session_requests += 1;
        let merged = merge(state.snapshot.as_ref(), feedback, now);
        state.snapshot = Some(merged);
        self.evaluate(&state)
    }

    /// Current pause decision without recording anything.
    pub fn metrics(&self) -> QuotaMetrics {
        let state = self.lock();
        self.evaluate(&state)
    }

    /// Latest snapshot, if any feedback has been recorded.
    pub fn snapshot(&self) -> Option<QuotaSnapshot> {
        self.lock().snapshot.clone()
    }

    /// Requests counted against the session budget so far.
    pub fn session_requests(&self) -> u64 {
        self.lock().session_requests
    }

    /// Begin a new budget window after a pause elapsed.
    ///
    /// Clears the session counter and the known window usage; the next
    /// feedback re-establishes the provider position.
    pub fn start_new_window(&self) {
        let mut state = self.lock();
        info!(
            session_requests = state.session_requests,
            "Starting new quota window"
        );
        state.session_requests = 0;
        if let Some(snapshot) = state.snapshot.as_mut() {
            snapshot.requests_used = 0;
            snapshot.tokens_used = 0;
        }
    }

    /// Export state for persistence.
    pub fn export_state(&self) -> QuotaState {
        let state = self.lock();
        QuotaState::new(state.day, state.session_requests, state.snapshot.clone())
    }

    /// Restore previously persisted state. A state saved on an earlier day
    /// only restores the provider snapshot.
    pub fn restore(&self, saved: QuotaState) {
        let mut state = self.lock();
        let today = Local::now().date_naive();
        if saved.day == today {
            state.session_requests = saved.session_requests;
        } else {
            debug!(saved_day = %saved.day, "Saved quota state is from an earlier day, session counter not restored");
        }
        state.day = today;
        state.snapshot = saved.snapshot;
    }

    fn evaluate(&self, state: &MonitorState) -> QuotaMetrics {
        let session_ratio = self
            .session_budget
            .and_then(|budget| ratio(state.session_requests, Some(budget)));
        let request_ratio = state.snapshot.as_ref().and_then(QuotaSnapshot::request_ratio);
        let token_ratio = state.snapshot.as_ref().and_then(QuotaSnapshot::token_ratio);

        let mut reason = None;
        let mut resume_at = None;
        if let (Some(r), Some(budget)) = (session_ratio, self.session_budget) {
            if r >= self.pause_threshold {
                reason = Some(format!(
                    "session budget {:.1}% used ({}/{budget} requests, threshold {:.0}%)",
                    r * 100.0,
                    state.session_requests,
                    self.pause_threshold * 100.0
                ));
            }
        }
        if reason.is_none() {
            if let (Some(r), Some(snapshot)) = (request_ratio, state.snapshot.as_ref()) {
                if r >= WINDOW_PAUSE_RATIO {
                    reason = Some(format!(
                        "request window {:.1}% used ({}/{} requests)",
                        r * 100.0,
                        snapshot.requests_used,
                        snapshot.requests_limit.unwrap_or_default()
                    ));
                    resume_at = snapshot.reset_at_requests;
                }
            }
        }
        if reason.is_none() {
            if let (Some(r), Some(snapshot)) = (token_ratio, state.snapshot.as_ref()) {
                if r >= WINDOW_PAUSE_RATIO {
                    reason = Some(format!(
                        "token window {:.1}% used ({}/{} tokens)",
                        r * 100.0,
                        snapshot.tokens_used,
                        snapshot.tokens_limit.unwrap_or_default()
                    ));
                    resume_at = snapshot.reset_at_tokens;
                }
            }
        }

        QuotaMetrics {
            usage_ratio: session_ratio.or(request_ratio).unwrap_or(0.0),
            should_pause: reason.is_some(),
            reason,
            session_requests: state.session_requests,
            resume_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // Critical sections never panic mid-update, so a poisoned lock still
        // holds consistent state.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ratio(used: u64, limit: Option<u64>) -> Option<f64> {
    match limit {
        Some(limit) if limit > 0 => Some(used as f64 / limit as f64),
        _ => None,
    }
}

fn window_passed(reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    reset_at.is_some_and(|reset| now >= reset)
}

/// Merge one response's feedback into the prior snapshot.
fn merge(prior: Option<&QuotaSnapshot>, feedback: &QuotaFeedback, now: DateTime<Utc>) -> QuotaSnapshot {
    let requests_limit = feedback
        .requests_limit
        .or_else(|| prior.and_then(|p| p.requests_limit));
    let tokens_limit = feedback
        .tokens_limit
        .or_else(|| prior.and_then(|p| p.tokens_limit));

    let requests_crossed = window_passed(prior.and_then(|p| p.reset_at_requests), now);
    let tokens_crossed = window_passed(prior.and_then(|p| p.reset_at_tokens), now);

    let observed_requests = match (feedback.requests_remaining, requests_limit) {
        (Some(remaining), Some(limit)) => Some(limit.saturating_sub(remaining)),
        _ => None,
    };
    let observed_tokens = match (feedback.tokens_remaining, tokens_limit) {
        (Some(remaining), Some(limit)) => {
            // Headers describe the window before this response was billed.
            let consumed = feedback.tokens_consumed.unwrap_or(0);
            Some(limit.saturating_sub(remaining).saturating_add(consumed).min(limit))
        }
        _ => None,
    };

    let requests_used = monotonic(
        prior.map(|p| p.requests_used),
        observed_requests,
        requests_crossed,
    );
    let tokens_used = monotonic(prior.map(|p| p.tokens_used), observed_tokens, tokens_crossed);

    let reset_at_requests = feedback
        .reset_requests
        .map(|hint| hint.resolve(now))
        .or_else(|| prior.and_then(|p| p.reset_at_requests));
    let reset_at_tokens = feedback
        .reset_tokens
        .map(|hint| hint.resolve(now))
        .or_else(|| prior.and_then(|p| p.reset_at_tokens));

    QuotaSnapshot {
        requests_used,
        requests_limit,
        tokens_used,
        tokens_limit,
        reset_at_requests,
        reset_at_tokens,
        observed_at: now,
    }
}

/// Responses finish out of order, so a stale lower reading is ignored unless
/// the window it belongs to is known to have reset.
fn monotonic(prior: Option<u64>, observed: Option<u64>, window_crossed: bool) -> u64 {
    match (prior, observed) {
        (Some(prior), Some(observed)) if observed < prior && !window_crossed => prior,
        (_, Some(observed)) => observed,
        (Some(prior), None) => prior,
        (None, None) => 0,
    }
}
