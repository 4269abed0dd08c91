//! Pause controller
//!
//! A gate in front of the dispatch loop. Workers report quota pressure after
//! each outcome through [`PauseController::maybe_pause`]; the scheduler calls
//! [`PauseController::gate`] before every dispatch and is parked there, without
//! polling, until the pause window elapses or [`PauseController::resume_now`]
//! is called. A pause caused by a provider window ends when that window
//! resets, if the provider said when. In-flight items are never affected.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

use super::monitor::QuotaMetrics;
use crate::metrics;

/// Observable pause state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PauseState {
    /// Whether new dispatches are held back
    pub paused: bool,
    /// Why the pause started
    pub reason: Option<String>,
    /// When dispatch resumes on its own
    pub resume_at: Option<DateTime<Utc>>,
}

/// What [`PauseController::gate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Not paused, returned immediately
    Open,
    /// Was paused and has resumed
    Resumed {
        /// Time spent blocked in the gate
        waited: Duration,
    },
}

#[derive(Debug, Default)]
struct Inner {
    state: PauseState,
    deadline: Option<Instant>,
    paused_since: Option<Instant>,
    total_paused: Duration,
    pause_count: u64,
}

impl Inner {
    fn unpause(&mut self, now: Instant) {
        if let Some(since) = self.paused_since.take() {
            self.total_paused += now.saturating_duration_since(since);
        }
        self.state = PauseState::default();
        self.deadline = None;
    }
}

/// Cooperative pause gate shared by the scheduler and its workers.
#[derive(Debug)]
pub struct PauseController {
    pause_duration: Duration,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl PauseController {
    /// Create a controller whose pauses last `pause_duration`.
    pub fn new(pause_duration: Duration) -> Self {
        Self {
            pause_duration,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    /// Pause if `metrics` asks for it. Returns `true` only on the transition.
    ///
    /// When `metrics` carries the provider's reset time the pause ends then,
    /// never later than the configured pause duration.
    pub fn maybe_pause(&self, metrics: &QuotaMetrics) -> bool {
        if !metrics.should_pause {
            return false;
        }
        let reason = metrics
            .reason
            .clone()
            .unwrap_or_else(|| "quota pressure".to_string());
        let duration = match metrics.resume_at {
            Some(at) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.pause_duration),
            None => self.pause_duration,
        };
        self.pause_for(reason, duration)
    }

    /// Enter the paused state for the configured pause duration. A pause
    /// already in effect is left untouched.
    pub fn pause(&self, reason: impl Into<String>) -> bool {
        self.pause_for(reason.into(), self.pause_duration)
    }

    fn pause_for(&self, reason: String, duration: Duration) -> bool {
        let now = Instant::now();
        let resume_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));
        {
            let mut inner = self.lock();
            if inner.state.paused {
                return false;
            }
            inner.state = PauseState {
                paused: true,
                reason: Some(reason.clone()),
                resume_at,
            };
            inner.deadline = Some(now + duration);
            inner.paused_since = Some(now);
            inner.pause_count += 1;
        }

        warn!(
            reason = %reason,
            resume_at = ?resume_at,
            pause_hours = duration.as_secs_f64() / 3600.0,
            "Quota pressure detected, pausing dispatch of new items"
        );
        metrics::record_pause_transition(true);
        true
    }

    /// Resume immediately, ignoring the pause window. Returns `true` if a
    /// pause was lifted.
    pub fn resume_now(&self, why: &str) -> bool {
        {
            let mut inner = self.lock();
            if !inner.state.paused {
                return false;
            }
            inner.unpause(Instant::now());
        }
        info!(reason = why, "Pause lifted early, dispatch resuming");
        metrics::record_pause_transition(false);
        self.notify.notify_waiters();
        true
    }

    /// Whether dispatch is currently held back.
    pub fn is_paused(&self) -> bool {
        self.lock().state.paused
    }

    /// Snapshot of the pause state.
    pub fn state(&self) -> PauseState {
        self.lock().state.clone()
    }

    /// Number of pauses entered so far.
    pub fn pause_count(&self) -> u64 {
        self.lock().pause_count
    }

    /// Total time spent paused, including a pause still in effect.
    pub fn total_paused(&self) -> Duration {
        let inner = self.lock();
        let current = inner
            .paused_since
            .map(|since| Instant::now().saturating_duration_since(since))
            .unwrap_or_default();
        inner.total_paused + current
    }

    /// Block until dispatch may proceed.
    pub async fn gate(&self) -> GateOutcome {
        let started = Instant::now();
        let mut waited = false;
        loop {
            // Registered before the state check so a resume in between wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut inner = self.lock();
                if !inner.state.paused {
                    return if waited {
                        GateOutcome::Resumed {
                            waited: started.elapsed(),
                        }
                    } else {
                        GateOutcome::Open
                    };
                }
                let current = inner.deadline;
                match current {
                    Some(deadline) if Instant::now() >= deadline => {
                        inner.unpause(Instant::now());
                        None
                    }
                    other => Some(other),
                }
            };

            match deadline {
                None => {
                    info!(
                        waited_secs = started.elapsed().as_secs(),
                        "Pause window elapsed, dispatch resuming"
                    );
                    metrics::record_pause_transition(false);
                    self.notify.notify_waiters();
                    return GateOutcome::Resumed {
                        waited: started.elapsed(),
                    };
                }
                Some(Some(deadline)) => {
                    waited = true;
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = &mut notified => {}
                    }
                }
                Some(None) => {
                    waited = true;
                    notified.await;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
