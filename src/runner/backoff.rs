//! Retry backoff policy
//!
//! A pure function of `(kind, attempt, server hint)`. The only source of
//! nondeterminism is the jitter draw, which [`delay_with_jitter`] takes as an
//! argument so the policy can be tested exactly.

use rand::Rng;
use std::time::Duration;

use crate::ErrorKind;

/// Upper bound applied to any server-provided retry hint.
/// A misbehaving `Retry-After` must not park a worker for more than an hour.
pub const HARD_CAP: Duration = Duration::from_secs(3600);

/// Jitter applied around a server hint (±10%).
pub const HINT_JITTER: f64 = 0.1;

/// Extra jitter added on top of a computed delay (up to +10%).
pub const COMPUTED_JITTER: f64 = 0.1;

/// Base delay and cap for a transient error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    /// Delay before the first retry
    pub base: Duration,
    /// Largest computed delay
    pub cap: Duration,
}

impl BackoffSchedule {
    /// Schedule used for `kind`, or `None` for kinds that are never retried.
    pub fn for_kind(kind: ErrorKind) -> Option<Self> {
        match kind {
            ErrorKind::RateLimited => Some(Self {
                base: Duration::from_secs(60),
                cap: Duration::from_secs(300),
            }),
            ErrorKind::QuotaExhausted => Some(Self {
                base: Duration::from_secs(300),
                cap: Duration::from_secs(3600),
            }),
            ErrorKind::ServerError | ErrorKind::NetworkError => Some(Self {
                base: Duration::from_millis(500),
                cap: Duration::from_secs(4),
            }),
            ErrorKind::ClientError | ErrorKind::Systemic => None,
        }
    }

    /// Exponential delay for `attempt` (1-based), before jitter.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(multiplier).min(self.cap)
    }
}

/// Delay before retrying after the `attempt`-th failure of `kind`.
///
/// Returns [`Duration::ZERO`] for kinds that are never retried.
pub fn delay(kind: ErrorKind, attempt: u32, server_hint: Option<Duration>) -> Duration {
    let unit = rand::thread_rng().gen_range(0.0..1.0);
    delay_with_jitter(kind, attempt, server_hint, unit)
}

/// Deterministic form of [`delay`]; `unit` is the jitter draw in `[0, 1)`.
///
/// With a hint the result is `min(hint, HARD_CAP)` scaled into `[0.9, 1.1)`.
/// Without one it is `base * 2^(attempt-1)`, capped per kind, plus up to 10%.
pub fn delay_with_jitter(
    kind: ErrorKind,
    attempt: u32,
    server_hint: Option<Duration>,
    unit: f64,
) -> Duration {
    let Some(schedule) = BackoffSchedule::for_kind(kind) else {
        return Duration::ZERO;
    };
    let unit = unit.clamp(0.0, 1.0);

    match server_hint {
        Some(hint) => {
            let hint = hint.min(HARD_CAP);
            let factor = 1.0 - HINT_JITTER + 2.0 * HINT_JITTER * unit;
            hint.mul_f64(factor)
        }
        None => {
            let raw = schedule.raw_delay(attempt);
            raw + raw.mul_f64(COMPUTED_JITTER * unit)
        }
    }
}
