//! Quota feedback carried on provider responses
//!
//! The provider reports its request and token windows through
//! `x-ratelimit-*` headers. Any header may be missing or malformed; both are
//! treated as "unknown" so the monitor keeps its prior value.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;
use tracing::debug;

/// Remaining requests in the current window
pub const REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
/// Request window size
pub const LIMIT_REQUESTS: &str = "x-ratelimit-limit-requests";
/// Remaining tokens in the current window
pub const REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";
/// Token window size
pub const LIMIT_TOKENS: &str = "x-ratelimit-limit-tokens";
/// Time until the request window resets
pub const RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
/// Time until the token window resets
pub const RESET_TOKENS: &str = "x-ratelimit-reset-tokens";
/// Standard retry hint, seconds or HTTP date
pub const RETRY_AFTER: &str = "retry-after";
/// Millisecond retry hint some providers send alongside `retry-after`
pub const RETRY_AFTER_MS: &str = "retry-after-ms";

/// When a provider window resets, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetHint {
    /// Relative to the time the response was observed
    After(Duration),
    /// Absolute instant
    At(DateTime<Utc>),
}

impl ResetHint {
    /// Absolute reset instant for a response observed at `observed_at`.
    pub fn resolve(&self, observed_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::After(after) => chrono::Duration::from_std(*after)
                .ok()
                .and_then(|d| observed_at.checked_add_signed(d))
                .unwrap_or(observed_at),
            Self::At(at) => *at,
        }
    }
}

/// Raw quota metadata observed on one service response. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaFeedback {
    /// Requests left in the current window
    pub requests_remaining: Option<u64>,
    /// Request window size
    pub requests_limit: Option<u64>,
    /// Tokens left in the current window
    pub tokens_remaining: Option<u64>,
    /// Token window size
    pub tokens_limit: Option<u64>,
    /// Request window reset
    pub reset_requests: Option<ResetHint>,
    /// Token window reset
    pub reset_tokens: Option<ResetHint>,
    /// Tokens billed for this response, from the response body
    pub tokens_consumed: Option<u64>,
}

impl QuotaFeedback {
    /// Whether no quota information was observed at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Extract quota feedback from response headers.
pub fn feedback_from_headers(headers: &HeaderMap) -> QuotaFeedback {
    QuotaFeedback {
        requests_remaining: header_count(headers, REMAINING_REQUESTS),
        requests_limit: header_count(headers, LIMIT_REQUESTS),
        tokens_remaining: header_count(headers, REMAINING_TOKENS),
        tokens_limit: header_count(headers, LIMIT_TOKENS),
        reset_requests: header_str(headers, RESET_REQUESTS).and_then(parse_reset_hint),
        reset_tokens: header_str(headers, RESET_TOKENS).and_then(parse_reset_hint),
        tokens_consumed: None,
    }
}

/// Server retry hint from `retry-after-ms` or `retry-after`.
///
/// `retry-after` may be delta-seconds or an HTTP date; a date in the past
/// yields a zero hint.
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(ms) = header_str(headers, RETRY_AFTER_MS).and_then(|v| v.parse::<f64>().ok()) {
        if ms.is_finite() && ms >= 0.0 {
            return Some(seconds(ms / 1000.0));
        }
    }

    let value = header_str(headers, RETRY_AFTER)?;
    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then(|| seconds(secs));
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => Some(
            (at.with_timezone(&Utc) - now)
                .to_std()
                .unwrap_or(Duration::ZERO),
        ),
        Err(e) => {
            debug!(value, error = %e, "Ignoring unparsable retry-after header");
            None
        }
    }
}

/// Parse a reset value: plain seconds, a `6m0s`/`20ms`/`1h` style duration,
/// or an RFC 3339 timestamp. Anything else is unknown.
pub fn parse_reset_hint(value: &str) -> Option<ResetHint> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0)
            .then(|| ResetHint::After(seconds(secs)));
    }
    if let Some(duration) = parse_compound_duration(value) {
        return Some(ResetHint::After(duration));
    }
    match DateTime::parse_from_rfc3339(value) {
        Ok(at) => Some(ResetHint::At(at.with_timezone(&Utc))),
        Err(_) => {
            debug!(value, "Ignoring unparsable reset header");
            None
        }
    }
}

/// `1h2m3.5s`, `20ms`, `5s`. Every number must carry a unit.
fn parse_compound_duration(value: &str) -> Option<Duration> {
    let mut total = 0.0f64;
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += number * seconds_per_unit;
    }
    total.is_finite().then(|| seconds(total))
}

/// Seconds to a duration, rounded to the nearest nanosecond.
fn seconds(secs: f64) -> Duration {
    Duration::from_nanos((secs * 1e9).round() as u64)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn header_count(headers: &HeaderMap, name: &str) -> Option<u64> {
    let value = header_str(headers, name)?;
    match value.parse::<u64>() {
        Ok(count) => Some(count),
        Err(e) => {
            debug!(header = name, value, error = %e, "Ignoring unparsable quota header");
            None
        }
    }
}
