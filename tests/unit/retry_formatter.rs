use std::time::Duration;

use bio_batch::service::{classify, RetryContext, ServiceFailure};
use bio_batch::ErrorKind;

fn sample_context(kind: ErrorKind) -> RetryContext {
    RetryContext::new(
        2,
        5,
        kind,
        Duration::from_secs(64),
        "Nina Simone",
        "HTTP 429: Rate limit reached for requests",
    )
}

#[test]
fn format_retry_captures_attempt_and_wait() {
    let message = sample_context(ErrorKind::RateLimited).format_retry();
    assert!(message.contains("attempt 3/5"));
    assert!(message.contains("rate limit exceeded"));
    assert!(message.contains("64.0 seconds"));
    assert!(message.contains("Nina Simone"));
}

#[test]
fn format_success_includes_item_name() {
    let message = sample_context(ErrorKind::NetworkError).format_success();
    assert!(message.contains("Attempt 2/5 succeeded"));
    assert!(message.contains("Nina Simone"));
}

#[test]
fn format_failure_has_suggestion() {
    let message = sample_context(ErrorKind::QuotaExhausted).format_failure();
    assert!(message.starts_with("[FAILED] Nina Simone failed after 2 attempt(s)"));
    assert!(message.contains("Last error: HTTP 429"));
    assert!(message.contains("Suggestion: Check billing limits"));
}

#[test]
fn classification_table() {
    let cases = [
        (ServiceFailure::transport("operation timed out"), ErrorKind::NetworkError),
        (ServiceFailure::http(429, "slow down"), ErrorKind::RateLimited),
        (
            ServiceFailure::http(429, "quota").with_code("insufficient_quota"),
            ErrorKind::QuotaExhausted,
        ),
        (
            ServiceFailure::http(429, "hard limit").with_code("billing_hard_limit_reached"),
            ErrorKind::QuotaExhausted,
        ),
        (ServiceFailure::http(401, "bad key"), ErrorKind::Systemic),
        (ServiceFailure::http(403, "forbidden"), ErrorKind::Systemic),
        (ServiceFailure::http(404, "prompt not found"), ErrorKind::Systemic),
        (
            ServiceFailure::http(400, "bad key").with_code("invalid_api_key"),
            ErrorKind::Systemic,
        ),
        (ServiceFailure::http(502, "bad gateway"), ErrorKind::ServerError),
        (ServiceFailure::http(422, "unprocessable"), ErrorKind::ClientError),
    ];
    for (failure, expected) in cases {
        assert_eq!(classify(&failure), expected, "{failure}");
    }
}
