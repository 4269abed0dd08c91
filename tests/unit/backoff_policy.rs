use std::time::Duration;

use bio_batch::runner::backoff::{delay, delay_with_jitter, HARD_CAP};
use bio_batch::ErrorKind;

const TRANSIENT: [ErrorKind; 4] = [
    ErrorKind::RateLimited,
    ErrorKind::QuotaExhausted,
    ErrorKind::ServerError,
    ErrorKind::NetworkError,
];

#[test]
fn computed_delay_is_monotonic_in_attempt() {
    for kind in TRANSIENT {
        for unit in [0.0, 0.5, 0.999] {
            let delays: Vec<_> = (1..=10)
                .map(|attempt| delay_with_jitter(kind, attempt, None, unit))
                .collect();
            for pair in delays.windows(2) {
                assert!(pair[0] <= pair[1], "{kind}: {:?} > {:?}", pair[0], pair[1]);
            }
        }
    }
}

#[test]
fn rate_limit_schedule() {
    assert_eq!(
        delay_with_jitter(ErrorKind::RateLimited, 1, None, 0.0),
        Duration::from_secs(60)
    );
    assert_eq!(
        delay_with_jitter(ErrorKind::RateLimited, 2, None, 0.0),
        Duration::from_secs(120)
    );
    assert_eq!(
        delay_with_jitter(ErrorKind::RateLimited, 4, None, 0.0),
        Duration::from_secs(300)
    );
}

#[test]
fn random_delay_stays_within_jitter_band() {
    for _ in 0..200 {
        let d = delay(ErrorKind::ServerError, 1, None);
        assert!(d >= Duration::from_millis(500));
        assert!(d <= Duration::from_millis(550));

        let d = delay(ErrorKind::RateLimited, 1, Some(Duration::from_secs(20)));
        assert!(d >= Duration::from_secs(18));
        assert!(d <= Duration::from_secs(22));
    }
}

#[test]
fn huge_server_hint_is_capped() {
    let d = delay(ErrorKind::QuotaExhausted, 1, Some(Duration::from_secs(86_400)));
    assert!(d <= HARD_CAP.mul_f64(1.1));
    assert!(d >= HARD_CAP.mul_f64(0.9));
}

#[test]
fn non_transient_kinds_have_no_delay() {
    assert_eq!(delay(ErrorKind::ClientError, 1, None), Duration::ZERO);
    assert_eq!(
        delay(ErrorKind::Systemic, 1, Some(Duration::from_secs(5))),
        Duration::ZERO
    );
}
