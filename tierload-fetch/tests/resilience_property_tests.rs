use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tierload_core::{CircuitState, FetchTarget, ManualClock, TierId};
use tierload_fetch::{Admission, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};

fn breaker(threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = CircuitBreakerConfig {
        failure_threshold: threshold,
        cooldown: Duration::from_secs(30),
    };
    (
        CircuitBreaker::new(FetchTarget::Tier(TierId::Secondary), config, clock.clone()),
        clock,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn backoff_is_monotonic_and_capped(
        base_ms in 1u64..2_000,
        max_ms in 1u64..20_000,
        multiplier in 1.0f64..4.0,
        retries in 1u32..12,
    ) {
        let policy = RetryPolicy {
            max_retries: retries,
            base: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter: Duration::ZERO,
        };
        let schedule = policy.schedule();
        prop_assert_eq!(schedule.len(), retries as usize);
        for pair in schedule.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        prop_assert!(schedule.iter().all(|d| *d <= Duration::from_millis(max_ms)));
    }

    #[test]
    fn breaker_opens_exactly_at_threshold(threshold in 1u32..10, failures in 0u32..20) {
        let (cb, _) = breaker(threshold);
        for _ in 0..failures {
            prop_assert_eq!(cb.admit(), Admission::Allowed);
            cb.record_failure();
            if cb.state() == CircuitState::Open {
                break;
            }
        }
        let expected = if failures >= threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        };
        prop_assert_eq!(cb.state(), expected);
    }

    #[test]
    fn open_breaker_rejects_until_cooldown(elapsed_secs in 0u64..60) {
        let (cb, clock) = breaker(1);
        cb.record_failure();
        clock.advance(Duration::from_secs(elapsed_secs));

        let admission = cb.admit();
        if elapsed_secs >= 30 {
            prop_assert_eq!(admission, Admission::Probe);
            let concurrent = cb.admit();
            let rejected = matches!(concurrent, Admission::Rejected { .. });
            prop_assert!(rejected, "second caller during probe admitted: {:?}", concurrent);
        } else {
            prop_assert_eq!(
                admission,
                Admission::Rejected { retry_after: Duration::from_secs(30 - elapsed_secs) }
            );
        }
    }
}
