use proptest::prelude::*;
use std::sync::Arc;
use tierload_core::{CircuitState, FetchError, FetchTarget, LoaderConfig, ManualClock, TierId};
use tierload_fetch::{ResilientFetcher, RetryPolicy};
use tierload_loader::TieredLoader;
use tierload_test_utils::generators::{arb_config, arb_target, arb_transport_error};
use tierload_test_utils::ScriptedTransport;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("tokio runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn generated_configs_validate_and_build(config in arb_config()) {
        prop_assert!(config.validate().is_ok());
        prop_assert!(config.ttl_for(TierId::Critical) <= config.ttl_for(TierId::Detailed));

        let policy = RetryPolicy::from(&config);
        prop_assert_eq!(policy.schedule().len(), config.max_retries as usize);
        prop_assert_eq!(policy.max_attempts(), config.max_retries + 1);

        let built = runtime().block_on(async {
            TieredLoader::new(Arc::new(ScriptedTransport::new()), config.clone()).is_ok()
        });
        prop_assert!(built);
    }

    #[test]
    fn exhausted_failures_open_only_the_failing_target(
        (target, error) in arb_target().prop_flat_map(|t| (Just(t), arb_transport_error(t))),
        threshold in 1u32..5,
    ) {
        runtime().block_on(async {
            let config = LoaderConfig {
                breaker_failure_threshold: threshold,
                ..LoaderConfig::default()
            };
            let fetcher = ResilientFetcher::new(&config, Arc::new(ManualClock::new()))
                .with_policy(RetryPolicy {
                    max_retries: 0,
                    ..RetryPolicy::default()
                });

            for _ in 0..threshold {
                let outcome = fetcher
                    .execute(target, || {
                        let error = error.clone();
                        async move { Err::<(), FetchError>(error) }
                    })
                    .await;
                assert_eq!(outcome.attempts, 1);
            }
            for other in FetchTarget::ALL {
                let expected = if other == target {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                };
                assert_eq!(fetcher.breaker(other).state(), expected, "breaker for {}", other);
            }

            let rejected = fetcher
                .execute(target, || async { Ok::<(), FetchError>(()) })
                .await;
            assert_eq!(rejected.attempts, 0);
            assert!(matches!(rejected.result, Err(FetchError::BreakerOpen { .. })));

            fetcher.reset_breakers();
            assert!(fetcher
                .breaker_states()
                .iter()
                .all(|b| b.state == CircuitState::Closed && b.failure_count == 0));
        });
    }
}
