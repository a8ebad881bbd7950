use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tierload_core::{
    CircuitState, ErrorKind, FetchError, FetchParams, FetchTarget, HealthStatus, LoaderConfig,
    OverallStatus, TierId, TierStatus,
};
use tierload_loader::{LoaderContext, TieredLoader};
use tierload_test_utils::assertions::{
    assert_dependency_order, assert_gated, assert_loading_gated, assert_status,
};
use tierload_test_utils::CallPhase;
use tierload_test_utils::fixtures::{self, manual_config, network_error};
use tierload_test_utils::ScriptedTransport;

fn loader(transport: &Arc<ScriptedTransport>, config: LoaderConfig) -> TieredLoader {
    TieredLoader::new(transport.clone(), config).expect("valid config")
}

#[tokio::test(start_paused = true)]
async fn critical_is_cached_for_its_ttl() {
    let transport = Arc::new(ScriptedTransport::new());
    let loader = loader(&transport, manual_config());
    let params = fixtures::params();

    let first = loader.load_tier(TierId::Critical, params.clone()).await.expect("ungated");
    assert!(!first.from_cache);

    tokio::time::advance(Duration::from_millis(100)).await;
    let cached = loader.load_tier(TierId::Critical, params.clone()).await.expect("ungated");
    assert!(cached.from_cache);
    assert_eq!(cached.data, Some(fixtures::tier_payload(TierId::Critical)));
    assert_eq!(transport.calls(TierId::Critical), 1);

    tokio::time::advance(Duration::from_millis(15_900)).await;
    let refreshed = loader.load_tier(TierId::Critical, params).await.expect("ungated");
    assert!(!refreshed.from_cache);
    assert_eq!(transport.calls(TierId::Critical), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_next(TierId::Critical, 3, network_error(TierId::Critical));
    let loader = loader(&transport, manual_config());

    let started = tokio::time::Instant::now();
    let state = loader
        .load_tier(TierId::Critical, FetchParams::new())
        .await
        .expect("ungated");

    assert_status(&state, TierStatus::Success);
    assert_eq!(transport.calls(TierId::Critical), 4);
    assert_eq!(started.elapsed(), Duration::from_millis(300 + 600 + 1200));
}

#[tokio::test(start_paused = true)]
async fn validation_failure_is_terminal_without_retry() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_next(
        TierId::Critical,
        1,
        FetchError::validation(TierId::Critical, "missing activeUsers"),
    );
    let loader = loader(&transport, manual_config());

    let state = loader
        .load_tier(TierId::Critical, FetchParams::new())
        .await
        .expect("ungated");

    assert_status(&state, TierStatus::Error);
    let error = state.error.expect("error details");
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.attempts, 1);
    assert_eq!(transport.calls(TierId::Critical), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_loads_share_one_fetch() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_delay(TierId::Critical, Duration::from_millis(50));
    let loader = loader(&transport, manual_config());

    let loads = (0..10).map(|_| loader.load_tier(TierId::Critical, fixtures::params()));
    let results = join_all(loads).await;

    assert_eq!(transport.calls(TierId::Critical), 1);
    for result in results {
        let state = result.expect("ungated");
        assert_eq!(state.data, Some(fixtures::tier_payload(TierId::Critical)));
    }
    assert_eq!(loader.context().deduplicator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn gated_tier_is_rejected_without_side_effects() {
    let transport = Arc::new(ScriptedTransport::new());
    let loader = loader(&transport, manual_config());
    let subscription = loader.subscribe();
    let before = loader.aggregate();

    let result = loader.load_tier(TierId::Secondary, FetchParams::new()).await;

    assert_gated(&result, TierId::Secondary);
    let violation = result.expect_err("gated");
    assert_eq!(violation.requires, TierId::Critical);
    assert_eq!(violation.found, TierStatus::Idle);
    assert_eq!(loader.aggregate(), before);
    assert_eq!(subscription.current(), before);
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_then_probes_once_after_cooldown() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_always(TierId::Critical, network_error(TierId::Critical));
    let config = LoaderConfig {
        max_retries: 0,
        breaker_failure_threshold: 2,
        ..manual_config()
    };
    let loader = loader(&transport, config);
    let params = FetchParams::new();

    for _ in 0..2 {
        loader.load_tier(TierId::Critical, params.clone()).await.expect("ungated");
    }
    assert_eq!(transport.calls(TierId::Critical), 2);

    let short_circuited = loader
        .load_tier(TierId::Critical, params.clone())
        .await
        .expect("ungated");
    let error = short_circuited.error.expect("error details");
    assert_eq!(error.kind, ErrorKind::BreakerOpen);
    assert_eq!(error.attempts, 0);
    assert_eq!(transport.calls(TierId::Critical), 2);

    let critical_breaker = loader.breaker_states()[0].clone();
    assert_eq!(critical_breaker.target, FetchTarget::Tier(TierId::Critical));
    assert_eq!(critical_breaker.state, CircuitState::Open);
    assert_eq!(loader.health()[0].status, HealthStatus::Unhealthy);

    tokio::time::advance(Duration::from_secs(30)).await;
    loader.load_tier(TierId::Critical, params.clone()).await.expect("ungated");
    assert_eq!(transport.calls(TierId::Critical), 3);
    assert_eq!(loader.breaker_states()[0].state, CircuitState::Open);

    transport.recover(TierId::Critical);
    tokio::time::advance(Duration::from_secs(30)).await;
    let recovered = loader.load_tier(TierId::Critical, params).await.expect("ungated");
    assert_status(&recovered, TierStatus::Success);
    assert_eq!(loader.breaker_states()[0].state, CircuitState::Closed);
    assert_eq!(loader.breaker_states()[0].failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn terminal_error_keeps_last_known_good_data() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = LoaderConfig {
        max_retries: 0,
        ..manual_config()
    };
    let loader = loader(&transport, config);
    loader.load_tier(TierId::Critical, FetchParams::new()).await.expect("ungated");

    tokio::time::advance(Duration::from_secs(16)).await;
    transport.fail_always(TierId::Critical, network_error(TierId::Critical));
    let state = loader
        .load_tier(TierId::Critical, FetchParams::new())
        .await
        .expect("ungated");

    assert_status(&state, TierStatus::Error);
    assert!(state.stale);
    assert_eq!(state.data, Some(fixtures::tier_payload(TierId::Critical)));
    assert_eq!(loader.aggregate().overall, OverallStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn expired_cache_entry_backs_a_fresh_session_error() {
    let transport = Arc::new(ScriptedTransport::new());
    let context = LoaderContext::in_memory(100);
    let config = LoaderConfig {
        max_retries: 0,
        ..manual_config()
    };
    let warm = TieredLoader::builder(transport.clone())
        .config(config.clone())
        .context(context.clone())
        .build()
        .expect("valid config");
    warm.load_tier(TierId::Critical, FetchParams::new()).await.expect("ungated");

    tokio::time::advance(Duration::from_secs(20)).await;
    transport.fail_always(TierId::Critical, network_error(TierId::Critical));
    let cold = TieredLoader::builder(transport.clone())
        .config(config)
        .context(context)
        .build()
        .expect("valid config");
    let state = cold
        .load_tier(TierId::Critical, FetchParams::new())
        .await
        .expect("ungated");

    assert_status(&state, TierStatus::Error);
    assert!(state.stale);
    assert!(state.data.is_some());
}

#[tokio::test(start_paused = true)]
async fn sessions_sharing_a_context_share_the_cache() {
    let transport = Arc::new(ScriptedTransport::new());
    let context = LoaderContext::in_memory(100);
    let first = TieredLoader::builder(transport.clone())
        .config(manual_config())
        .context(context.clone())
        .build()
        .expect("valid config");
    let second = TieredLoader::builder(transport.clone())
        .config(manual_config())
        .context(context)
        .build()
        .expect("valid config");

    first.load_tier(TierId::Critical, FetchParams::new()).await.expect("ungated");
    // Sessions are separate even when the cache is shared.
    assert_eq!(second.aggregate().overall, OverallStatus::Idle);
    let gated = second.load_tier(TierId::Secondary, FetchParams::new()).await;
    assert_gated(&gated, TierId::Secondary);

    let state = second
        .load_tier(TierId::Critical, FetchParams::new())
        .await
        .expect("ungated");
    assert!(state.from_cache);
    assert_eq!(transport.calls(TierId::Critical), 1);
}

#[tokio::test(start_paused = true)]
async fn auto_advance_loads_every_tier() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = LoaderConfig {
        comprehensive_enabled: false,
        ..LoaderConfig::default()
    };
    let loader = loader(&transport, config);

    loader.load_tier(TierId::Critical, FetchParams::new()).await.expect("ungated");
    loader.settle().await;

    let aggregate = loader.aggregate();
    assert_eq!(aggregate.overall, OverallStatus::Success);
    assert!(aggregate.tiers().iter().all(|t| t.is_success()));
    assert_eq!(
        transport.call_order(),
        vec![
            FetchTarget::Tier(TierId::Critical),
            FetchTarget::Tier(TierId::Secondary),
            FetchTarget::Tier(TierId::Detailed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn dashboard_sequence_stops_at_first_failed_tier() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_always(TierId::Secondary, network_error(TierId::Secondary));
    let config = LoaderConfig {
        max_retries: 0,
        ..manual_config()
    };
    let loader = loader(&transport, config);

    let aggregate = loader.load_dashboard(FetchParams::new()).await;

    assert_status(&aggregate.critical, TierStatus::Success);
    assert_status(&aggregate.secondary, TierStatus::Error);
    assert_status(&aggregate.detailed, TierStatus::Idle);
    assert_eq!(aggregate.overall, OverallStatus::Error);
    assert_eq!(transport.calls(TierId::Detailed), 0);
}

#[tokio::test(start_paused = true)]
async fn dashboard_prefers_comprehensive_fetch() {
    let transport = Arc::new(ScriptedTransport::with_comprehensive());
    let loader = loader(&transport, LoaderConfig::default());
    let params = fixtures::params();

    let aggregate = loader.load_dashboard(params.clone()).await;

    assert!(aggregate.comprehensive);
    assert_eq!(aggregate.overall, OverallStatus::Success);
    assert_eq!(aggregate.detailed.data, Some(fixtures::tier_payload(TierId::Detailed)));
    assert_eq!(transport.calls(FetchTarget::Comprehensive), 1);

    // Comprehensive results also warm the per-tier cache.
    let detailed = loader.load_tier(TierId::Detailed, params).await.expect("ungated");
    assert!(detailed.from_cache);
    assert_eq!(transport.calls(TierId::Detailed), 0);
}

#[tokio::test(start_paused = true)]
async fn comprehensive_fetch_in_flight_keeps_later_tiers_gated() {
    let transport = Arc::new(ScriptedTransport::with_comprehensive());
    transport.set_delay(FetchTarget::Comprehensive, Duration::from_millis(100));
    let loader = loader(&transport, LoaderConfig::default());
    let mut subscription = loader.subscribe();

    let background = loader.clone();
    let load = tokio::spawn(async move { background.load_dashboard(FetchParams::new()).await });

    let in_flight = subscription.changed().await.expect("loader alive");
    assert_loading_gated(&in_flight);
    assert!(!in_flight.comprehensive);
    assert_eq!(in_flight.critical.status, TierStatus::Loading);
    assert_eq!(in_flight.secondary.status, TierStatus::Idle);
    assert_eq!(in_flight.detailed.status, TierStatus::Idle);

    let mut last = in_flight;
    while last.overall != OverallStatus::Success {
        last = subscription.changed().await.expect("loader alive");
        assert_loading_gated(&last);
    }
    assert!(last.comprehensive);
    assert!(last.tiers().iter().all(|t| t.is_success()));
    load.await.expect("task");
}

#[tokio::test(start_paused = true)]
async fn dashboard_falls_back_when_comprehensive_fails() {
    let transport = Arc::new(ScriptedTransport::with_comprehensive());
    transport.fail_always(FetchTarget::Comprehensive, network_error(FetchTarget::Comprehensive));
    let config = LoaderConfig {
        max_retries: 0,
        ..LoaderConfig::default()
    };
    let loader = loader(&transport, config);

    let aggregate = loader.load_dashboard(FetchParams::new()).await;

    assert!(!aggregate.comprehensive);
    assert_eq!(aggregate.overall, OverallStatus::Success);
    assert_eq!(
        transport.call_order(),
        vec![
            FetchTarget::Comprehensive,
            FetchTarget::Tier(TierId::Critical),
            FetchTarget::Tier(TierId::Secondary),
            FetchTarget::Tier(TierId::Detailed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn refetch_all_bypasses_fresh_cache_in_order() {
    let transport = Arc::new(ScriptedTransport::new());
    let loader = loader(&transport, manual_config());
    loader.load_dashboard(FetchParams::new()).await;

    // Critical has expired, detailed is still fresh.
    tokio::time::advance(Duration::from_secs(20)).await;
    transport.clear_log();
    let aggregate = loader.refetch_all(FetchParams::new()).await;

    assert_eq!(aggregate.overall, OverallStatus::Success);
    assert!(aggregate.tiers().iter().all(|t| !t.from_cache));
    assert_eq!(
        transport.call_order(),
        vec![
            FetchTarget::Tier(TierId::Critical),
            FetchTarget::Tier(TierId::Secondary),
            FetchTarget::Tier(TierId::Detailed),
        ]
    );
    assert_dependency_order(&transport.events());
}

#[tokio::test(start_paused = true)]
async fn refetch_all_waits_out_earlier_request_instead_of_joining() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_delay(TierId::Critical, Duration::from_millis(100));
    let loader = loader(&transport, manual_config());

    let background = loader.clone();
    let earlier = tokio::spawn(async move {
        background
            .load_tier(TierId::Critical, FetchParams::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let aggregate = loader.refetch_all(FetchParams::new()).await;
    earlier.await.expect("task").expect("ungated");

    assert_eq!(aggregate.overall, OverallStatus::Success);
    assert_eq!(transport.calls(TierId::Critical), 2);
    let critical_phases: Vec<CallPhase> = transport
        .events()
        .iter()
        .filter(|e| e.target == FetchTarget::Tier(TierId::Critical))
        .map(|e| e.phase)
        .collect();
    assert_eq!(
        critical_phases,
        vec![
            CallPhase::Started,
            CallPhase::Succeeded,
            CallPhase::Started,
            CallPhase::Succeeded,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn invalidate_session_resets_state_and_cache() {
    let transport = Arc::new(ScriptedTransport::new());
    let loader = loader(&transport, manual_config());
    loader.load_dashboard(FetchParams::new()).await;
    assert_eq!(transport.total_calls(), 3);

    loader.invalidate_session();

    let aggregate = loader.aggregate();
    assert_eq!(aggregate.overall, OverallStatus::Idle);
    assert!(!aggregate.comprehensive);
    assert_eq!(loader.context().cache.stats().entry_count, 0);

    let state = loader
        .load_tier(TierId::Critical, FetchParams::new())
        .await
        .expect("ungated");
    assert!(!state.from_cache);
    assert_eq!(transport.calls(TierId::Critical), 2);
}

#[tokio::test(start_paused = true)]
async fn subscribers_observe_progress() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_delay(TierId::Critical, Duration::from_millis(100));
    let loader = loader(&transport, manual_config());
    let mut subscription = loader.subscribe();

    let background = loader.clone();
    let load = tokio::spawn(async move {
        background
            .load_tier(TierId::Critical, FetchParams::new())
            .await
    });

    let loading = subscription.changed().await.expect("loader alive");
    assert_eq!(loading.overall, OverallStatus::Loading);

    let done = subscription.changed().await.expect("loader alive");
    assert_eq!(done.overall, OverallStatus::Success);
    load.await.expect("task").expect("ungated");

    subscription.unsubscribe();
}
