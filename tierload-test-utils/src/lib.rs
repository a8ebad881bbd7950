//! tierload Test Utilities
//!
//! Shared test infrastructure for the tierload workspace:
//! - A scripted in-memory transport that records every call
//! - Proptest generators for tiers, params, and configs
//! - Fixtures for payloads and configs
//! - Assertions for gating and call ordering

pub use tierload_core::{
    AggregateState, FetchError, FetchParams, FetchTarget, GatingViolation, LoaderConfig, Payload,
    TierBundle, TierId, TierState, TierStatus,
};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tierload_fetch::DataTransport;
use tokio::time::Instant;

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

/// Point in a transport call's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Started,
    Succeeded,
    Failed,
}

/// One entry in the transport's call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub target: FetchTarget,
    pub phase: CallPhase,
    pub params: FetchParams,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    payloads: HashMap<TierId, Payload>,
    queued_failures: HashMap<FetchTarget, VecDeque<FetchError>>,
    sticky_failures: HashMap<FetchTarget, FetchError>,
    delays: HashMap<FetchTarget, Duration>,
    comprehensive: bool,
    log: Vec<CallEvent>,
}

/// In-memory [`DataTransport`] driven by a script.
///
/// By default every tier answers immediately with [`fixtures::tier_payload`]
/// and the combined endpoint is unsupported. Failures and delays can be
/// queued per target; every call is logged with its start and completion
/// time on the tokio clock.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that also answers comprehensive fetches.
    pub fn with_comprehensive() -> Self {
        let transport = Self::new();
        transport.script().comprehensive = true;
        transport
    }

    pub fn set_payload(&self, tier: TierId, payload: Payload) {
        self.script().payloads.insert(tier, payload);
    }

    pub fn set_delay(&self, target: impl Into<FetchTarget>, delay: Duration) {
        self.script().delays.insert(target.into(), delay);
    }

    /// Fail the next `times` calls to `target` with `error`.
    pub fn fail_next(&self, target: impl Into<FetchTarget>, times: usize, error: FetchError) {
        let mut script = self.script();
        let queue = script.queued_failures.entry(target.into()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Fail every call to `target` until [`recover`](Self::recover) is called.
    pub fn fail_always(&self, target: impl Into<FetchTarget>, error: FetchError) {
        self.script().sticky_failures.insert(target.into(), error);
    }

    pub fn recover(&self, target: impl Into<FetchTarget>) {
        let target = target.into();
        let mut script = self.script();
        script.sticky_failures.remove(&target);
        script.queued_failures.remove(&target);
    }

    /// Number of calls started for `target`.
    pub fn calls(&self, target: impl Into<FetchTarget>) -> usize {
        let target = target.into();
        self.script()
            .log
            .iter()
            .filter(|e| e.target == target && e.phase == CallPhase::Started)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.script()
            .log
            .iter()
            .filter(|e| e.phase == CallPhase::Started)
            .count()
    }

    /// Full call log in order.
    pub fn events(&self) -> Vec<CallEvent> {
        self.script().log.clone()
    }

    /// Targets in the order their calls started.
    pub fn call_order(&self) -> Vec<FetchTarget> {
        self.script()
            .log
            .iter()
            .filter(|e| e.phase == CallPhase::Started)
            .map(|e| e.target)
            .collect()
    }

    pub fn clear_log(&self) {
        self.script().log.clear();
    }

    /// Log the start, wait out any delay, then pick the scripted outcome.
    async fn run(&self, target: FetchTarget, params: &FetchParams) -> Result<(), FetchError> {
        let delay = {
            let mut script = self.script();
            script.log.push(CallEvent {
                target,
                phase: CallPhase::Started,
                params: params.clone(),
                at: Instant::now(),
            });
            script.delays.get(&target).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script();
        let outcome = match script
            .queued_failures
            .get_mut(&target)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => match script.sticky_failures.get(&target) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            },
        };
        script.log.push(CallEvent {
            target,
            phase: if outcome.is_ok() {
                CallPhase::Succeeded
            } else {
                CallPhase::Failed
            },
            params: params.clone(),
            at: Instant::now(),
        });
        outcome
    }

    fn payload(&self, tier: TierId) -> Payload {
        self.script()
            .payloads
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| fixtures::tier_payload(tier))
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DataTransport for ScriptedTransport {
    async fn fetch_data(&self, tier: TierId, params: &FetchParams) -> Result<Payload, FetchError> {
        self.run(FetchTarget::Tier(tier), params).await?;
        Ok(self.payload(tier))
    }

    async fn fetch_comprehensive(
        &self,
        params: &FetchParams,
    ) -> Result<Option<TierBundle>, FetchError> {
        if !self.script().comprehensive {
            return Ok(None);
        }
        self.run(FetchTarget::Comprehensive, params).await?;
        Ok(Some(TierBundle {
            critical: self.payload(TierId::Critical),
            secondary: self.payload(TierId::Secondary),
            detailed: self.payload(TierId::Detailed),
        }))
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("total_calls", &self.total_calls())
            .finish()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tierload types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_tier() -> impl Strategy<Value = TierId> {
        prop_oneof![
            Just(TierId::Critical),
            Just(TierId::Secondary),
            Just(TierId::Detailed),
        ]
    }

    pub fn arb_target() -> impl Strategy<Value = FetchTarget> {
        prop_oneof![
            arb_tier().prop_map(FetchTarget::Tier),
            Just(FetchTarget::Comprehensive),
        ]
    }

    /// Small query-parameter maps, including the empty map.
    pub fn arb_params() -> impl Strategy<Value = FetchParams> {
        prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,8}", 0..4)
            .prop_map(|map| map.into_iter().collect())
    }

    /// A random interleaving of tier load requests.
    pub fn arb_load_sequence(max_len: usize) -> impl Strategy<Value = Vec<TierId>> {
        prop::collection::vec(arb_tier(), 1..=max_len.max(1))
    }

    pub fn arb_transport_error(target: FetchTarget) -> impl Strategy<Value = FetchError> {
        "[a-z ]{1,20}".prop_map(move |message| FetchError::network(target, message))
    }

    /// Configs that always pass validation.
    pub fn arb_config() -> impl Strategy<Value = LoaderConfig> {
        (
            1u64..120_000,
            0u32..6,
            1u64..1_000,
            1u32..10,
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(
                |(ttl_ms, max_retries, backoff_base_ms, threshold, comprehensive, advance)| {
                    LoaderConfig {
                        critical_ttl_ms: ttl_ms,
                        secondary_ttl_ms: ttl_ms * 2,
                        detailed_ttl_ms: ttl_ms * 4,
                        max_retries,
                        backoff_base_ms,
                        breaker_failure_threshold: threshold,
                        comprehensive_enabled: comprehensive,
                        auto_advance: advance,
                        ..LoaderConfig::default()
                    }
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built payloads and configs for common scenarios.

    use super::*;
    use serde_json::json;

    /// Payload a tier returns unless scripted otherwise.
    pub fn tier_payload(tier: TierId) -> Payload {
        match tier {
            TierId::Critical => json!({ "tier": "critical", "activeUsers": 42, "alerts": 1 }),
            TierId::Secondary => json!({ "tier": "secondary", "charts": [3, 5, 8] }),
            TierId::Detailed => json!({ "tier": "detailed", "rows": [{ "id": 1 }, { "id": 2 }] }),
        }
    }

    pub fn bundle() -> TierBundle {
        TierBundle {
            critical: tier_payload(TierId::Critical),
            secondary: tier_payload(TierId::Secondary),
            detailed: tier_payload(TierId::Detailed),
        }
    }

    /// Defaults with auto-advance and the combined fetch turned off, so a
    /// test controls exactly which tiers load.
    pub fn manual_config() -> LoaderConfig {
        LoaderConfig {
            auto_advance: false,
            comprehensive_enabled: false,
            ..LoaderConfig::default()
        }
    }

    pub fn network_error(target: impl Into<FetchTarget>) -> FetchError {
        FetchError::network(target, "connection reset by peer")
    }

    pub fn params() -> FetchParams {
        FetchParams::new().with("range", "7d")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for tierload-specific invariants.

    use super::*;

    /// Assert that a tier load was rejected for gating.
    #[track_caller]
    pub fn assert_gated(result: &Result<TierState, GatingViolation>, tier: TierId) {
        match result {
            Err(violation) => assert_eq!(violation.tier, tier, "Wrong tier in GatingViolation"),
            other => panic!("Expected GatingViolation for {}, got: {:?}", tier, other),
        }
    }

    #[track_caller]
    pub fn assert_status(state: &TierState, status: TierStatus) {
        assert_eq!(
            state.status, status,
            "Tier {} in unexpected status: {:?}",
            state.tier, state
        );
    }

    /// Assert that no tier in `snapshot` is loading while its dependency is
    /// unmet.
    #[track_caller]
    pub fn assert_loading_gated(snapshot: &AggregateState) {
        for state in snapshot.tiers() {
            if state.is_loading() && !snapshot.dependency_met(state.tier) {
                panic!(
                    "{} loading before its dependency succeeded: {:?}",
                    state.tier, snapshot
                );
            }
        }
    }

    /// Assert that no call to a tier started before a call to its
    /// dependency had succeeded.
    #[track_caller]
    pub fn assert_dependency_order(events: &[CallEvent]) {
        for (index, event) in events.iter().enumerate() {
            let FetchTarget::Tier(tier) = event.target else {
                continue;
            };
            let Some(dependency) = tier.dependency() else {
                continue;
            };
            if event.phase != CallPhase::Started {
                continue;
            }
            let dependency_succeeded = events[..index].iter().any(|e| {
                e.phase == CallPhase::Succeeded
                    && matches!(e.target, FetchTarget::Tier(t) if t == dependency)
            });
            assert!(
                dependency_succeeded,
                "{} fetch started before any {} fetch succeeded: {:?}",
                tier, dependency, events
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
