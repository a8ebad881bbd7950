//! Per-target circuit breaker.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tierload_core::config::{DEFAULT_BREAKER_COOLDOWN_MS, DEFAULT_BREAKER_FAILURE_THRESHOLD};
use tierload_core::{
    elapsed_between, CircuitBreakerState, CircuitState, Clock, FetchTarget, LoaderConfig,
};

/// Configuration for circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failed calls (after retries) before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is let through.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            cooldown: Duration::from_millis(DEFAULT_BREAKER_COOLDOWN_MS),
        }
    }
}

impl From<&LoaderConfig> for CircuitBreakerConfig {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            failure_threshold: config.breaker_failure_threshold,
            cooldown: config.breaker_cooldown(),
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; the call may retry normally.
    Allowed,
    /// Cooldown elapsed; this call is the single half-open probe.
    Probe,
    /// Short-circuited without touching the transport.
    Rejected { retry_after: Duration },
}

/// Circuit breaker guarding one fetch target.
///
/// Counts calls that failed after exhausting their retries. At
/// `failure_threshold` the circuit opens for `cooldown`; the first call after
/// that becomes a probe, and any other call arriving while the probe is out
/// is rejected.
pub struct CircuitBreaker {
    target: FetchTarget,
    state: AtomicU8,
    failure_count: AtomicU32,
    probe_in_flight: AtomicBool,
    opened_at: RwLock<Option<DateTime<Utc>>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(target: FetchTarget, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            target,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            probe_in_flight: AtomicBool::new(false),
            opened_at: RwLock::new(None),
            config,
            clock,
        }
    }

    pub fn target(&self) -> FetchTarget {
        self.target
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Decide whether a call may reach the transport.
    pub fn admit(&self) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let remaining = self.cooldown_remaining();
                if !remaining.is_zero() {
                    return Admission::Rejected {
                        retry_after: remaining,
                    };
                }
                let promoted = self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
                if promoted {
                    self.probe_in_flight.store(true, Ordering::SeqCst);
                    tracing::info!(target_name = %self.target, "Circuit half-open, sending probe");
                    Admission::Probe
                } else {
                    self.admit()
                }
            }
            CircuitState::HalfOpen => {
                let claimed = self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if claimed {
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                }
            }
        }
    }

    /// A call succeeded: close the circuit and clear the failure count.
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        if self.state() != CircuitState::Closed {
            tracing::info!(target_name = %self.target, "Circuit closed");
        }
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.set_opened_at(None);
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    /// A call failed after exhausting its retries.
    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let probing = self.state() == CircuitState::HalfOpen;
        if probing || count >= self.config.failure_threshold {
            self.open();
        }
        self.probe_in_flight.store(false, Ordering::SeqCst);
    }

    /// The dependency answered, but with a payload the caller rejected.
    ///
    /// Leaves the failure count alone. A probe answered this way still
    /// proves the target reachable, so the circuit closes.
    pub fn record_answered(&self) {
        if self.state() == CircuitState::HalfOpen {
            self.record_success();
        }
    }

    /// Re-open after a probe that never reported back.
    pub fn abandon_probe(&self) {
        if self.probe_in_flight.swap(false, Ordering::SeqCst) {
            tracing::debug!(target_name = %self.target, "Probe abandoned, reopening circuit");
            self.open();
        }
    }

    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.probe_in_flight.store(false, Ordering::SeqCst);
        self.set_opened_at(None);
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            target: self.target,
            failure_count: self.failure_count(),
            state: self.state(),
            opened_at: *self.opened_at.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn open(&self) {
        self.set_opened_at(Some(self.clock.now()));
        let previous = self.state.swap(CircuitState::Open as u8, Ordering::SeqCst);
        if previous != CircuitState::Open as u8 {
            tracing::warn!(
                target_name = %self.target,
                failure_count = self.failure_count(),
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    fn cooldown_remaining(&self) -> Duration {
        let opened_at = *self.opened_at.read().unwrap_or_else(PoisonError::into_inner);
        match opened_at {
            Some(at) => self
                .config
                .cooldown
                .saturating_sub(elapsed_between(at, self.clock.now())),
            None => Duration::ZERO,
        }
    }

    fn set_opened_at(&self, value: Option<DateTime<Utc>>) {
        *self.opened_at.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .finish()
    }
}

/// Re-opens the circuit if a probe is dropped before recording an outcome.
pub(crate) struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl<'a> ProbeGuard<'a> {
    pub(crate) fn new(breaker: &'a CircuitBreaker) -> Self {
        Self { breaker }
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.breaker.abandon_probe();
    }
}
