//! Retry with exponential backoff, per-attempt timeouts and circuit breaking.

use crate::breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, ProbeGuard};
use crate::listener::{ErrorEvent, ListenerChain, RequestEvent, ResponseEvent};
use crate::transport::DataTransport;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tierload_core::config::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_MULTIPLIER,
    DEFAULT_MAX_RETRIES,
};
use tierload_core::{
    CircuitBreakerState, Clock, FetchError, FetchParams, FetchRequest, FetchTarget, HealthCheck,
    LoaderConfig, Payload, TierBundle, TierId, TransportError,
};
use uuid::Uuid;

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Exponential backoff schedule.
///
/// The delay before retry `n` (0-based) is
/// `min(base * multiplier^n, max_delay)` plus up to `jitter` of random slack.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: Duration::ZERO,
        }
    }
}

impl From<&LoaderConfig> for RetryPolicy {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: config.backoff_base(),
            max_delay: config.backoff_max(),
            multiplier: config.backoff_multiplier,
            jitter: Duration::from_millis(config.backoff_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed for one call.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry `retry` without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        if !scaled.is_finite() || scaled >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(scaled.round() as u64)
        }
    }

    /// Backoff before retry `retry` with jitter applied.
    pub fn delay(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Un-jittered delays for every retry in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.backoff(n)).collect()
    }
}

// ============================================================================
// RESILIENT FETCHER
// ============================================================================

/// Result of one resilient call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    pub result: Result<T, FetchError>,
    /// Transport invocations made (0 when short-circuited)
    pub attempts: u32,
}

impl<T> FetchOutcome<T> {
    pub fn into_result(self) -> Result<T, FetchError> {
        self.result
    }
}

/// Wraps transport calls with a breaker per [`FetchTarget`], bounded retries
/// and a hard timeout on every attempt.
pub struct ResilientFetcher {
    breakers: [Arc<CircuitBreaker>; 4],
    policy: RetryPolicy,
    request_timeout: Duration,
    listeners: ListenerChain,
    clock: Arc<dyn Clock>,
}

impl ResilientFetcher {
    pub fn new(config: &LoaderConfig, clock: Arc<dyn Clock>) -> Self {
        let breaker_config = CircuitBreakerConfig::from(config);
        let breakers = FetchTarget::ALL.map(|target| {
            Arc::new(CircuitBreaker::new(
                target,
                breaker_config.clone(),
                Arc::clone(&clock),
            ))
        });
        Self {
            breakers,
            policy: RetryPolicy::from(config),
            request_timeout: config.request_timeout(),
            listeners: ListenerChain::new(),
            clock,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_listeners(mut self, listeners: ListenerChain) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self, target: FetchTarget) -> &Arc<CircuitBreaker> {
        let slot = match target {
            FetchTarget::Tier(tier) => tier.index(),
            FetchTarget::Comprehensive => 3,
        };
        &self.breakers[slot]
    }

    pub fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }

    pub fn health(&self) -> Vec<HealthCheck> {
        self.breakers
            .iter()
            .map(|b| HealthCheck::from(&b.snapshot()))
            .collect()
    }

    pub fn reset_breakers(&self) {
        for breaker in &self.breakers {
            breaker.reset();
        }
    }

    /// Fetch one tier through the transport.
    pub async fn fetch_tier(
        &self,
        transport: &dyn DataTransport,
        request: &FetchRequest,
    ) -> FetchOutcome<Payload> {
        let tier: TierId = request.tier;
        self.execute(FetchTarget::Tier(tier), || {
            transport.fetch_data(tier, &request.params)
        })
        .await
    }

    /// Run the combined fetch. `Ok(None)` means the transport has no
    /// combined endpoint.
    pub async fn fetch_comprehensive(
        &self,
        transport: &dyn DataTransport,
        params: &FetchParams,
    ) -> FetchOutcome<Option<TierBundle>> {
        self.execute(FetchTarget::Comprehensive, || {
            transport.fetch_comprehensive(params)
        })
        .await
    }

    /// Run `op` under the breaker for `target`, retrying transport failures.
    ///
    /// A half-open probe gets exactly one attempt. Validation failures are
    /// returned immediately and do not count against the breaker.
    pub async fn execute<T, F, Fut>(&self, target: FetchTarget, mut op: F) -> FetchOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let request_id = Uuid::now_v7();
        let breaker = Arc::clone(self.breaker(target));

        let (max_attempts, _probe) = match breaker.admit() {
            Admission::Allowed => (self.policy.max_attempts(), None),
            Admission::Probe => (1, Some(ProbeGuard::new(&breaker))),
            Admission::Rejected { retry_after } => {
                let err = FetchError::BreakerOpen {
                    target,
                    retry_after,
                };
                tracing::debug!(
                    target_name = %target,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit open, short-circuiting fetch"
                );
                self.listeners
                    .emit_error(ErrorEvent {
                        request_id,
                        target,
                        attempt: 0,
                        error_message: err.to_string(),
                        will_retry: false,
                        timestamp: self.clock.now(),
                    })
                    .await;
                return FetchOutcome {
                    result: Err(err),
                    attempts: 0,
                };
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.listeners
                .emit_request(RequestEvent {
                    request_id,
                    target,
                    attempt,
                    timestamp: self.clock.now(),
                })
                .await;

            let started = tokio::time::Instant::now();
            let result = match tokio::time::timeout(self.request_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Transport(TransportError::Timeout {
                    target,
                    after: self.request_timeout,
                })),
            };

            match result {
                Ok(value) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.listeners
                        .emit_response(ResponseEvent {
                            request_id,
                            target,
                            attempt,
                            latency_ms,
                            timestamp: self.clock.now(),
                        })
                        .await;
                    breaker.record_success();
                    tracing::debug!(target_name = %target, attempt, latency_ms, "Fetch succeeded");
                    return FetchOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    let will_retry = err.is_retryable() && attempt < max_attempts;
                    self.listeners
                        .emit_error(ErrorEvent {
                            request_id,
                            target,
                            attempt,
                            error_message: err.to_string(),
                            will_retry,
                            timestamp: self.clock.now(),
                        })
                        .await;

                    if will_retry {
                        let delay = self.policy.delay(attempt - 1);
                        tracing::warn!(
                            target_name = %target,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if err.counts_against_breaker() {
                        breaker.record_failure();
                    } else {
                        breaker.record_answered();
                    }
                    tracing::warn!(
                        target_name = %target,
                        attempts = attempt,
                        error = %err,
                        "Fetch failed"
                    );
                    return FetchOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

impl Default for ResilientFetcher {
    fn default() -> Self {
        Self::new(&LoaderConfig::default(), Arc::new(tierload_core::SystemClock))
    }
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("policy", &self.policy)
            .field("request_timeout", &self.request_timeout)
            .field("listeners", &self.listeners)
            .finish()
    }
}
