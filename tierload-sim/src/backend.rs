//! Synthetic data source standing in for a dashboard API.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tierload_core::{FetchError, FetchParams, FetchTarget, Payload, TierBundle, TierId};
use tierload_fetch::DataTransport;

/// Transport that answers after a random delay and fails at a fixed rate.
#[derive(Debug)]
pub struct SyntheticBackend {
    failure_rate: f64,
    max_latency: Duration,
    comprehensive: bool,
    calls: AtomicU64,
}

impl SyntheticBackend {
    pub fn new(failure_rate: f64, max_latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            max_latency,
            comprehensive: true,
            calls: AtomicU64::new(0),
        }
    }

    /// Disable the combined endpoint.
    pub fn without_comprehensive(mut self) -> Self {
        self.comprehensive = false;
        self
    }

    /// Transport calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Roll latency and outcome up front; the thread-local rng must not
    /// live across an await.
    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::rng();
        let max_ms = u64::try_from(self.max_latency.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(rng.random_range(0..=max_ms));
        let fails = rng.random_bool(self.failure_rate);
        (delay, fails)
    }

    async fn simulate(&self, target: FetchTarget) -> Result<u64, FetchError> {
        let sequence = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let (delay, fails) = self.roll();
        tokio::time::sleep(delay).await;
        if fails {
            tracing::debug!(target_name = %target, sequence, "Synthetic failure");
            return Err(FetchError::network(target, "synthetic upstream failure"));
        }
        Ok(sequence)
    }
}

fn tier_body(tier: TierId, params: &FetchParams, sequence: u64) -> Value {
    match tier {
        TierId::Critical => json!({
            "tier": tier.as_str(),
            "params": params.canonical(),
            "activeUsers": 40 + sequence % 17,
            "alerts": sequence % 3,
        }),
        TierId::Secondary => {
            let throughput: Vec<u64> = [12, 18, 9, 21].iter().map(|v| v + sequence).collect();
            json!({
                "tier": tier.as_str(),
                "params": params.canonical(),
                "throughput": throughput,
            })
        }
        TierId::Detailed => json!({
            "tier": tier.as_str(),
            "params": params.canonical(),
            "rows": (0..5).map(|i| json!({ "id": i, "seq": sequence })).collect::<Vec<_>>(),
        }),
    }
}

#[async_trait]
impl DataTransport for SyntheticBackend {
    async fn fetch_data(&self, tier: TierId, params: &FetchParams) -> Result<Payload, FetchError> {
        let sequence = self.simulate(FetchTarget::from(tier)).await?;
        Ok(tier_body(tier, params, sequence))
    }

    async fn fetch_comprehensive(
        &self,
        params: &FetchParams,
    ) -> Result<Option<TierBundle>, FetchError> {
        if !self.comprehensive {
            return Ok(None);
        }
        let sequence = self.simulate(FetchTarget::Comprehensive).await?;
        Ok(Some(TierBundle {
            critical: tier_body(TierId::Critical, params, sequence),
            secondary: tier_body(TierId::Secondary, params, sequence),
            detailed: tier_body(TierId::Detailed, params, sequence),
        }))
    }
}
