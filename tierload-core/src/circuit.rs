//! Circuit breaker data model.
//!
//! The breaker logic itself lives in `tierload-fetch`; this module only holds
//! the states and snapshots shared with the loader and its consumers.

use crate::TierId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Something the resilient fetcher calls: one tier, or the combined fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchTarget {
    Tier(TierId),
    Comprehensive,
}

impl FetchTarget {
    /// Every target that owns a breaker.
    pub const ALL: [FetchTarget; 4] = [
        FetchTarget::Tier(TierId::Critical),
        FetchTarget::Tier(TierId::Secondary),
        FetchTarget::Tier(TierId::Detailed),
        FetchTarget::Comprehensive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier(tier) => tier.as_str(),
            Self::Comprehensive => crate::COMPREHENSIVE_NAMESPACE,
        }
    }
}

impl From<TierId> for FetchTarget {
    fn from(tier: TierId) -> Self {
        Self::Tier(tier)
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, a single probe is allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub target: FetchTarget,
    pub failure_count: u32,
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    pub fn closed(target: FetchTarget) -> Self {
        Self {
            target,
            failure_count: 0,
            state: CircuitState::Closed,
            opened_at: None,
        }
    }
}
