//! Per-tier loading state and the aggregated view built from it.

use crate::{FetchError, TierId, TransportError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// TIER STATUS
// ============================================================================

/// Lifecycle status of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierStatus {
    /// Not requested in this session
    #[default]
    Idle,
    /// A fetch (or retry) is in progress
    Loading,
    /// Data is available and current
    Success,
    /// Terminal failure; retries exhausted or not applicable
    Error,
}

impl TierStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// - any status may be reset to `Idle`
    /// - `Loading` is entered from `Idle`, `Success` (refresh) or `Error` (retry)
    /// - `Success` may be reached from anywhere (fetch completion, cache hit,
    ///   comprehensive population)
    /// - `Error` is only reached from `Loading`
    pub fn can_transition_to(&self, next: TierStatus) -> bool {
        match next {
            TierStatus::Idle | TierStatus::Success => true,
            TierStatus::Loading => !matches!(self, TierStatus::Loading),
            TierStatus::Error => matches!(self, TierStatus::Loading),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

// ============================================================================
// TIER ERRORS
// ============================================================================

/// Classification of a terminal tier failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Timeout,
    Validation,
    BreakerOpen,
    Internal,
}

impl From<&FetchError> for ErrorKind {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::Transport(TransportError::Network { .. }) => Self::Transport,
            FetchError::Transport(TransportError::Timeout { .. }) => Self::Timeout,
            FetchError::Validation { .. } => Self::Validation,
            FetchError::BreakerOpen { .. } => Self::BreakerOpen,
            FetchError::Internal { .. } => Self::Internal,
        }
    }
}

/// Error details attached to a tier in `Error` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierError {
    pub kind: ErrorKind,
    pub message: String,
    /// Transport invocations made before giving up (0 when short-circuited)
    pub attempts: u32,
}

impl TierError {
    pub fn from_fetch(err: &FetchError, attempts: u32) -> Self {
        Self {
            kind: ErrorKind::from(err),
            message: err.to_string(),
            attempts,
        }
    }
}

// ============================================================================
// TIER STATE
// ============================================================================

/// State of one tier within a consumer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierState {
    pub tier: TierId,
    pub status: TierStatus,
    /// Latest payload. Kept across a terminal error as last-known-good data.
    pub data: Option<Value>,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<TierError>,
    /// The current data was served from the cache without a transport call
    pub from_cache: bool,
    /// The current data is older than its TTL (degraded response)
    pub stale: bool,
}

impl TierState {
    /// Fresh idle state for a tier.
    pub fn idle(tier: TierId) -> Self {
        Self {
            tier,
            status: TierStatus::Idle,
            data: None,
            last_updated: None,
            error: None,
            from_cache: false,
            stale: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TierStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == TierStatus::Error
    }

    pub fn is_loading(&self) -> bool {
        self.status == TierStatus::Loading
    }

    /// Whether the tier has been requested at all in this session.
    pub fn is_requested(&self) -> bool {
        self.status != TierStatus::Idle
    }
}

// ============================================================================
// AGGREGATE STATE
// ============================================================================

/// Rollup status across requested tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// No tier has been requested
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Unified view of every tier, as published to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub critical: TierState,
    pub secondary: TierState,
    pub detailed: TierState,
    pub overall: OverallStatus,
    /// A comprehensive fetch populated every tier in this session
    pub comprehensive: bool,
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateState {
    pub fn new() -> Self {
        Self {
            critical: TierState::idle(TierId::Critical),
            secondary: TierState::idle(TierId::Secondary),
            detailed: TierState::idle(TierId::Detailed),
            overall: OverallStatus::Idle,
            comprehensive: false,
        }
    }

    pub fn tier(&self, tier: TierId) -> &TierState {
        match tier {
            TierId::Critical => &self.critical,
            TierId::Secondary => &self.secondary,
            TierId::Detailed => &self.detailed,
        }
    }

    pub fn tier_mut(&mut self, tier: TierId) -> &mut TierState {
        match tier {
            TierId::Critical => &mut self.critical,
            TierId::Secondary => &mut self.secondary,
            TierId::Detailed => &mut self.detailed,
        }
    }

    pub fn tiers(&self) -> [&TierState; 3] {
        [&self.critical, &self.secondary, &self.detailed]
    }

    /// Whether `tier`'s dependency is satisfied.
    pub fn dependency_met(&self, tier: TierId) -> bool {
        match tier.dependency() {
            None => true,
            Some(dep) => self.comprehensive || self.tier(dep).is_success(),
        }
    }

    /// Recompute `overall` from the tier states.
    ///
    /// Loading wins over error so a UI keeps its spinner while any tier is
    /// still in flight.
    pub fn recompute(&mut self) {
        self.overall = Self::rollup(self.tiers());
    }

    fn rollup(tiers: [&TierState; 3]) -> OverallStatus {
        let requested: Vec<&TierState> = tiers.into_iter().filter(|t| t.is_requested()).collect();
        if requested.is_empty() {
            OverallStatus::Idle
        } else if requested.iter().any(|t| t.is_loading()) {
            OverallStatus::Loading
        } else if requested.iter().any(|t| t.is_error()) {
            OverallStatus::Error
        } else {
            OverallStatus::Success
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
