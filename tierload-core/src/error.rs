//! Error types for tierload operations

use crate::{FetchTarget, TierId, TierStatus};
use std::time::Duration;
use thiserror::Error;

/// Network-level failures. Always eligible for retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network failure fetching {target}: {message}")]
    Network { target: FetchTarget, message: String },

    #[error("Fetch of {target} timed out after {after:?}")]
    Timeout { target: FetchTarget, after: Duration },
}

/// Failures of a single fetch call, as seen by the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The transport answered but the payload is malformed. Never retried.
    #[error("Invalid response for {target}: {reason}")]
    Validation { target: FetchTarget, reason: String },

    /// Synthetic error returned while the circuit for `target` is open.
    #[error("Circuit open for {target}, retry after {retry_after:?}")]
    BreakerOpen {
        target: FetchTarget,
        retry_after: Duration,
    },

    #[error("Internal fetch failure for {target}: {reason}")]
    Internal { target: FetchTarget, reason: String },
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this failure should count against the circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Internal { .. })
    }

    /// Convenience constructor for network failures.
    pub fn network(target: impl Into<FetchTarget>, message: impl Into<String>) -> Self {
        Self::Transport(TransportError::Network {
            target: target.into(),
            message: message.into(),
        })
    }

    /// Convenience constructor for validation failures.
    pub fn validation(target: impl Into<FetchTarget>, reason: impl Into<String>) -> Self {
        Self::Validation {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// A tier was requested before its dependency was satisfied.
///
/// Indicates a caller bug; never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Tier {tier} requested before {requires} succeeded (found {found:?})")]
pub struct GatingViolation {
    pub tier: TierId,
    pub requires: TierId,
    pub found: TierStatus,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all tierload errors.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Gating violation: {0}")]
    Gating(#[from] GatingViolation),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<TransportError> for LoaderError {
    fn from(err: TransportError) -> Self {
        Self::Fetch(FetchError::Transport(err))
    }
}

/// Result type alias for tierload operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

// =============================================================================
// TESTS
// =============================================================================
