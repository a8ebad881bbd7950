//! tierload Core - Shared Types
//!
//! Pure data structures shared by every tierload crate: tier identity,
//! per-tier and aggregate loading state, circuit breaker snapshots,
//! configuration, and the error taxonomy. This crate contains no I/O and no
//! async code.

pub mod circuit;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod state;
pub mod tier;

pub use circuit::{CircuitBreakerState, CircuitState, FetchTarget};
pub use clock::{elapsed_between, Clock, ManualClock, SystemClock};
pub use config::LoaderConfig;
pub use error::{
    ConfigError, FetchError, GatingViolation, LoaderError, LoaderResult, TransportError,
};
pub use health::{worst_status, HealthCheck, HealthStatus};
pub use state::{AggregateState, ErrorKind, OverallStatus, TierError, TierState, TierStatus};
pub use tier::{
    DedupKey, FetchParams, FetchRequest, TierBundle, TierId, TierIdParseError,
    COMPREHENSIVE_NAMESPACE,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque payload returned by the transport.
pub type Payload = serde_json::Value;
