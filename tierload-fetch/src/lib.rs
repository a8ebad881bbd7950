//! tierload Fetch - Resilient Transport Layer
//!
//! Everything between the orchestrator and the network:
//!
//! - [`DataTransport`] - the inbound transport abstraction
//! - [`RequestDeduplicator`] - collapses concurrent identical requests
//! - [`CircuitBreaker`] - per-target failure detection and recovery
//! - [`ResilientFetcher`] - retry, backoff, timeouts and breakers combined
//! - [`ListenerChain`] - event dispatch for observability

pub mod breaker;
pub mod dedup;
pub mod listener;
pub mod retry;
pub mod transport;

pub use breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
pub use dedup::{DedupError, RequestDeduplicator};
pub use listener::{
    ErrorEvent, FetchListener, ListenerChain, ListenerError, RequestEvent, ResponseEvent,
};
pub use retry::{FetchOutcome, ResilientFetcher, RetryPolicy};
pub use transport::DataTransport;
