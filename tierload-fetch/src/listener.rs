//! Fetch lifecycle events and listener dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tierload_core::FetchTarget;
use uuid::Uuid;

/// Error a listener may report. Logged by the chain, never propagated.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Emitted before each transport attempt.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request_id: Uuid,
    pub target: FetchTarget,
    /// 1-based attempt number within the call
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when an attempt returns successfully.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub request_id: Uuid,
    pub target: FetchTarget,
    pub attempt: u32,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when an attempt fails or the call is short-circuited.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub request_id: Uuid,
    pub target: FetchTarget,
    pub attempt: u32,
    pub error_message: String,
    /// Whether another attempt follows
    pub will_retry: bool,
    pub timestamp: DateTime<Utc>,
}

/// Observer of fetch attempts.
#[async_trait]
pub trait FetchListener: Send + Sync {
    async fn on_request(&self, _event: RequestEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn on_response(&self, _event: ResponseEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    async fn on_error(&self, _event: ErrorEvent) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Chain of event listeners.
#[derive(Clone, Default)]
pub struct ListenerChain {
    listeners: Vec<Arc<dyn FetchListener>>,
}

impl ListenerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn FetchListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub async fn emit_request(&self, event: RequestEvent) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_request(event.clone()).await {
                tracing::warn!(
                    listener_index = idx,
                    error = %e,
                    "Fetch request listener failed"
                );
            }
        }
    }

    pub async fn emit_response(&self, event: ResponseEvent) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_response(event.clone()).await {
                tracing::warn!(
                    listener_index = idx,
                    error = %e,
                    "Fetch response listener failed"
                );
            }
        }
    }

    pub async fn emit_error(&self, event: ErrorEvent) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_error(event.clone()).await {
                tracing::warn!(
                    listener_index = idx,
                    error = %e,
                    "Fetch error listener failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for ListenerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerChain")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
