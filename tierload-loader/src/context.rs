//! Shared resources injected into a loader.

use crate::clock::TokioClock;
use std::sync::Arc;
use tierload_core::{Clock, FetchError, FetchTarget, Payload, TierBundle};
use tierload_fetch::{FetchOutcome, RequestDeduplicator};
use tierload_storage::{CacheStore, TtlCache};

/// Value shared between deduplicated callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Tier(FetchOutcome<Payload>),
    Bundle(FetchOutcome<Option<TierBundle>>),
}

impl Fetched {
    pub(crate) fn into_tier(self, target: FetchTarget) -> FetchOutcome<Payload> {
        match self {
            Self::Tier(outcome) => outcome,
            Self::Bundle(_) => mismatch(target),
        }
    }

    pub(crate) fn into_bundle(self, target: FetchTarget) -> FetchOutcome<Option<TierBundle>> {
        match self {
            Self::Bundle(outcome) => outcome,
            Self::Tier(_) => mismatch(target),
        }
    }
}

fn mismatch<T>(target: FetchTarget) -> FetchOutcome<T> {
    FetchOutcome {
        result: Err(FetchError::Internal {
            target,
            reason: "deduplicated request returned a different payload kind".to_string(),
        }),
        attempts: 0,
    }
}

/// Cache, in-flight map and clock used by a loader.
///
/// Loaders built from clones of the same context share cached data and
/// collapse identical in-flight requests. Loaders with separate contexts
/// share nothing.
#[derive(Clone)]
pub struct LoaderContext {
    pub cache: Arc<dyn CacheStore<Payload>>,
    pub deduplicator: Arc<RequestDeduplicator<Fetched>>,
    pub clock: Arc<dyn Clock>,
}

impl LoaderContext {
    /// Fresh in-memory cache bounded to `max_entries`, timed by `clock`.
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(max_entries, Arc::clone(&clock))),
            deduplicator: Arc::new(RequestDeduplicator::new()),
            clock,
        }
    }

    /// Use an existing cache store.
    pub fn with_cache(cache: Arc<dyn CacheStore<Payload>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            deduplicator: Arc::new(RequestDeduplicator::new()),
            clock,
        }
    }

    /// In-memory context on the tokio clock.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(max_entries, Arc::new(TokioClock::new()))
    }
}

impl std::fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderContext")
            .field("cache", &self.cache.stats())
            .field("deduplicator", &self.deduplicator)
            .field("clock", &self.clock)
            .finish()
    }
}
