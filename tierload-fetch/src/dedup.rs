//! Collapse concurrent identical requests onto one in-flight future.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

/// Failure of the shared task itself, as opposed to the work's own result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DedupError {
    #[error("Deduplicated request '{key}' panicked")]
    Panicked { key: String },

    #[error("Deduplicated request '{key}' was cancelled")]
    Cancelled { key: String },
}

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, DedupError>>>;

struct InFlight<T> {
    id: u64,
    future: SharedOutcome<T>,
}

/// Removes a registration when the owning task finishes, including by panic.
///
/// Matching on `id` keeps a slow task from removing a newer registration
/// under the same key.
struct Registration<T> {
    inflight: Arc<DashMap<String, InFlight<T>>>,
    key: String,
    id: u64,
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        self.inflight.remove_if(&self.key, |_, entry| entry.id == self.id);
    }
}

/// Request deduplicator keyed by [`DedupKey`](tierload_core::DedupKey) strings.
///
/// The first caller for a key starts the work on its own tokio task; callers
/// arriving before it settles await the same shared outcome. Because the work
/// is detached from its callers, it runs to completion even if every caller
/// is dropped.
pub struct RequestDeduplicator<T> {
    inflight: Arc<DashMap<String, InFlight<T>>>,
    next_id: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the in-flight request for `key`, or start `factory()` and register it.
    ///
    /// `factory` runs while the key's map shard is locked and must not call
    /// back into this deduplicator. If it panics, nothing is registered.
    pub async fn dedupe<F, Fut>(&self, key: &str, factory: F) -> Result<T, DedupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                tracing::debug!(key, "Joining in-flight request");
                existing.get().future.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let work = factory();
                let registration = Registration {
                    inflight: Arc::clone(&self.inflight),
                    key: key.to_string(),
                    id,
                };
                let handle = tokio::spawn(
                    async move {
                        let _registration = registration;
                        work.await
                    }
                    .in_current_span(),
                );
                let owned_key = key.to_string();
                let future = async move {
                    handle.await.map_err(|err| {
                        if err.is_panic() {
                            DedupError::Panicked { key: owned_key }
                        } else {
                            DedupError::Cancelled { key: owned_key }
                        }
                    })
                }
                .boxed()
                .shared();
                slot.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        };
        shared.await
    }

    /// Like [`dedupe`](Self::dedupe), but never joins a request that was
    /// already in flight when this call was made.
    ///
    /// An earlier request for `key` is awaited first and its result
    /// discarded, so the value returned was produced after the call started.
    pub async fn refresh<F, Fut>(&self, key: &str, factory: F) -> Result<T, DedupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let earlier = self.inflight.get(key).map(|entry| entry.future.clone());
        if let Some(earlier) = earlier {
            tracing::debug!(key, "Waiting out earlier request before refreshing");
            let _ = earlier.await;
        }
        self.dedupe(key, factory).await
    }

    /// Number of distinct keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RequestDeduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("in_flight", &self.inflight.len())
            .finish()
    }
}
