//! Tiered fetch orchestrator.
//!
//! Drives each tier through `Idle -> Loading -> {Success, Error}` and enforces
//! the dependency chain critical -> secondary -> detailed: a tier is only
//! fetched once the tier before it has succeeded, or once a comprehensive
//! fetch has populated the whole session.

use crate::context::{Fetched, LoaderContext};
use crate::state::{LoadingStateManager, StateSubscription};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tierload_core::{
    AggregateState, CircuitBreakerState, DedupKey, FetchError, FetchParams, FetchRequest,
    FetchTarget, GatingViolation, HealthCheck, LoaderConfig, LoaderResult, Payload, TierBundle,
    TierError, TierId, TierState, TierStatus, COMPREHENSIVE_NAMESPACE,
};
use tierload_fetch::{DataTransport, FetchListener, FetchOutcome, ListenerChain, ResilientFetcher};
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

#[derive(Debug, Clone, Copy)]
struct LoadOptions {
    bypass_cache: bool,
    /// Allow auto-advance to the next tier (still subject to config).
    advance: bool,
}

impl LoadOptions {
    const CALLER: Self = Self {
        bypass_cache: false,
        advance: true,
    };
    const SEQUENCE: Self = Self {
        bypass_cache: false,
        advance: false,
    };
    const REFETCH: Self = Self {
        bypass_cache: true,
        advance: false,
    };
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`TieredLoader`].
pub struct LoaderBuilder {
    transport: Arc<dyn DataTransport>,
    config: LoaderConfig,
    context: Option<LoaderContext>,
    listeners: ListenerChain,
}

impl LoaderBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cache and in-flight map with other loaders.
    pub fn context(mut self, context: LoaderContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn FetchListener>) -> Self {
        self.listeners.add(listener);
        self
    }

    /// Validate the configuration and build the loader.
    ///
    /// Without an explicit context, a private in-memory cache on the tokio
    /// clock is created.
    pub fn build(self) -> LoaderResult<TieredLoader> {
        self.config.validate()?;
        let context = self
            .context
            .unwrap_or_else(|| LoaderContext::in_memory(self.config.cache_max_entries));
        let fetcher = ResilientFetcher::new(&self.config, Arc::clone(&context.clock))
            .with_listeners(self.listeners);
        Ok(TieredLoader {
            inner: Arc::new(Inner {
                config: self.config,
                context,
                transport: self.transport,
                fetcher,
                state: LoadingStateManager::new(),
                background: Mutex::new(Vec::new()),
                epoch: AtomicU64::new(0),
            }),
        })
    }
}

// ============================================================================
// LOADER
// ============================================================================

/// One consumer session of the progressive loader.
///
/// Cheap to clone; clones share the same session state.
#[derive(Clone)]
pub struct TieredLoader {
    inner: Arc<Inner>,
}

struct Inner {
    config: LoaderConfig,
    context: LoaderContext,
    transport: Arc<dyn DataTransport>,
    fetcher: ResilientFetcher,
    state: LoadingStateManager,
    /// Auto-advance tasks not yet awaited by `settle`.
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped by `invalidate_session`; results from older epochs are dropped.
    epoch: AtomicU64,
}

impl TieredLoader {
    pub fn builder(transport: Arc<dyn DataTransport>) -> LoaderBuilder {
        LoaderBuilder {
            transport,
            config: LoaderConfig::default(),
            context: None,
            listeners: ListenerChain::new(),
        }
    }

    pub fn new(transport: Arc<dyn DataTransport>, config: LoaderConfig) -> LoaderResult<Self> {
        Self::builder(transport).config(config).build()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &LoaderContext {
        &self.inner.context
    }

    pub fn aggregate(&self) -> AggregateState {
        self.inner.state.aggregate()
    }

    pub fn tier_state(&self, tier: TierId) -> TierState {
        self.inner.state.tier(tier)
    }

    pub fn subscribe(&self) -> StateSubscription {
        self.inner.state.subscribe()
    }

    pub fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        self.inner.fetcher.breaker_states()
    }

    pub fn health(&self) -> Vec<HealthCheck> {
        self.inner.fetcher.health()
    }

    /// Load one tier.
    ///
    /// Fails fast with [`GatingViolation`] when the tier's dependency has not
    /// succeeded; no state changes and no fetch is started. Fetch failures are
    /// not errors here: they come back as a `TierState` in `Error` status,
    /// carrying any last-known-good data.
    pub async fn load_tier(
        &self,
        tier: TierId,
        params: FetchParams,
    ) -> Result<TierState, GatingViolation> {
        self.load(tier, params, LoadOptions::CALLER).await
    }

    /// Load the whole dashboard.
    ///
    /// Tries one comprehensive fetch first when enabled; if the transport has
    /// no combined endpoint or the combined fetch fails, falls back to the
    /// gated sequence critical -> secondary -> detailed, stopping at the
    /// first tier that does not succeed.
    pub async fn load_dashboard(&self, params: FetchParams) -> AggregateState {
        self.run_dashboard(params, LoadOptions::SEQUENCE)
            .instrument(info_span!("load_dashboard"))
            .await
    }

    /// Refetch every tier, ignoring cached entries.
    ///
    /// Clears the comprehensive flag, then runs the same sequence as
    /// [`load_dashboard`](Self::load_dashboard). Tier N always completes
    /// before tier N+1 starts.
    pub async fn refetch_all(&self, params: FetchParams) -> AggregateState {
        self.inner.state.set_comprehensive(false);
        self.run_dashboard(params, LoadOptions::REFETCH)
            .instrument(info_span!("refetch_all"))
            .await
    }

    /// Forget everything this session knows (logout, login, user change).
    ///
    /// Clears every tier namespace and the comprehensive namespace, aborts
    /// pending auto-advance loads and resets all tiers to `Idle`. Fetches
    /// still in flight finish, but their results are neither cached nor
    /// applied.
    pub fn invalidate_session(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        for handle in std::mem::take(&mut *self.background()) {
            handle.abort();
        }

        let cache = &self.inner.context.cache;
        let removed = TierId::ALL
            .iter()
            .map(|tier| cache.invalidate_namespace(tier.as_str()))
            .sum::<usize>()
            + cache.invalidate_namespace(COMPREHENSIVE_NAMESPACE);
        self.inner.state.reset();
        tracing::info!(removed, "Session invalidated");
    }

    /// Wait for background auto-advance loads, including ones they start.
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.background());
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(err) = handle.await {
                    if err.is_panic() {
                        tracing::warn!(error = %err, "Background tier load panicked");
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Tier loads
    // ------------------------------------------------------------------------

    async fn load(
        &self,
        tier: TierId,
        params: FetchParams,
        options: LoadOptions,
    ) -> Result<TierState, GatingViolation> {
        let span = info_span!("load_tier", tier = %tier, bypass_cache = options.bypass_cache);
        self.load_inner(tier, params, options).instrument(span).await
    }

    async fn load_inner(
        &self,
        tier: TierId,
        params: FetchParams,
        options: LoadOptions,
    ) -> Result<TierState, GatingViolation> {
        let snapshot = self.inner.state.aggregate();
        if let Some(requires) = tier.dependency() {
            if !snapshot.dependency_met(tier) {
                let violation = GatingViolation {
                    tier,
                    requires,
                    found: snapshot.tier(requires).status,
                };
                tracing::warn!(error = %violation, "Rejected out-of-order tier load");
                return Err(violation);
            }
        }

        let epoch = self.epoch();
        let request = FetchRequest::new(tier, params);

        if !options.bypass_cache {
            if let Some(read) = self
                .inner
                .context
                .cache
                .get(request.dedup_key.as_str(), tier.as_str())
            {
                tracing::debug!(key = %request.dedup_key, "Serving tier from cache");
                let state = TierState {
                    tier,
                    status: TierStatus::Success,
                    last_updated: Some(read.stored_at()),
                    data: Some(read.into_value()),
                    error: None,
                    from_cache: true,
                    stale: false,
                };
                self.inner.state.transition(state.clone());
                self.advance_from(tier, &request.params, options);
                return Ok(state);
            }
        }

        let previous = snapshot.tier(tier).clone();
        let loading = TierState {
            status: TierStatus::Loading,
            error: None,
            from_cache: false,
            ..previous.clone()
        };
        let guard = self
            .inner
            .state
            .transition(loading)
            .then(|| RestoreOnDrop::new(&self.inner, epoch, vec![previous.clone()]));

        let outcome = self.fetch_tier(&request, epoch, options.bypass_cache).await;
        if let Some(guard) = guard {
            guard.disarm();
        }

        if self.epoch() != epoch {
            tracing::debug!("Session invalidated during fetch, discarding result");
            return Ok(self.inner.state.tier(tier));
        }

        let state = match outcome.result {
            Ok(payload) => {
                tracing::info!(attempts = outcome.attempts, "Tier loaded");
                TierState {
                    tier,
                    status: TierStatus::Success,
                    data: Some(payload),
                    last_updated: Some(self.inner.context.clock.now()),
                    error: None,
                    from_cache: false,
                    stale: false,
                }
            }
            Err(err) => {
                let (data, last_updated) = self.last_known_good(&request, &previous);
                tracing::warn!(
                    attempts = outcome.attempts,
                    has_fallback = data.is_some(),
                    error = %err,
                    "Tier failed"
                );
                TierState {
                    tier,
                    status: TierStatus::Error,
                    stale: data.is_some(),
                    data,
                    last_updated,
                    error: Some(TierError::from_fetch(&err, outcome.attempts)),
                    from_cache: false,
                }
            }
        };

        self.inner.state.transition(state.clone());
        if state.is_success() {
            self.advance_from(tier, &request.params, options);
        }
        Ok(state)
    }

    /// Run the fetch for `request` through the shared deduplicator.
    ///
    /// The fetch and its cache write happen on a detached task, so the result
    /// is cached even if every caller goes away. With `fresh`, a request
    /// already in flight is waited out rather than joined.
    async fn fetch_tier(
        &self,
        request: &FetchRequest,
        epoch: u64,
        fresh: bool,
    ) -> FetchOutcome<Payload> {
        let target = FetchTarget::Tier(request.tier);
        let inner = Arc::clone(&self.inner);
        let owned = request.clone();
        let work = move || async move {
            let outcome = inner
                .fetcher
                .fetch_tier(inner.transport.as_ref(), &owned)
                .await;
            if let Ok(payload) = &outcome.result {
                if inner.epoch.load(Ordering::SeqCst) == epoch {
                    inner.context.cache.set(
                        owned.dedup_key.as_str(),
                        payload.clone(),
                        owned.tier.as_str(),
                        inner.config.ttl_for(owned.tier),
                    );
                }
            }
            Fetched::Tier(outcome)
        };
        let deduplicator = &self.inner.context.deduplicator;
        let key = request.dedup_key.as_str();
        let shared = if fresh {
            deduplicator.refresh(key, work).await
        } else {
            deduplicator.dedupe(key, work).await
        };

        match shared {
            Ok(fetched) => fetched.into_tier(target),
            Err(err) => FetchOutcome {
                result: Err(FetchError::Internal {
                    target,
                    reason: err.to_string(),
                }),
                attempts: 0,
            },
        }
    }

    /// Previous data for the tier, or an expired cache entry.
    fn last_known_good(
        &self,
        request: &FetchRequest,
        previous: &TierState,
    ) -> (Option<Payload>, Option<DateTime<Utc>>) {
        if previous.data.is_some() {
            return (previous.data.clone(), previous.last_updated);
        }
        match self
            .inner
            .context
            .cache
            .get_stale(request.dedup_key.as_str(), request.tier.as_str())
        {
            Some(read) => (Some(read.value().clone()), Some(read.stored_at())),
            None => (None, None),
        }
    }

    fn advance_from(&self, tier: TierId, params: &FetchParams, options: LoadOptions) {
        if !(options.advance && self.inner.config.auto_advance) {
            return;
        }
        let Some(next) = tier.next() else {
            return;
        };

        let loader = self.clone();
        let params = params.clone();
        let handle = tokio::spawn(
            async move {
                if let Err(violation) = loader.load(next, params, LoadOptions::CALLER).await {
                    tracing::debug!(error = %violation, "Auto-advance skipped");
                }
            }
            .in_current_span(),
        );

        let mut background = self.background();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    // ------------------------------------------------------------------------
    // Dashboard loads
    // ------------------------------------------------------------------------

    async fn run_dashboard(&self, params: FetchParams, options: LoadOptions) -> AggregateState {
        if self.inner.config.comprehensive_enabled
            && self.load_comprehensive(&params, options).await
        {
            return self.aggregate();
        }
        self.load_sequence(params, options).await
    }

    async fn load_sequence(&self, params: FetchParams, options: LoadOptions) -> AggregateState {
        for tier in TierId::ALL {
            match self.load(tier, params.clone(), options).await {
                Ok(state) if state.is_success() => {}
                Ok(state) => {
                    tracing::debug!(
                        tier = %tier,
                        status = state.status.as_str(),
                        "Stopping tier sequence"
                    );
                    break;
                }
                Err(violation) => {
                    tracing::warn!(error = %violation, "Stopping tier sequence");
                    break;
                }
            }
        }
        self.aggregate()
    }

    /// Try to populate every tier with one combined fetch.
    ///
    /// Returns `false` when the caller should fall back to tiered loading.
    async fn load_comprehensive(&self, params: &FetchParams, options: LoadOptions) -> bool {
        let epoch = self.epoch();
        let key = DedupKey::comprehensive(params);

        if !options.bypass_cache {
            if let Some(read) = self
                .inner
                .context
                .cache
                .get(key.as_str(), COMPREHENSIVE_NAMESPACE)
            {
                let stored_at = read.stored_at();
                match serde_json::from_value::<TierBundle>(read.into_value()) {
                    Ok(bundle) => {
                        tracing::debug!(key = %key, "Serving dashboard from comprehensive cache");
                        self.apply_bundle(&bundle, stored_at, true);
                        return true;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "Ignoring undecodable comprehensive entry");
                    }
                }
            }
        }

        // Only critical shows as loading: the later tiers stay gated until
        // the bundle lands and moves them straight to `Success`.
        let previous = self.inner.state.tier(TierId::Critical);
        self.inner.state.transition(TierState {
            status: TierStatus::Loading,
            error: None,
            from_cache: false,
            ..previous.clone()
        });
        let guard = RestoreOnDrop::new(&self.inner, epoch, vec![previous]);

        let outcome = self
            .fetch_comprehensive(params, key, epoch, options.bypass_cache)
            .await;
        if self.epoch() != epoch {
            guard.disarm();
            return true;
        }

        match outcome.result {
            Ok(Some(bundle)) => {
                guard.disarm();
                self.apply_bundle(&bundle, self.inner.context.clock.now(), false);
                tracing::info!(attempts = outcome.attempts, "Dashboard loaded comprehensively");
                true
            }
            Ok(None) => {
                drop(guard);
                tracing::debug!("Transport has no combined endpoint, loading tiers in order");
                false
            }
            Err(err) => {
                drop(guard);
                tracing::warn!(error = %err, "Comprehensive fetch failed, loading tiers in order");
                false
            }
        }
    }

    async fn fetch_comprehensive(
        &self,
        params: &FetchParams,
        key: DedupKey,
        epoch: u64,
        fresh: bool,
    ) -> FetchOutcome<Option<TierBundle>> {
        let target = FetchTarget::Comprehensive;
        let inner = Arc::clone(&self.inner);
        let owned = params.clone();
        let cache_key = key.clone();
        let work = move || async move {
            let outcome = inner
                .fetcher
                .fetch_comprehensive(inner.transport.as_ref(), &owned)
                .await;
            if let Ok(Some(bundle)) = &outcome.result {
                if inner.epoch.load(Ordering::SeqCst) == epoch {
                    cache_bundle(&inner, &owned, &cache_key, bundle);
                }
            }
            Fetched::Bundle(outcome)
        };
        let deduplicator = &self.inner.context.deduplicator;
        let shared = if fresh {
            deduplicator.refresh(key.as_str(), work).await
        } else {
            deduplicator.dedupe(key.as_str(), work).await
        };

        match shared {
            Ok(fetched) => fetched.into_bundle(target),
            Err(err) => FetchOutcome {
                result: Err(FetchError::Internal {
                    target,
                    reason: err.to_string(),
                }),
                attempts: 0,
            },
        }
    }

    fn apply_bundle(&self, bundle: &TierBundle, stored_at: DateTime<Utc>, from_cache: bool) {
        self.inner.state.update(|state| {
            for tier in TierId::ALL {
                *state.tier_mut(tier) = TierState {
                    tier,
                    status: TierStatus::Success,
                    data: Some(bundle.get(tier).clone()),
                    last_updated: Some(stored_at),
                    error: None,
                    from_cache,
                    stale: false,
                };
            }
            state.comprehensive = true;
        });
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn background(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write a comprehensive result into the comprehensive namespace and into
/// each tier's own namespace, so later single-tier loads hit the cache.
fn cache_bundle(inner: &Inner, params: &FetchParams, key: &DedupKey, bundle: &TierBundle) {
    let cache = &inner.context.cache;
    match serde_json::to_value(bundle) {
        Ok(value) => cache.set(
            key.as_str(),
            value,
            COMPREHENSIVE_NAMESPACE,
            inner.config.comprehensive_ttl(),
        ),
        Err(err) => tracing::warn!(error = %err, "Failed to encode comprehensive bundle"),
    }
    for tier in TierId::ALL {
        cache.set(
            DedupKey::for_tier(tier, params).as_str(),
            bundle.get(tier).clone(),
            tier.as_str(),
            inner.config.ttl_for(tier),
        );
    }
}

impl std::fmt::Debug for TieredLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredLoader")
            .field("config", &self.inner.config)
            .field("context", &self.inner.context)
            .field("state", &self.inner.state.aggregate().overall)
            .finish()
    }
}

/// Puts tiers back to their previous state if a load is abandoned while
/// they are still `Loading`.
struct RestoreOnDrop<'a> {
    inner: &'a Inner,
    epoch: u64,
    previous: Vec<TierState>,
    armed: bool,
}

impl<'a> RestoreOnDrop<'a> {
    fn new(inner: &'a Inner, epoch: u64, previous: Vec<TierState>) -> Self {
        Self {
            inner,
            epoch,
            previous,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RestoreOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed || self.inner.epoch.load(Ordering::SeqCst) != self.epoch {
            return;
        }
        let previous = std::mem::take(&mut self.previous);
        self.inner.state.update(|state| {
            for prior in previous {
                let slot = state.tier_mut(prior.tier);
                if slot.is_loading() {
                    *slot = prior;
                }
            }
        });
    }
}
