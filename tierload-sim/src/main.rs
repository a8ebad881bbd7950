//! tierload-sim - drives a tiered loader against a synthetic backend.
//!
//! Restores a cache snapshot, loads the dashboard, drills into the detailed
//! tier, forces a refetch, then prints the final state and breaker health as
//! JSON and saves the cache for the next run.

mod backend;
mod error;
mod settings;

use crate::backend::SyntheticBackend;
use crate::error::SimError;
use crate::settings::SimSettings;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tierload_core::{
    worst_status, AggregateState, FetchParams, LoaderConfig, Payload, SystemClock, TierId,
};
use tierload_fetch::{ErrorEvent, FetchListener, ListenerError, ResponseEvent};
use tierload_loader::{LoaderContext, TieredLoader};
use tierload_storage::{load_records, save_records, CacheStore, TtlCache};
use tracing::Subscriber;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), SimError> {
    let settings = SimSettings::load()?;
    init_tracing(settings.json_logs)?;
    let config = settings.loader_config()?;

    let report = run(&settings, config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing(json: bool) -> Result<(), SimError> {
    // stdout carries only the report.
    tracing::subscriber::set_global_default(log_subscriber(json, std::io::stderr))
        .map_err(|e| SimError::Tracing(e.to_string()))
}

fn log_subscriber<W>(json: bool, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tierload=debug,tierload_sim=debug,info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        Box::new(registry.with(tracing_subscriber::fmt::layer().json().with_writer(writer)))
    } else {
        Box::new(registry.with(tracing_subscriber::fmt::layer().with_writer(writer)))
    }
}

/// Logs every attempt outcome.
struct LoggingListener;

#[async_trait]
impl FetchListener for LoggingListener {
    async fn on_response(&self, event: ResponseEvent) -> Result<(), ListenerError> {
        tracing::info!(
            request_id = %event.request_id,
            target_name = %event.target,
            attempt = event.attempt,
            latency_ms = event.latency_ms,
            "Fetch answered"
        );
        Ok(())
    }

    async fn on_error(&self, event: ErrorEvent) -> Result<(), ListenerError> {
        tracing::warn!(
            request_id = %event.request_id,
            target_name = %event.target,
            attempt = event.attempt,
            will_retry = event.will_retry,
            error = %event.error_message,
            "Fetch attempt failed"
        );
        Ok(())
    }
}

async fn run(settings: &SimSettings, config: LoaderConfig) -> Result<serde_json::Value, SimError> {
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(TtlCache::<Payload>::new(config.cache_max_entries, clock.clone()));
    if let Some(path) = &settings.cache_path {
        let restored = cache.import_records(load_records(path)?);
        tracing::info!(path = %path.display(), restored, "Restored cache snapshot");
    }

    let backend = Arc::new(SyntheticBackend::new(
        settings.failure_rate,
        Duration::from_millis(settings.max_latency_ms),
    ));
    let loader = TieredLoader::builder(backend.clone())
        .config(config)
        .context(LoaderContext::with_cache(cache.clone(), clock))
        .listener(Arc::new(LoggingListener))
        .build()?;

    let mut subscription = loader.subscribe();
    let watcher = tokio::spawn(async move {
        while let Some(snapshot) = subscription.changed().await {
            log_snapshot(&snapshot);
        }
    });

    let params = FetchParams::new().with("range", "7d");

    let dashboard = loader.load_dashboard(params.clone()).await;
    tracing::info!(overall = ?dashboard.overall, "Dashboard loaded");

    match loader.load_tier(TierId::Detailed, params.clone()).await {
        Ok(state) => tracing::info!(status = ?state.status, stale = state.stale, "Detailed tier"),
        Err(violation) => tracing::warn!(error = %violation, "Detailed tier gated"),
    }

    let refreshed = loader.refetch_all(params).await;
    loader.settle().await;
    watcher.abort();

    let health = loader.health();
    let report = json!({
        "state": refreshed,
        "breakers": loader.breaker_states(),
        "health": health,
        "worstHealth": worst_status(&health),
        "transportCalls": backend.calls(),
        "cache": {
            "entries": cache.len(),
            "hitRate": cache.stats().hit_rate(),
        },
    });

    if let Some(path) = &settings.cache_path {
        let records = cache.export_records();
        save_records(path, &records)?;
        tracing::info!(path = %path.display(), saved = records.len(), "Saved cache snapshot");
    }
    Ok(report)
}

fn log_snapshot(snapshot: &AggregateState) {
    tracing::debug!(
        overall = ?snapshot.overall,
        critical = ?snapshot.critical.status,
        secondary = ?snapshot.secondary.status,
        detailed = ?snapshot.detailed.status,
        comprehensive = snapshot.comprehensive,
        "State changed"
    );
}
