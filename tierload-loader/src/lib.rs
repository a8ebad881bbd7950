//! tierload Loader - Progressive Loading Orchestrator
//!
//! Loads a dashboard in three dependent tiers (critical, secondary, detailed)
//! so the most important data renders first. Built on the cache from
//! `tierload-storage` and the resilient fetch layer from `tierload-fetch`.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tierload_core::{FetchParams, LoaderConfig, TierId};
//! # use tierload_loader::TieredLoader;
//! # async fn run(transport: Arc<dyn tierload_fetch::DataTransport>) -> tierload_core::LoaderResult<()> {
//! let loader = TieredLoader::new(transport, LoaderConfig::from_env())?;
//! let updates = loader.subscribe();
//! loader.load_tier(TierId::Critical, FetchParams::new()).await?;
//! loader.settle().await;
//! let snapshot = updates.current();
//! # let _ = snapshot;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod context;
pub mod orchestrator;
pub mod state;

pub use clock::TokioClock;
pub use context::{Fetched, LoaderContext};
pub use orchestrator::{LoaderBuilder, TieredLoader};
pub use state::{LoadingStateManager, StateSubscription};
