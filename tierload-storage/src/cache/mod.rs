//! Client-side response cache.
//!
//! Entries are addressed by `(key, namespace)`; each tier writes into its own
//! namespace so a tier can be invalidated without touching the others. Reads
//! come back wrapped in [`CacheRead`], which carries when the value was stored
//! and whether it has expired.

mod freshness;
mod traits;
mod ttl;

pub use freshness::CacheRead;
pub use traits::{CacheStats, CacheStore};
pub use ttl::{CacheEntry, CacheKey, TtlCache};
