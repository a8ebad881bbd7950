//! tierload Storage - Response Cache
//!
//! In-memory TTL cache used by the loader, plus JSON-lines snapshots so a
//! warm cache can survive a restart.

pub mod cache;
pub mod persist;

pub use cache::{CacheEntry, CacheKey, CacheRead, CacheStats, CacheStore, TtlCache};
pub use persist::{load_records, save_records, PersistedRecord, PersistenceError};
