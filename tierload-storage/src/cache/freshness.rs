//! Cache reads carrying staleness metadata.
//!
//! A read never hands back a bare value: callers always learn when the value
//! was stored and whether it has outlived its TTL, so degraded (stale) data
//! cannot be mistaken for fresh data.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tierload_core::elapsed_between;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    stored_at: DateTime<Utc>,
    ttl: Duration,
    expired: bool,
}

impl<T> CacheRead<T> {
    pub(crate) fn new(value: T, stored_at: DateTime<Utc>, ttl: Duration, expired: bool) -> Self {
        Self {
            value,
            stored_at,
            ttl,
            expired,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the value was written to the cache.
    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Instant after which the entry is logically absent.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::MAX);
        self.stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the entry had outlived its TTL at read time.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// How old the value is as of `now`.
    pub fn staleness(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.stored_at, now)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            stored_at: self.stored_at,
            ttl: self.ttl,
            expired: self.expired,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
