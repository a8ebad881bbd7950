//! Clock driven by the tokio timer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tierload_core::Clock;
use tokio::time::Instant;

/// Wall-clock time that follows tokio's timer.
///
/// Anchored to `Utc::now()` at construction and advanced by
/// [`tokio::time::Instant`], so a paused runtime (`start_paused = true`)
/// moves cache expiry and breaker cooldowns together with `sleep`.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Start at a fixed wall-clock instant.
    pub fn anchored_at(origin_wall: DateTime<Utc>) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed =
            ChronoDuration::from_std(self.origin.elapsed()).unwrap_or(ChronoDuration::MAX);
        self.origin_wall
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
