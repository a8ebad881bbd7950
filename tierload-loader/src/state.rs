//! Loading state manager: owns the aggregate state and publishes snapshots.

use tierload_core::{AggregateState, TierId, TierState};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Holds the session's [`AggregateState`] and notifies subscribers.
///
/// Every mutation recomputes the rollup; subscribers are only woken when the
/// resulting snapshot differs from the previous one.
#[derive(Debug)]
pub struct LoadingStateManager {
    tx: watch::Sender<AggregateState>,
}

impl LoadingStateManager {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AggregateState::new());
        Self { tx }
    }

    /// Snapshot of the current state. Side-effect free.
    pub fn aggregate(&self) -> AggregateState {
        self.tx.borrow().clone()
    }

    pub fn tier(&self, tier: TierId) -> TierState {
        self.tx.borrow().tier(tier).clone()
    }

    pub fn subscribe(&self) -> StateSubscription {
        StateSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Apply `mutate` and publish if the snapshot changed. Returns whether it did.
    pub fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut AggregateState),
    {
        self.tx.send_if_modified(|current| {
            let mut next = current.clone();
            mutate(&mut next);
            next.recompute();
            if next == *current {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Replace a tier's state if its state machine allows the move.
    ///
    /// Returns `false` for an illegal transition, leaving state untouched.
    pub fn transition(&self, next: TierState) -> bool {
        let tier = next.tier;
        let to = next.status;
        let mut rejected_from = None;
        self.update(|state| {
            let slot = state.tier_mut(tier);
            if slot.status.can_transition_to(to) {
                *slot = next;
            } else {
                rejected_from = Some(slot.status);
            }
        });
        match rejected_from {
            Some(from) => {
                tracing::debug!(
                    tier = %tier,
                    from = from.as_str(),
                    to = to.as_str(),
                    "Rejected illegal tier transition"
                );
                false
            }
            None => true,
        }
    }

    pub fn set_comprehensive(&self, comprehensive: bool) {
        self.update(|state| state.comprehensive = comprehensive);
    }

    /// Return every tier to `Idle` and clear the comprehensive flag.
    pub fn reset(&self) {
        self.update(|state| *state = AggregateState::new());
    }
}

impl Default for LoadingStateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of the state channel.
///
/// Dropping a subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// has no effect on fetches in progress.
#[derive(Debug, Clone)]
pub struct StateSubscription {
    rx: watch::Receiver<AggregateState>,
}

impl StateSubscription {
    /// Latest published snapshot.
    pub fn current(&self) -> AggregateState {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot. `None` once the loader is gone.
    pub async fn changed(&mut self) -> Option<AggregateState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Stream yielding the current snapshot, then every change.
    pub fn into_stream(self) -> WatchStream<AggregateState> {
        WatchStream::new(self.rx)
    }

    pub fn unsubscribe(self) {
        drop(self.rx);
    }
}
