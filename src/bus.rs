//! In-process price broadcast bus.
//!
//! Republishes the latest trade price for an instrument to any interested
//! listener, independent of the chart subscription that produced it. Owned
//! by the [`Datafeed`](crate::client::Datafeed) composition root and torn
//! down with it, rather than being ambient global state.

use crate::shared::InstrumentId;
use tokio::sync::broadcast;

/// A price notification on the bus.
///
/// `price` is the **raw, pre-multiplier** close. The candle delivered to the
/// chart callback is multiplier-scaled, but bus listeners typically apply
/// their own derived-metric math and must not be double-scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub instrument: InstrumentId,
    pub price: f64,
    pub timestamp: i64,
}

/// Fire-and-forget pub/sub for [`PriceUpdate`]s.
///
/// Listeners not attached at emission time miss the update; there is no
/// replay buffer. Updates for the same instrument arrive in emission order.
#[derive(Debug, Clone)]
pub struct PriceBus {
    tx: broadcast::Sender<PriceUpdate>,
}

impl PriceBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an update. Silently dropped when nobody is listening.
    pub fn publish(&self, update: PriceUpdate) {
        let _ = self.tx.send(update);
    }

    /// Attach a new listener. Only updates published after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.tx.subscribe()
    }
}

impl Default for PriceBus {
    fn default() -> Self {
        Self::new(64)
    }
}
