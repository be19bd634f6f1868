//! Subscription registry: which instrument gets which callback.
//!
//! A plain keyed table plus a lookup-and-invoke dispatch; deliberately no
//! trait dispatch beyond the boxed callback, so the registry is unit-testable
//! without any network machinery.

use crate::chart::Candle;
use crate::shared::{InstrumentId, Timeframe};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Callback receiving normalized live candles for one instrument.
pub type CandleCallback = Box<dyn FnMut(Candle) + Send>;

/// A callback handle that can be cloned out of the registry and invoked
/// after the registry lock is released, so a callback may re-enter
/// subscribe/unsubscribe without deadlocking.
pub(crate) type SharedCallback = Arc<Mutex<CandleCallback>>;

struct Entry {
    timeframe: Timeframe,
    callback: SharedCallback,
}

/// Tracks at most one active callback per instrument.
///
/// Insertion order is preserved for resubscription-on-reconnect; replacing
/// an instrument's callback keeps its original position.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<InstrumentId, Entry>,
    order: Vec<InstrumentId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `instrument`, replacing any prior callback.
    ///
    /// An empty instrument id is a silent no-op: the instrument is not yet
    /// known to the caller, so there is nothing to track or announce.
    /// Returns whether an announcement should be sent.
    pub fn insert(
        &mut self,
        instrument: InstrumentId,
        timeframe: Timeframe,
        callback: CandleCallback,
    ) -> bool {
        if instrument.is_empty() {
            tracing::debug!("subscribe with empty instrument id, ignoring");
            return false;
        }

        if !self.entries.contains_key(&instrument) {
            self.order.push(instrument.clone());
        }
        self.entries.insert(
            instrument,
            Entry {
                timeframe,
                callback: Arc::new(Mutex::new(callback)),
            },
        );
        true
    }

    /// Remove the entry for `instrument`, returning its timeframe so the
    /// caller can announce the unsubscribe. `None` when nothing was
    /// registered.
    pub fn remove(&mut self, instrument: &InstrumentId) -> Option<Timeframe> {
        let entry = self.entries.remove(instrument)?;
        self.order.retain(|id| id != instrument);
        Some(entry.timeframe)
    }

    /// Callback handle for `instrument`, if registered. Cloned out so the
    /// caller can invoke it without holding the registry lock.
    pub(crate) fn callback_for(&self, instrument: &InstrumentId) -> Option<SharedCallback> {
        self.entries.get(instrument).map(|e| Arc::clone(&e.callback))
    }

    /// Deliver a normalized candle to the registered callback.
    ///
    /// Returns `false` when no callback is registered for `instrument`: a
    /// stale or unknown message, silently dropped.
    pub fn dispatch(&self, instrument: &InstrumentId, candle: Candle) -> bool {
        match self.callback_for(instrument) {
            Some(cb) => {
                (cb.lock().unwrap_or_else(PoisonError::into_inner))(candle);
                true
            }
            None => false,
        }
    }

    /// Active `(instrument, timeframe)` pairs in insertion order.
    pub fn pairs(&self) -> Vec<(InstrumentId, Timeframe)> {
        self.order
            .iter()
            .filter_map(|id| {
                self.entries
                    .get(id)
                    .map(|e| (id.clone(), e.timeframe.clone()))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn candle(close: f64) -> Candle {
        Candle {
            timestamp: 60_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn counting_callback() -> (CandleCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let cb = Box::new(move |_c: Candle| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (cb, count)
    }

    #[test]
    fn test_insert_and_dispatch() {
        let mut registry = SubscriptionRegistry::new();
        let (cb, count) = counting_callback();
        assert!(registry.insert("A".into(), "5m".into(), cb));

        assert!(registry.dispatch(&"A".into(), candle(1.0)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_instrument_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        let (cb, _count) = counting_callback();
        assert!(!registry.insert("".into(), "5m".into(), cb));
        assert!(registry.is_empty());
        assert!(registry.pairs().is_empty());
    }

    #[test]
    fn test_replace_keeps_only_latest_callback() {
        let mut registry = SubscriptionRegistry::new();
        let (cb1, count1) = counting_callback();
        let (cb2, count2) = counting_callback();

        registry.insert("A".into(), "1m".into(), cb1);
        registry.insert("A".into(), "5m".into(), cb2);
        assert_eq!(registry.len(), 1);

        registry.dispatch(&"A".into(), candle(1.0));
        assert_eq!(count1.load(Ordering::SeqCst), 0);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_drops_future_dispatch() {
        let mut registry = SubscriptionRegistry::new();
        let (cb, count) = counting_callback();
        registry.insert("A".into(), "5m".into(), cb);

        assert_eq!(registry.remove(&"A".into()), Some("5m".into()));
        assert!(!registry.dispatch(&"A".into(), candle(1.0)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert_eq!(registry.remove(&"A".into()), None);
    }

    #[test]
    fn test_dispatch_unknown_instrument_dropped() {
        let mut registry = SubscriptionRegistry::new();
        let (cb, count) = counting_callback();
        registry.insert("A".into(), "5m".into(), cb);

        assert!(!registry.dispatch(&"B".into(), candle(1.0)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pairs_in_insertion_order() {
        let mut registry = SubscriptionRegistry::new();
        let (cb1, _) = counting_callback();
        let (cb2, _) = counting_callback();
        let (cb3, _) = counting_callback();

        registry.insert("A".into(), "1m".into(), cb1);
        registry.insert("B".into(), "5m".into(), cb2);
        // Replacing A must keep its original position.
        registry.insert("A".into(), "15m".into(), cb3);

        let pairs = registry.pairs();
        assert_eq!(
            pairs,
            vec![
                ("A".into(), "15m".into()),
                ("B".into(), "5m".into()),
            ]
        );
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut registry = SubscriptionRegistry::new();
        let (cb, _) = counting_callback();
        registry.insert("A".into(), "5m".into(), cb);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.dispatch(&"A".into(), candle(1.0)));
    }
}
