//! Last-price cache: latest raw close per instrument.

use crate::shared::InstrumentId;
use std::collections::HashMap;

/// Latest raw (pre-multiplier) trade price per instrument.
///
/// Updated on every live candle and seedable from an external quote so the
/// UI can render a price before the first stream update arrives.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    prices: HashMap<InstrumentId, f64>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, instrument: InstrumentId, price: f64) {
        self.prices.insert(instrument, price);
    }

    pub fn get(&self, instrument: &InstrumentId) -> Option<f64> {
        self.prices.get(instrument).copied()
    }

    pub fn clear(&mut self) {
        self.prices.clear();
    }
}
