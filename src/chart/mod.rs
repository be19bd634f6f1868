//! Chart domain: candle type, wire formats, normalization, last-price cache.

pub mod convert;
pub mod state;
pub mod wire;

pub use convert::normalize_bar;
pub use state::PriceCache;

/// One OHLCV candle as delivered to the charting consumer.
///
/// `timestamp` is in milliseconds since epoch. When the feed is configured
/// with a price multiplier, `open`/`high`/`low`/`close` are already scaled by
/// it; `volume` and `timestamp` never are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
