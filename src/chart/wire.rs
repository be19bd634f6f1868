//! Wire types for chart data (REST + WS).

use crate::shared::InstrumentId;
use serde::{Deserialize, Serialize};

/// One raw OHLCV bar as pushed on the live stream.
///
/// `unix_time` is in seconds. All OHLC fields are required; a message
/// missing any of them fails deserialization and is dropped upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBar {
    pub unix_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Live candle push for one instrument.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartUpdate {
    pub instrument_address: InstrumentId,
    pub data: RawBar,
}

/// One historical OHLCV record from the REST endpoint, keyed by a
/// Unix-seconds timestamp.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryBar {
    pub time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<HistoryBar> for RawBar {
    fn from(b: HistoryBar) -> Self {
        Self {
            unix_time: b.time,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            volume: b.volume,
        }
    }
}

/// Minimal symbol descriptor for the search passthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
}
