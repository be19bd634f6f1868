//! Normalization from raw wire bars to consumer candles.

use super::wire::RawBar;
use super::Candle;
use crate::error::WsError;

/// Convert a raw second-keyed bar into a millisecond-keyed [`Candle`],
/// scaling the OHLC fields by `multiplier`.
///
/// `volume` and the timestamp are never scaled. Non-finite OHLC values are
/// rejected rather than forwarded; the caller drops the message and logs.
pub fn normalize_bar(bar: &RawBar, multiplier: f64) -> Result<Candle, WsError> {
    let ohlc = [bar.open, bar.high, bar.low, bar.close];
    if ohlc.iter().any(|v| !v.is_finite()) || !bar.volume.is_finite() {
        return Err(WsError::Malformed(format!(
            "non-finite OHLCV value in bar at t={}",
            bar.unix_time
        )));
    }

    Ok(Candle {
        timestamp: bar.unix_time as i64 * 1000,
        open: bar.open * multiplier,
        high: bar.high * multiplier,
        low: bar.low * multiplier,
        close: bar.close * multiplier,
        volume: bar.volume,
    })
}
