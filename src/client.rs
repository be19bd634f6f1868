//! High-level entry point, `Datafeed`.
//!
//! Composes the historical REST client, the live stream client, the price
//! broadcast bus, and the last-price cache behind the surface a charting
//! widget consumes: backfill, subscribe, unsubscribe.

use crate::bus::{PriceBus, PriceUpdate};
use crate::chart::wire::{HistoryBar, SymbolInfo};
use crate::chart::{normalize_bar, Candle};
use crate::error::{ConfigError, FeedError};
use crate::http::{ChartHttp, RetryPolicy};
use crate::shared::{InstrumentId, Timeframe};
use crate::ws::{ConnectionState, FeedEvent, StreamContext, WsClient, WsConfig};

use futures_util::Stream;
use std::pin::Pin;
use tokio::sync::broadcast;

/// Market-data feed adapter: historical backfill plus live candle stream.
///
/// Construct via [`Datafeed::builder`], then call [`connect`](Self::connect)
/// to start the stream. Subscriptions registered before the connection is up
/// are announced automatically once it is.
pub struct Datafeed {
    http: ChartHttp,
    ws: WsClient,
    ctx: StreamContext,
    history_retry: RetryPolicy,
}

impl Datafeed {
    pub fn builder() -> DatafeedBuilder {
        DatafeedBuilder::default()
    }

    /// Start the live stream connection. Idempotent while a connection
    /// cycle is live; after exhaustion this starts a fresh cycle with the
    /// retry budget reset.
    pub async fn connect(&mut self) -> Result<(), FeedError> {
        Ok(self.ws.connect().await?)
    }

    /// Tear down the stream, cancel any pending reconnect, and discard all
    /// subscriptions.
    pub async fn close(&mut self) {
        self.ws.close().await;
    }

    /// Symbol search passthrough. This feed charts a single known
    /// instrument, so there is nothing to search.
    pub fn search_symbols(&self, _keyword: &str) -> Vec<SymbolInfo> {
        Vec::new()
    }

    /// Fetch historical candles for `[from_ms, to_ms]`, normalized exactly
    /// like live updates so backfill and stream data line up.
    ///
    /// On a remote failure this returns an **empty vector**, not an error:
    /// the failure is logged and reported as [`FeedEvent::HistoryError`] on
    /// the advisory stream. Callers wanting to distinguish "no data" from
    /// "fetch failed" must consult that side channel. An empty instrument id
    /// is a caller bug and fails loudly.
    pub async fn history_candles(
        &self,
        instrument: &InstrumentId,
        timeframe: &Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, FeedError> {
        if instrument.is_empty() {
            return Err(ConfigError::EmptyInstrument.into());
        }

        let from_s = (from_ms.max(0) / 1000) as u64;
        let to_s = (to_ms.max(0) / 1000) as u64;

        match self
            .http
            .get_chart_data(instrument, timeframe, from_s, to_s, self.history_retry.clone())
            .await
        {
            Ok(bars) => Ok(backfill_candles(bars, self.ctx.multiplier)),
            Err(e) => {
                tracing::error!(instrument = %instrument, "history fetch failed: {}", e);
                let _ = self
                    .ws
                    .event_sender()
                    .try_send(FeedEvent::HistoryError(e.to_string()));
                Ok(Vec::new())
            }
        }
    }

    /// Register `callback` for live candles on `instrument`, replacing any
    /// prior subscription for the same instrument. Empty instrument ids
    /// register nothing.
    pub fn subscribe(
        &self,
        instrument: InstrumentId,
        timeframe: Timeframe,
        callback: impl FnMut(Candle) + Send + 'static,
    ) {
        self.ws.subscribe(instrument, timeframe, Box::new(callback));
    }

    /// Stop live delivery for `instrument`. Takes effect immediately: a
    /// message already in flight finds no callback and is dropped. The
    /// unsubscribe announcement uses the timeframe the subscription was
    /// registered with.
    pub fn unsubscribe(&self, instrument: &InstrumentId, _timeframe: &Timeframe) {
        self.ws.unsubscribe(instrument);
    }

    /// Attach a listener to the price bus. Carries the **raw pre-multiplier**
    /// close of every well-formed live candle, chart subscriber or not.
    pub fn price_updates(&self) -> broadcast::Receiver<PriceUpdate> {
        self.ctx.bus.subscribe()
    }

    /// Advisory feed events: connection transitions, dropped messages,
    /// history failures.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = FeedEvent> + Send + '_>> {
        self.ws.events()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.ws.state()
    }

    /// Latest raw close seen for `instrument`, live or seeded.
    pub fn current_price(&self, instrument: &InstrumentId) -> Option<f64> {
        self.ctx.lock_prices().get(instrument)
    }

    /// Seed the price cache from an external quote and broadcast it, so bus
    /// listeners can render before the first live candle arrives.
    pub fn set_initial_price(&self, instrument: InstrumentId, price: f64) {
        self.ctx.lock_prices().update(instrument.clone(), price);
        self.ctx.bus.publish(PriceUpdate {
            instrument,
            price,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// The configured price multiplier.
    pub fn price_multiplier(&self) -> f64 {
        self.ctx.multiplier
    }
}

/// Normalize a historical response with the same mapping as live updates.
/// Bars with non-finite values are skipped, not forwarded.
fn backfill_candles(bars: Vec<HistoryBar>, multiplier: f64) -> Vec<Candle> {
    bars.into_iter()
        .filter_map(|bar| match normalize_bar(&bar.into(), multiplier) {
            Ok(candle) => Some(candle),
            Err(e) => {
                tracing::warn!("skipping history bar: {}", e);
                None
            }
        })
        .collect()
}

// ─── Builder ─────────────────────────────────────────────────────────────────

pub struct DatafeedBuilder {
    api_url: String,
    ws_url: String,
    ws_config: Option<WsConfig>,
    price_multiplier: f64,
    history_retry: RetryPolicy,
}

impl Default for DatafeedBuilder {
    fn default() -> Self {
        Self {
            api_url: crate::network::DEFAULT_API_URL.to_string(),
            ws_url: crate::network::DEFAULT_WS_URL.to_string(),
            ws_config: None,
            price_multiplier: 1.0,
            history_retry: RetryPolicy::None,
        }
    }
}

impl DatafeedBuilder {
    pub fn api_url(mut self, url: &str) -> Self {
        self.api_url = url.to_string();
        self
    }

    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws_url = url.to_string();
        self
    }

    /// Full stream configuration (reconnect policy included). Takes
    /// precedence over [`ws_url`](Self::ws_url).
    pub fn ws_config(mut self, config: WsConfig) -> Self {
        self.ws_config = Some(config);
        self
    }

    /// Linear scale applied to OHLC values before delivery to the chart,
    /// e.g. a circulating supply to chart market cap instead of price.
    /// Must be finite and positive; validated in [`build`](Self::build).
    pub fn price_multiplier(mut self, multiplier: f64) -> Self {
        self.price_multiplier = multiplier;
        self
    }

    /// Retry policy for the history read. Defaults to `None`: the charting
    /// consumer owns backfill retries.
    pub fn history_retry(mut self, retry: RetryPolicy) -> Self {
        self.history_retry = retry;
        self
    }

    pub fn build(self) -> Result<Datafeed, FeedError> {
        if !self.price_multiplier.is_finite() || self.price_multiplier <= 0.0 {
            return Err(ConfigError::InvalidMultiplier(self.price_multiplier).into());
        }

        let ctx = StreamContext::new(PriceBus::default(), self.price_multiplier);
        let ws_config = self.ws_config.unwrap_or_else(|| WsConfig {
            url: self.ws_url,
            ..WsConfig::default()
        });

        Ok(Datafeed {
            http: ChartHttp::new(&self.api_url),
            ws: WsClient::new(ws_config, ctx.clone()),
            ctx,
            history_retry: self.history_retry,
        })
    }
}
