//! WebSocket layer: control messages, subscription registry, connection
//! management.
//!
//! The transport is `tokio-tungstenite`, driven by a background tokio task.
//! The public API talks to it over an `mpsc` command channel; advisory
//! events flow back on a bounded event channel.

pub mod client;
pub mod registry;

use crate::bus::PriceBus;
use crate::chart::wire::ChartUpdate;
use crate::chart::PriceCache;
use crate::shared::{InstrumentId, Timeframe};
use registry::SubscriptionRegistry;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use client::WsClient;

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Control messages sent from client to server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum MessageOut {
    #[serde(rename = "subscribeToChart", rename_all = "camelCase")]
    Subscribe {
        instrument_address: InstrumentId,
        timeframe: Timeframe,
    },
    #[serde(rename = "unsubscribeFromChart", rename_all = "camelCase")]
    Unsubscribe {
        instrument_address: InstrumentId,
        timeframe: Timeframe,
    },
}

impl MessageOut {
    pub fn subscribe(instrument: InstrumentId, timeframe: Timeframe) -> Self {
        Self::Subscribe {
            instrument_address: instrument,
            timeframe,
        }
    }

    pub fn unsubscribe(instrument: InstrumentId, timeframe: Timeframe) -> Self {
        Self::Unsubscribe {
            instrument_address: instrument,
            timeframe,
        }
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// Inbound message kinds from the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Kind {
    #[serde(rename = "chartUpdate")]
    ChartUpdate(ChartUpdate),
    #[serde(rename = "error")]
    Error(ServerErrorPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorPayload {
    pub message: String,
    pub code: Option<String>,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Advisory events emitted by the feed.
///
/// Purely observational: the feed never blocks on delivery, and a full
/// event channel drops events rather than stalling data flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Stream connection established (also after a transparent reconnect).
    Connected,
    /// Stream connection lost; a reconnect may follow.
    Disconnected { reason: String },
    /// Retry budget spent; no further automatic reconnects. A later
    /// explicit `connect()` starts a fresh cycle.
    Exhausted,
    /// A malformed or failed stream message was dropped.
    StreamError(String),
    /// A historical backfill request failed; the call returned no candles.
    HistoryError(String),
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Observable state of the stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Retry budget spent without a successful connection.
    Exhausted = 3,
    /// Deliberately torn down via `close()`.
    Closed = 4,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Exhausted,
            4 => Self::Closed,
            _ => Self::Disconnected,
        }
    }
}

// ─── Config ──────────────────────────────────────────────────────────────────

/// Configuration for the stream connection.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub reconnect: bool,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: crate::network::DEFAULT_WS_URL.to_string(),
            reconnect: true,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: 5,
        }
    }
}

// ─── Shared stream context ───────────────────────────────────────────────────

/// State shared between the public API and the background stream task.
///
/// The registry sits behind one mutex so resubscription-on-reconnect reads a
/// consistent snapshot of the subscription table.
#[derive(Clone)]
pub(crate) struct StreamContext {
    pub registry: Arc<Mutex<SubscriptionRegistry>>,
    pub prices: Arc<Mutex<PriceCache>>,
    pub bus: PriceBus,
    pub multiplier: f64,
}

impl StreamContext {
    pub fn new(bus: PriceBus, multiplier: f64) -> Self {
        Self {
            registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            prices: Arc::new(Mutex::new(PriceCache::new())),
            bus,
            multiplier,
        }
    }

    /// Lock the subscription table. Poisoning is ignored: the registry
    /// holds no invariants a panicked callback could break.
    pub fn lock_registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock_prices(&self) -> MutexGuard<'_, PriceCache> {
        self.prices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
