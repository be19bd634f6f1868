//! # chartfeed
//!
//! A Rust client for streaming OHLCV chart data: one-shot historical
//! backfill over REST plus a live candle stream over WebSocket, with
//! transparent reconnection and resubscription.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: shared newtypes, candle/wire types, pure normalization
//! 2. **HTTP**: `ChartHttp` with selectable per-request retry policies
//! 3. **WebSocket**: subscription registry + background connection task
//! 4. **High-Level Client**: `Datafeed`, the composed feed adapter
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chartfeed::prelude::*;
//!
//! let mut feed = Datafeed::builder()
//!     .api_url("https://api.example.com")
//!     .ws_url("wss://stream.example.com/chart")
//!     .price_multiplier(1.0)
//!     .build()?;
//!
//! feed.connect().await?;
//! feed.subscribe("TOK".into(), "5m".into(), |candle| {
//!     println!("close: {}", candle.close);
//! });
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes: instrument id, timeframe.
pub mod shared;

/// Chart domain: candle type, wire formats, normalization, price cache.
pub mod chart;

/// Unified error types.
pub mod error;

/// Default endpoint constants.
pub mod network;

// ── Layer 2: HTTP ────────────────────────────────────────────────────────────

/// HTTP client with retry policies.
pub mod http;

// ── Layer 3: WebSocket ───────────────────────────────────────────────────────

/// Live stream: control messages, subscription registry, connection manager.
pub mod ws;

/// In-process price broadcast bus.
pub mod bus;

// ── Layer 4: High-Level Client ───────────────────────────────────────────────

/// `Datafeed`, the primary entry point.
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    pub use crate::bus::{PriceBus, PriceUpdate};
    pub use crate::chart::wire::SymbolInfo;
    pub use crate::chart::{Candle, PriceCache};
    pub use crate::client::{Datafeed, DatafeedBuilder};
    pub use crate::error::{ConfigError, FeedError, HttpError, WsError};
    pub use crate::http::{RetryConfig, RetryPolicy};
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_WS_URL};
    pub use crate::shared::{InstrumentId, Timeframe};
    pub use crate::ws::{ConnectionState, FeedEvent, WsConfig};
}
