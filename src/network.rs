//! Default endpoint constants.

/// Default REST API base URL for historical chart data.
pub const DEFAULT_API_URL: &str = "https://api.chartfeed.dev";

/// Default WebSocket URL for the live chart stream.
pub const DEFAULT_WS_URL: &str = "wss://stream.chartfeed.dev/chart";
