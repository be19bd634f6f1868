//! Shared newtypes used across the HTTP and WebSocket layers.
//!
//! Both types are serialization-transparent: they serialize/deserialize as
//! plain JSON strings, so they can be embedded directly in wire types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ─── InstrumentId ────────────────────────────────────────────────────────────

/// Opaque identifier for the instrument being charted (e.g. a token address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id means the instrument is not yet known to the caller.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InstrumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for InstrumentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(InstrumentId(s.to_string()))
    }
}

// ─── Timeframe ───────────────────────────────────────────────────────────────

/// Candle granularity label (e.g. `"1m"`, `"5m"`, `"1D"`).
///
/// Forwarded verbatim to the history endpoint and the live stream; the
/// client does not interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeframe(String);

impl Timeframe {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self("5m".to_string())
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Timeframe {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Timeframe {
    fn from(s: String) -> Self {
        Self(s)
    }
}
