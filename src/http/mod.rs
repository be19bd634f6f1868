//! HTTP layer: REST client for historical chart data, with selectable
//! per-request retry policies.

pub mod client;
pub mod retry;

pub use client::ChartHttp;
pub use retry::{RetryConfig, RetryPolicy};
