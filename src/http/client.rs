//! Low-level HTTP client, `ChartHttp`.
//!
//! One method per REST endpoint, returning wire types. Conversion to
//! consumer candles happens at the `Datafeed` boundary.

use crate::chart::wire::HistoryBar;
use crate::error::HttpError;
use crate::http::retry::RetryPolicy;
use crate::shared::{InstrumentId, Timeframe};

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Low-level client for the chart REST API.
#[derive(Clone)]
pub struct ChartHttp {
    base_url: String,
    client: Client,
}

impl ChartHttp {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Fetch historical OHLCV bars for one instrument and timeframe.
    ///
    /// `from`/`to` are Unix seconds, inclusive bounds chosen by the server.
    pub async fn get_chart_data(
        &self,
        instrument: &InstrumentId,
        timeframe: &Timeframe,
        from: u64,
        to: u64,
        retry: RetryPolicy,
    ) -> Result<Vec<HistoryBar>, HttpError> {
        let url = format!(
            "{}/api/chart/history?address={}&timeframe={}&from={}&to={}",
            self.base_url,
            urlencoding::encode(instrument.as_str()),
            urlencoding::encode(timeframe.as_str()),
            from,
            to
        );
        self.get(&url, retry).await
    }

    // ── Internal HTTP methods ────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        retry: RetryPolicy,
    ) -> Result<T, HttpError> {
        let Some(config) = retry.config() else {
            return self.do_get(url).await;
        };

        let mut last_error = None;

        for attempt in 0..=config.max_retries {
            match self.do_get::<T>(url).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    let should_retry = match &e {
                        HttpError::ServerError { status, .. } => {
                            config.retryable_statuses.contains(status)
                        }
                        HttpError::RateLimited { retry_after_ms } => {
                            if let Some(ms) = retry_after_ms {
                                tokio::time::sleep(Duration::from_millis(*ms)).await;
                            }
                            true
                        }
                        HttpError::Timeout => true,
                        HttpError::Reqwest(re) => {
                            re.is_connect() || re.is_timeout() || re.is_request()
                        }
                        _ => false,
                    };

                    if should_retry && attempt < config.max_retries {
                        let delay = config.backoff_delay(attempt);
                        tracing::debug!(
                            attempt = attempt + 1,
                            max = config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying request to {}",
                            url
                        );
                        tokio::time::sleep(delay).await;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(HttpError::MaxRetriesExceeded {
            attempts: config.max_retries + 1,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn do_get<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();

        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let status_code = status.as_u16();
        let body = resp.text().await.unwrap_or_default();

        match status_code {
            404 => Err(HttpError::NotFound(body)),
            429 => Err(HttpError::RateLimited {
                retry_after_ms: None,
            }),
            400..=499 => Err(HttpError::BadRequest(body)),
            _ => Err(HttpError::ServerError {
                status: status_code,
                body,
            }),
        }
    }
}
