//! Candlestick REST client for the signal provider.

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result, TransportError};

use super::message::de_flexible_f64;

const BASE_URL: &str = "https://api.crypto.com/exchange/v1";

/// One OHLC candle. Times are POSIX milliseconds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Candle {
    #[serde(deserialize_with = "de_flexible_f64")]
    pub o: f64,
    #[serde(deserialize_with = "de_flexible_f64")]
    pub h: f64,
    #[serde(deserialize_with = "de_flexible_f64")]
    pub l: f64,
    #[serde(deserialize_with = "de_flexible_f64")]
    pub c: f64,
    pub t: i64,
}

#[derive(Debug, Deserialize)]
struct CandlestickResult {
    #[serde(default)]
    data: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct CandlestickResponse {
    #[serde(default)]
    result: Option<CandlestickResult>,
}

/// Thin client for the provider's public candlestick endpoint.
#[derive(Debug, Clone)]
pub struct CandleClient {
    client: reqwest::Client,
    base_url: String,
}

impl CandleClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(TransportError::Network(e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch up to `count` candles for an instrument at the given timeframe
    /// (e.g. `"5m"`), oldest first.
    pub async fn get_candlesticks(
        &self,
        instrument: &str,
        timeframe: &str,
        count: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/public/get-candlestick", self.base_url);
        debug!(target: "signal_websocket", instrument, timeframe, count, "fetching candles");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("instrument_name", instrument),
                ("timeframe", timeframe),
                ("count", &count.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Network(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            }));
        }

        let parsed: CandlestickResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(TransportError::Network(e)))?;

        Ok(parsed.result.map(|r| r.data).unwrap_or_default())
    }
}
