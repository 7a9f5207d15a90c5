//! Realized volatility estimation from rolling 5-minute candles.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{Error, Result};
use crate::signal::{Candle, CandleClient};

/// Number of 5-minute candles retained (2 hours).
const CANDLE_WINDOW: usize = 24;

/// Minimum usable candles before an estimate is produced.
const MIN_CANDLES: usize = 12;

/// 5-minute periods in a year, for annualization.
const PERIODS_PER_YEAR: f64 = 12.0 * 24.0 * 365.0;

/// Candle timeframe requested from the provider.
const TIMEFRAME: &str = "5m";

/// Refresh threshold: estimates older than this are refreshed before use.
const STALE_AFTER: Duration = Duration::from_secs(300);

/// Default instrument for the volatility feed.
const DEFAULT_INSTRUMENT: &str = "ETH_USD";

/// Rolling-candle volatility estimator.
///
/// Holds the last [`CANDLE_WINDOW`] candles and computes annualized realized
/// volatility with the Parkinson (high/low range) and Rogers–Satchell
/// (open/high/low/close) estimators. Data freshness is the caller's
/// responsibility: the executor refreshes when [`is_stale`](Self::is_stale).
#[derive(Debug)]
pub struct VolatilityEstimator {
    candles: VecDeque<Candle>,
    client: CandleClient,
    instrument: String,
    refreshed_at: Instant,
}

impl VolatilityEstimator {
    pub fn new(client: CandleClient) -> Self {
        Self::with_instrument(client, DEFAULT_INSTRUMENT)
    }

    pub fn with_instrument(client: CandleClient, instrument: impl Into<String>) -> Self {
        Self {
            candles: VecDeque::with_capacity(CANDLE_WINDOW),
            client,
            instrument: instrument.into(),
            refreshed_at: Instant::now(),
        }
    }

    /// Replace the window with the latest candles from the provider.
    pub async fn prime(&mut self) -> Result<()> {
        let fetched = self
            .client
            .get_candlesticks(&self.instrument, TIMEFRAME, CANDLE_WINDOW as u32 * 2)
            .await?;
        self.candles.clear();
        for candle in fetched.into_iter().rev().take(CANDLE_WINDOW).rev() {
            self.candles.push_back(candle);
        }
        self.refreshed_at = Instant::now();
        Ok(())
    }

    /// Fetch the latest candles and append those strictly newer than the
    /// last retained one.
    pub async fn refresh(&mut self) -> Result<()> {
        let fetched = self
            .client
            .get_candlesticks(&self.instrument, TIMEFRAME, CANDLE_WINDOW as u32)
            .await?;
        self.absorb(fetched);
        self.refreshed_at = Instant::now();
        Ok(())
    }

    fn absorb(&mut self, fetched: Vec<Candle>) {
        match self.candles.back().map(|c| c.t) {
            None => {
                if let Some(last) = fetched.last() {
                    self.push(*last);
                }
            }
            Some(last_time) => {
                for candle in fetched {
                    if candle.t > last_time {
                        self.push(candle);
                    }
                }
            }
        }
    }

    fn push(&mut self, candle: Candle) {
        if self.candles.len() == CANDLE_WINDOW {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    /// Whether the window is due for a refresh.
    pub fn is_stale(&self) -> bool {
        self.refreshed_at.elapsed() >= STALE_AFTER
    }

    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    /// Parkinson estimate: a 0.7/0.3 blend of the short window (last 24
    /// candles) and everything buffered.
    ///
    /// # Errors
    /// `InsufficientData` with fewer than [`MIN_CANDLES`] candles.
    pub fn parkinson_estimate(&self) -> Result<f64> {
        let candles: Vec<Candle> = self.candles.iter().copied().collect();
        if candles.len() < MIN_CANDLES {
            return Err(Error::InsufficientData(candles.len()));
        }

        let start = candles.len().saturating_sub(CANDLE_WINDOW);
        let short = parkinson(&candles[start..]);
        let long = parkinson(&candles);
        let vol = 0.7 * short + 0.3 * long;

        if vol < 0.05 {
            warn!(target: "prices", vol, "low volatility estimate");
        }
        Ok(vol)
    }

    /// Rogers–Satchell estimate over all valid buffered candles.
    ///
    /// # Errors
    /// `InsufficientData` with fewer than [`MIN_CANDLES`] candles or when no
    /// candle passes the validity filter (H > L, all prices positive).
    pub fn rogers_satchell_estimate(&self) -> Result<f64> {
        let candles: Vec<Candle> = self.candles.iter().copied().collect();
        if candles.len() < MIN_CANDLES {
            return Err(Error::InsufficientData(candles.len()));
        }

        let vol = rogers_satchell(&candles)?;
        if vol < 0.05 {
            warn!(target: "prices", vol, "low volatility estimate");
        }
        Ok(vol)
    }
}

/// Annualized Parkinson volatility: mean of (ln(H/L))² / (4 ln 2).
fn parkinson(candles: &[Candle]) -> f64 {
    let sum: f64 = candles
        .iter()
        .map(|c| {
            let log_hl = (c.h / c.l).ln();
            log_hl * log_hl
        })
        .sum();
    let variance = sum / candles.len() as f64 / (4.0 * std::f64::consts::LN_2);
    (variance * PERIODS_PER_YEAR).sqrt()
}

/// Annualized Rogers–Satchell volatility over valid candles.
fn rogers_satchell(candles: &[Candle]) -> Result<f64> {
    let mut rs_sum = 0.0;
    let mut valid = 0usize;

    for c in candles {
        if c.h <= c.l || c.o.min(c.h).min(c.l).min(c.c) <= 0.0 {
            continue;
        }
        rs_sum += (c.h / c.c).ln() * (c.h / c.o).ln() + (c.l / c.c).ln() * (c.l / c.o).ln();
        valid += 1;
    }

    if valid == 0 {
        return Err(Error::InsufficientData(0));
    }

    let variance = rs_sum / valid as f64;
    Ok((variance.max(0.0) * PERIODS_PER_YEAR).sqrt())
}
