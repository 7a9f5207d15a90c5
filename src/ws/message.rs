//! Exchange WebSocket payload types.

use chrono::DateTime;
use serde::{Deserialize, Deserializer};

use crate::models::{Action, Side};
use crate::price::FixedPrice;

/// A price level on the wire: (price in dollars, resting contracts).
pub type PriceLevelDollars = (f64, i64);

/// A price level on the wire in cents: [price_cents, contracts].
pub type PriceLevelCents = [i64; 2];

/// Full restatement of both sides of a market's book.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookSnapshotMsg {
    pub market_ticker: String,
    #[serde(default)]
    pub yes: Option<Vec<PriceLevelCents>>,
    #[serde(default)]
    pub yes_dollars: Option<Vec<PriceLevelDollars>>,
    #[serde(default)]
    pub no: Option<Vec<PriceLevelCents>>,
    #[serde(default)]
    pub no_dollars: Option<Vec<PriceLevelDollars>>,
}

impl OrderbookSnapshotMsg {
    /// YES-side levels as fixed-point prices, preferring the dollar fields.
    pub fn yes_levels(&self) -> Vec<(FixedPrice, i64)> {
        levels(&self.yes_dollars, &self.yes)
    }

    /// NO-side levels as fixed-point prices, preferring the dollar fields.
    pub fn no_levels(&self) -> Vec<(FixedPrice, i64)> {
        levels(&self.no_dollars, &self.no)
    }
}

fn levels(
    dollars: &Option<Vec<PriceLevelDollars>>,
    cents: &Option<Vec<PriceLevelCents>>,
) -> Vec<(FixedPrice, i64)> {
    if let Some(dollars) = dollars {
        return dollars
            .iter()
            .map(|&(price, count)| (FixedPrice::from_dollars(price), count))
            .collect();
    }
    cents
        .as_ref()
        .map(|levels| {
            levels
                .iter()
                .map(|&[price, count]| (FixedPrice::from_units(price * 100), count))
                .collect()
        })
        .unwrap_or_default()
}

/// Incremental size change at one price level.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookDeltaMsg {
    pub market_ticker: String,
    pub side: Side,
    pub price_dollars: FixedPrice,
    pub delta: i64,
    /// POSIX nanoseconds. The feed has emitted both integer and RFC 3339
    /// forms; both are accepted.
    #[serde(deserialize_with = "de_timestamp_ns")]
    pub ts: i64,
}

/// A portion of one of our orders was matched.
#[derive(Debug, Clone, Deserialize)]
pub struct FillMsg {
    pub trade_id: String,
    pub order_id: String,
    pub market_ticker: String,
    pub side: Side,
    #[serde(default)]
    pub purchased_side: Option<Side>,
    pub yes_price_dollars: FixedPrice,
    pub count: i64,
    pub action: Action,
    /// Net position after the match, reported by the exchange. Authoritative.
    pub post_position: i64,
    /// POSIX seconds.
    pub ts: i64,
}

impl FillMsg {
    /// Fill time in POSIX nanoseconds.
    pub fn ts_ns(&self) -> i64 {
        self.ts.saturating_mul(1_000_000_000)
    }
}

/// Acknowledgement of a subscription request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribedMsg {
    pub channel: String,
    pub sid: i64,
}

/// Server-reported error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMsg {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// WebSocket error code for failed authentication. Fatal.
pub const ERROR_CODE_AUTH: i64 = 401;

fn de_timestamp_ns<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TsRepr {
        Ns(i64),
        Iso(String),
    }

    match TsRepr::deserialize(deserializer)? {
        TsRepr::Ns(ns) => Ok(ns),
        TsRepr::Iso(s) => {
            let parsed = DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
                .map_err(serde::de::Error::custom)?;
            parsed
                .timestamp_nanos_opt()
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
        }
    }
}
