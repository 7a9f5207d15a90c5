//! Signal feed message types.

use serde::{Deserialize, Deserializer};

/// Parse a numeric field that the provider serializes as either a JSON
/// number or a decimal string.
pub(crate) fn de_flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(f64),
        Str(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Num(v) => Ok(v),
        Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Order-book ticker update for an instrument.
///
/// Field names follow the provider's wire format: `b` best bid, `k` best
/// ask, `a` last trade, `i` instrument, `t` time (ms).
#[derive(Debug, Clone, Deserialize)]
pub struct TickerUpdate {
    #[serde(deserialize_with = "de_flexible_f64")]
    pub b: f64,
    #[serde(deserialize_with = "de_flexible_f64")]
    pub k: f64,
    #[serde(default, deserialize_with = "de_opt_flexible_f64")]
    pub a: Option<f64>,
    #[serde(default)]
    pub i: Option<String>,
    pub t: i64,
}

fn de_opt_flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_flexible_f64")] f64);

    Option::<Wrapper>::deserialize(deserializer).map(|opt| opt.map(|w| w.0))
}

/// Index value tick: `v` value, `t` time (ms).
#[derive(Debug, Clone, Deserialize)]
pub struct IndexTick {
    #[serde(deserialize_with = "de_flexible_f64")]
    pub v: f64,
    pub t: i64,
}

/// The freshest observation from whichever channel is streaming.
#[derive(Debug, Clone)]
pub enum SignalTick {
    Ticker(TickerUpdate),
    Index(IndexTick),
}

impl SignalTick {
    /// Estimated price of the underlying: bid/ask mid for ticker streams,
    /// the index value for index streams.
    pub fn price(&self) -> f64 {
        match self {
            SignalTick::Ticker(t) => 0.5 * (t.b + t.k),
            SignalTick::Index(t) => t.v,
        }
    }

    /// Observation time in POSIX milliseconds.
    pub fn ts_ms(&self) -> i64 {
        match self {
            SignalTick::Ticker(t) => t.t,
            SignalTick::Index(t) => t.t,
        }
    }
}
