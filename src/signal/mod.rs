//! Underlying-asset signal feed: WebSocket tick stream and candlestick REST
//! client.

mod message;
mod rest;
mod socket;

pub use message::{IndexTick, SignalTick, TickerUpdate};
pub use rest::{Candle, CandleClient};
pub use socket::{SignalHandle, SignalSocket, TickSink};
