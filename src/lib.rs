//! Automated trading agent for Kalshi binary prediction markets.
//!
//! The agent consumes the exchange's orderbook stream and an
//! underlying-asset price feed, prices each binary market as a European
//! binary option, and works the displayed bid/ask whenever the model value
//! clears the configured edge. Positions, balance, and open orders are
//! tracked locally and periodically reconciled against the exchange.
//!
//! The main moving parts:
//!
//! - [`book`]: sequence-validated incremental orderbook with fixed-point
//!   prices and the YES/NO complement invariant.
//! - [`ws`]: the exchange WebSocket subscription state machine with gap
//!   detection, snapshot rebuild, and reconnection.
//! - [`executor`]: the portfolio state machine (fill accounting under
//!   concurrent placement, risk-limit enforcement, reconciliation) in live
//!   and paper variants.
//! - [`runner`]: the supervisory loop composing everything, with periodic
//!   reconciliation, staleness and terminal-time limits, and safe position
//!   unwinding on every exit path.

pub mod auth;
pub mod book;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod fees;
pub mod logging;
pub mod market;
pub mod models;
pub mod price;
pub mod pricer;
pub mod runner;
pub mod signal;
pub mod sync;
pub mod vol;
pub mod ws;

pub use auth::Credentials;
pub use book::{OrderBook, PriceBuffer, TopOfBook};
pub use client::{Environment, ExchangeClient};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use executor::{
    Execute, LiveExecutor, OptionsExecutor, PricingParams, RiskLimits, SimExecutor,
};
pub use fees::FeeSchedule;
pub use market::{BookUpdate, Market, SequenceGap};
pub use models::{Action, Order, OrderRequest, Side, cents_to_dollars};
pub use price::FixedPrice;
pub use runner::SessionRunner;
pub use signal::{SignalHandle, SignalSocket};
pub use vol::VolatilityEstimator;
pub use ws::ExchangeSocket;
