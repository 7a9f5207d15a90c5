//! Portfolio execution: order lifecycle, risk enforcement, reconciliation.

mod live;
mod options;
mod portfolio;
mod sim;

pub use live::LiveExecutor;
pub use options::{OptionsExecutor, PricingParams};
pub use portfolio::{
    Portfolio, PortfolioSnapshot, RiskLimits, clamp_order, flip_sale, unwind_order,
};
pub use sim::SimExecutor;

use std::future::Future;

use crate::error::{Result, RiskError};
use crate::models::OrderRequest;
use crate::ws::FillMsg;

/// Common executor contract shared by the live and paper variants.
///
/// `on_fill` and `on_market_update` are synchronous event handlers; the
/// async operations serialize on the implementation's execution lock.
pub trait Execute: Send + Sync + Clone + 'static {
    /// Synchronous fill bookkeeping; a risk breach is terminal.
    fn on_fill(&self, fill: &FillMsg) -> std::result::Result<(), RiskError>;

    /// Fire-and-forget market update signal.
    fn on_market_update(&self);

    /// Pull authoritative orders, balance, and inventory from the exchange.
    fn reconcile(&self) -> impl Future<Output = Result<()>> + Send;

    /// Clamp and submit a batch of orders.
    fn place_batch(&self, orders: Vec<OrderRequest>) -> impl Future<Output = Result<()>> + Send;

    /// Cancel all resting orders.
    fn cancel_all(&self) -> impl Future<Output = Result<()>> + Send;

    /// Flatten the position with a single market order.
    fn close_position(&self) -> impl Future<Output = Result<()>> + Send;

    /// Current balance in dollars.
    fn get_balance(&self) -> impl Future<Output = Result<f64>> + Send;
}
