//! REST-backed portfolio executor.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::client::ExchangeClient;
use crate::error::{DataError, ExecutionError, Result, RiskError};
use crate::market::Market;
use crate::models::{GetOrdersParams, GetPositionsParams, OrderRequest, OrderStatus, cents_to_dollars};
use crate::ws::FillMsg;

use super::portfolio::{Portfolio, PortfolioSnapshot, RiskLimits, clamp_order, unwind_order};

/// Portfolio state machine backed by the exchange REST API.
///
/// All trading actions and reconciliation serialize on one execution lock;
/// fill handling is single-step synchronous and takes only the brief state
/// mutex. Must be reconciled before trading starts.
///
/// Clones share the same state and lock.
#[derive(Clone)]
pub struct LiveExecutor {
    client: ExchangeClient,
    market: Market,
    limits: RiskLimits,
    portfolio: Arc<Mutex<Portfolio>>,
    execution: Arc<AsyncMutex<()>>,
}

impl LiveExecutor {
    pub fn new(client: ExchangeClient, market: Market, limits: RiskLimits) -> Self {
        Self {
            client,
            market,
            limits,
            portfolio: Arc::new(Mutex::new(Portfolio::default())),
            execution: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub(crate) fn execution_lock(&self) -> &AsyncMutex<()> {
        &self.execution
    }

    fn portfolio(&self) -> MutexGuard<'_, Portfolio> {
        self.portfolio.lock().expect("portfolio lock poisoned")
    }

    /// Portfolio snapshot for a trading decision.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        self.portfolio().snapshot()
    }

    /// Total cost of a trade: fees plus notional.
    pub fn transaction_cost(&self, price: f64, count_taken: i64, count_made: i64) -> f64 {
        let fees = self
            .market
            .fee_schedule()
            .mixed_fees(price, count_made, count_taken);
        fees + price * (count_taken + count_made) as f64
    }

    /// Synchronous fill bookkeeping. The exchange's `post_position` is
    /// authoritative for inventory.
    ///
    /// # Errors
    /// `PositionLimitExceeded` when the post-fill inventory breaches the
    /// limit; the session must close out.
    pub fn handle_fill(&self, fill: &FillMsg) -> std::result::Result<(), RiskError> {
        let mut p = self.portfolio();
        let pre = p.inventory;
        p.apply_fill(fill);
        info!(
            target: "fills",
            order_id = %fill.order_id,
            count = fill.count,
            pre_inventory = pre,
            post_inventory = p.inventory,
            "fill applied"
        );
        p.check_inventory(self.limits.max_inventory)
    }

    /// Reconcile local state against the exchange: orders, then balance,
    /// then inventory, under the execution lock.
    pub async fn reconcile(&self) -> Result<()> {
        let _guard = self.execution.lock().await;
        self.sync_orders_locked().await?;
        self.sync_balance_locked().await?;
        self.sync_inventory_locked(true).await?;

        let (inventory, balance, orders) = {
            let p = self.portfolio();
            (p.inventory, p.balance, p.resting_orders.len())
        };
        info!(target: "state", inventory, balance, orders, "reconciled");
        Ok(())
    }

    /// Replace the resting-order map from the exchange's view.
    pub(crate) async fn sync_orders_locked(&self) -> Result<()> {
        let params = GetOrdersParams::new()
            .ticker(self.market.ticker())
            .status(OrderStatus::Resting);
        let response = self.client.get_orders(params).await?;

        let mut p = self.portfolio();
        p.resting_orders.clear();
        p.unregistered_fills.clear();
        for order in response.orders {
            if order.status == OrderStatus::Resting && order.remaining_count > 0 {
                p.resting_orders
                    .insert(order.order_id, order.remaining_count);
            }
        }
        Ok(())
    }

    /// Pull the balance; enforce the floor and log large deviations.
    pub(crate) async fn sync_balance_locked(&self) -> Result<()> {
        let response = self.client.get_balance().await?;
        let remote = cents_to_dollars(response.balance);

        let local = {
            let mut p = self.portfolio();
            let local = p.balance;
            p.balance = remote;
            local
        };

        if remote < self.limits.minimum_balance {
            error!(
                target: "state",
                balance = remote,
                minimum = self.limits.minimum_balance,
                "balance limit exceeded"
            );
            return Err(RiskError::BalanceLimitExceeded {
                minimum: self.limits.minimum_balance,
                balance: remote,
            }
            .into());
        }

        if (remote - local).abs() > self.limits.max_balance_dev {
            error!(
                target: "state",
                error = %DataError::BalanceMismatch { remote, local },
                "balance deviation beyond tolerance"
            );
        }
        Ok(())
    }

    /// Pull the net position for this market. `enforce_limits` is false on
    /// the close-out path so an over-limit position can still be unwound.
    pub(crate) async fn sync_inventory_locked(&self, enforce_limits: bool) -> Result<()> {
        let params = GetPositionsParams::new().ticker(self.market.ticker());
        let response = self.client.get_positions(params).await?;

        let (remote, local) = {
            let mut p = self.portfolio();
            let local = p.inventory;
            for position in &response.market_positions {
                if position.ticker == self.market.ticker() {
                    p.inventory = position.position;
                }
            }
            (p.inventory, local)
        };

        if enforce_limits && remote.abs() > self.limits.max_inventory {
            error!(
                target: "state",
                inventory = remote,
                limit = self.limits.max_inventory,
                "inventory limit exceeded"
            );
            return Err(RiskError::PositionLimitExceeded {
                limit: self.limits.max_inventory,
                inventory: remote,
            }
            .into());
        }

        if (remote - local).abs() > self.limits.max_inventory_dev {
            error!(
                target: "state",
                error = %DataError::PositionMismatch { remote, local },
                "position deviation beyond tolerance"
            );
        }
        Ok(())
    }

    /// Cancel every tracked resting order. Ids acknowledged without error
    /// are dropped; anything left triggers an order resync. Runs under the
    /// caller's execution lock.
    pub(crate) async fn cancel_outstanding_locked(&self) -> Result<()> {
        let ids: Vec<String> = self.portfolio().resting_orders.keys().cloned().collect();
        if ids.is_empty() {
            return Ok(());
        }

        match self.client.batch_cancel_orders(ids).await {
            Ok(response) => {
                let leftovers = {
                    let mut p = self.portfolio();
                    for result in &response.orders {
                        if let Some(order_id) = result.order_id() {
                            p.resting_orders.remove(order_id);
                            info!(target: "orders", order_id, "order cancelled");
                        } else if let Some(err) = &result.error {
                            warn!(
                                target: "orders",
                                error = %ExecutionError::CancelFailure(err.message.clone()),
                                code = %err.code,
                                "cancel rejected"
                            );
                        }
                    }
                    p.resting_orders.len()
                };

                if leftovers > 0 {
                    error!(
                        target: "orders",
                        error = %DataError::OrderMismatch,
                        leftovers,
                        "orders remained after batch cancel"
                    );
                    self.sync_orders_locked().await?;
                }
                Ok(())
            }
            Err(e) => {
                error!(target: "orders", error = %e, "batch cancel failed");
                self.sync_orders_locked().await
            }
        }
    }

    /// Clamp, submit, and register a batch of orders. Runs under the
    /// caller's execution lock. Rejections are logged and answered with an
    /// order resync.
    pub(crate) async fn place_batch_locked(&self, mut orders: Vec<OrderRequest>) -> Result<()> {
        {
            let mut p = self.portfolio();
            p.unregistered_fills.clear();
            for order in &mut orders {
                clamp_order(order, p.inventory, self.limits.max_inventory);
            }
        }
        orders.retain(|o| o.count > 0);
        if orders.is_empty() {
            return Ok(());
        }

        let response = match self.client.batch_create_orders(orders).await {
            Ok(response) => response,
            Err(e) => {
                error!(target: "orders", error = %e, "batch placement failed");
                return self.sync_orders_locked().await;
            }
        };

        let mut rejected = false;
        {
            let mut p = self.portfolio();
            for result in &response.orders {
                match (&result.order, &result.error) {
                    (Some(order), None) => {
                        info!(
                            target: "orders",
                            order_id = %order.order_id,
                            side = %order.side,
                            action = %order.action,
                            remaining = order.remaining_count,
                            price = ?order.yes_price_dollars,
                            "order placed"
                        );
                        p.register_placement(&order.order_id, order.remaining_count);
                    }
                    (_, Some(err)) => {
                        error!(
                            target: "orders",
                            error = %ExecutionError::OrderRejection {
                                code: err.code.clone(),
                                message: err.message.clone(),
                            },
                            "order rejected"
                        );
                        rejected = true;
                    }
                    (None, None) => {
                        warn!(target: "orders", "empty batch result entry");
                    }
                }
            }
        }

        if rejected {
            self.sync_orders_locked().await?;
        }
        Ok(())
    }

    /// Submit a batch under the execution lock.
    pub async fn place_batch(&self, orders: Vec<OrderRequest>) -> Result<()> {
        let _guard = self.execution.lock().await;
        self.place_batch_locked(orders).await
    }

    /// Cancel all resting orders under the execution lock.
    pub async fn cancel_all(&self) -> Result<()> {
        let _guard = self.execution.lock().await;
        self.cancel_outstanding_locked().await
    }

    /// Atomically close out: resync orders, cancel everything, refetch the
    /// position without limit enforcement, and unwind it with one market
    /// order.
    pub async fn close_position(&self) -> Result<()> {
        let _guard = self.execution.lock().await;
        self.sync_orders_locked().await?;
        self.cancel_outstanding_locked().await?;
        self.sync_inventory_locked(false).await?;

        let inventory = self.portfolio().inventory;
        let Some(order) = unwind_order(self.market.ticker(), inventory) else {
            info!(target: "orders", "no position to close");
            return Ok(());
        };

        info!(
            target: "orders",
            side = %order.side,
            count = order.count,
            "closing position with market order"
        );
        self.client.batch_create_orders(vec![order]).await?;
        Ok(())
    }

    /// Balance in dollars from the REST endpoint.
    pub async fn get_balance(&self) -> Result<f64> {
        let response = self.client.get_balance().await?;
        Ok(cents_to_dollars(response.balance))
    }
}

impl std::fmt::Debug for LiveExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let p = self.portfolio();
        f.debug_struct("LiveExecutor")
            .field("ticker", &self.market.ticker())
            .field("inventory", &p.inventory)
            .field("balance", &p.balance)
            .field("resting_orders", &p.resting_orders.len())
            .finish()
    }
}
