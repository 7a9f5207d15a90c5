//! Paper-trading executor.
//!
//! Keeps the whole portfolio in memory and simulates the exchange's
//! matching against the live orderbook: flip-sale translation, top-of-book
//! fills with $1 pair redemption, and mark-to-book position close. The
//! pricing loop is the same edge decision the live executor runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::book::TopOfBook;
use crate::error::Result;
use crate::market::Market;
use crate::models::OrderRequest;
use crate::signal::SignalHandle;
use crate::sync::Event;
use crate::vol::VolatilityEstimator;
use crate::ws::FillMsg;

use super::options::{PricingParams, edge_order, fair_value, now_ms};
use super::portfolio::{RiskLimits, clamp_order, flip_sale};

const TICK_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct SimState {
    balance: f64,
    inventory: i64,
    open_orders: Vec<OrderRequest>,
}

/// In-memory executor simulating the exchange's documented matching.
#[derive(Clone)]
pub struct SimExecutor {
    market: Market,
    limits: RiskLimits,
    params: PricingParams,
    vol: Arc<AsyncMutex<VolatilityEstimator>>,
    signal: SignalHandle,
    state: Arc<Mutex<SimState>>,
    execution: Arc<AsyncMutex<()>>,
    tick_event: Arc<Event>,
    processor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SimExecutor {
    pub fn new(
        market: Market,
        limits: RiskLimits,
        params: PricingParams,
        vol: Arc<AsyncMutex<VolatilityEstimator>>,
        signal: SignalHandle,
        starting_balance: f64,
    ) -> Self {
        Self {
            market,
            limits,
            params,
            vol,
            signal,
            state: Arc::new(Mutex::new(SimState {
                balance: starting_balance,
                inventory: 0,
                open_orders: Vec::new(),
            })),
            execution: Arc::new(AsyncMutex::new(())),
            tick_event: Arc::new(Event::new()),
            processor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn balance(&self) -> f64 {
        self.state.lock().expect("sim lock poisoned").balance
    }

    pub fn inventory(&self) -> i64 {
        self.state.lock().expect("sim lock poisoned").inventory
    }

    pub fn open_order_count(&self) -> usize {
        self.state.lock().expect("sim lock poisoned").open_orders.len()
    }

    /// Market update: run the fill simulation against the fresh book, then
    /// kick the pricing loop.
    pub fn on_book_update(&self) {
        self.simulate_fills(&self.market.top());
        self.on_tick();
    }

    /// Tick signal, conflated exactly like the live options executor.
    pub fn on_tick(&self) {
        self.tick_event.set();

        let mut slot = self.processor.lock().expect("processor lock poisoned");
        let running = slot.as_ref().is_some_and(|handle| !handle.is_finished());
        if !running {
            let me = self.clone();
            *slot = Some(tokio::spawn(async move { me.tick_processor().await }));
        }
    }

    async fn tick_processor(&self) {
        loop {
            if timeout(TICK_IDLE_TIMEOUT, self.tick_event.wait())
                .await
                .is_err()
            {
                return;
            }
            self.tick_event.clear();

            if let Err(e) = self.tick_action().await {
                error!(target: "prices", error = %e, "sim tick action failed");
                return;
            }
        }
    }

    async fn tick_action(&self) -> Result<()> {
        let _guard = self.execution.lock().await;

        self.state.lock().expect("sim lock poisoned").open_orders.clear();

        {
            let mut vol = self.vol.lock().await;
            if vol.is_stale()
                && let Err(e) = vol.refresh().await
            {
                warn!(target: "prices", error = %e, "volatility refresh failed");
            }
        }

        let top = self.market.top();
        let inventory = self.inventory();

        let Some(tick) = self.signal.latest() else {
            return Ok(());
        };
        let sigma = match self.vol.lock().await.rogers_satchell_estimate() {
            Ok(sigma) => sigma,
            Err(e) => {
                warn!(target: "prices", error = %e, "no volatility estimate");
                return Ok(());
            }
        };

        let Some(fair) = fair_value(&self.params, tick.price(), sigma, now_ms()) else {
            return Ok(());
        };

        info!(
            target: "prices",
            fair,
            best_bid = %top.best_bid,
            best_ask = %top.best_ask,
            "sim price decision"
        );

        if let Some(order) = edge_order(
            self.market.ticker(),
            &top,
            fair,
            self.params.min_edge,
            inventory,
            self.limits.max_inventory,
        ) {
            self.place_sim(vec![order]);
        }
        Ok(())
    }

    /// Simulated placement: run the exchange's flip-sale translation, clamp
    /// against inventory limits, and rest the survivors.
    pub(crate) fn place_sim(&self, orders: Vec<OrderRequest>) {
        let mut state = self.state.lock().expect("sim lock poisoned");
        let translated = flip_sale(orders, state.inventory);
        for mut order in translated {
            clamp_order(&mut order, state.inventory, self.limits.max_inventory);
            if order.count == 0 {
                continue;
            }
            let signed = if order.is_long() {
                order.count
            } else {
                -order.count
            };
            info!(
                target: "orders",
                delta = signed,
                price = ?order.yes_price_dollars,
                "simulated order placement"
            );
            state.open_orders.push(order);
        }
    }

    /// Check resting orders against the top of book. Fills are all-or-none
    /// at the order's limit price; a buy that offsets an opposite position
    /// redeems $1 per matched pair.
    pub(crate) fn simulate_fills(&self, top: &TopOfBook) {
        let mut state = self.state.lock().expect("sim lock poisoned");

        let mut remaining = Vec::with_capacity(state.open_orders.len());
        let mut filled = Vec::new();
        for order in state.open_orders.drain(..) {
            let Some(price) = order.yes_price_dollars else {
                remaining.push(order);
                continue;
            };
            let crosses = if order.is_long() {
                top.best_ask <= price
            } else {
                top.best_bid >= price
            };
            if crosses {
                filled.push(order);
            } else {
                remaining.push(order);
            }
        }
        state.open_orders = remaining;

        for order in filled {
            let price = order.yes_price_dollars.expect("filled orders carry a price");
            let count = order.count;
            let is_long = order.is_long();
            let delta = if is_long { count } else { -count };
            let cost = match order.side {
                crate::models::Side::Yes => price.to_f64(),
                crate::models::Side::No => price.complement().to_f64(),
            };

            let old_inventory = state.inventory;
            match order.action {
                crate::models::Action::Buy => {
                    state.balance -= count as f64 * cost;
                    if is_long && old_inventory < 0 {
                        let pairs = count.min(-old_inventory);
                        state.balance += pairs as f64;
                    } else if !is_long && old_inventory > 0 {
                        let pairs = count.min(old_inventory);
                        state.balance += pairs as f64;
                    }
                }
                crate::models::Action::Sell => {
                    state.balance += count as f64 * cost;
                }
            }

            state.inventory += delta;
            info!(
                target: "fills",
                delta,
                price = %price,
                balance = state.balance,
                inventory = state.inventory,
                "simulated fill"
            );
        }
    }

    /// Exchange fills do not occur in paper mode; reconciliation is a no-op.
    pub fn handle_fill(&self, fill: &FillMsg) {
        debug!(target: "fills", order_id = %fill.order_id, "ignoring exchange fill in sim mode");
    }

    /// Close out at the displayed market: long sells at the bid, short
    /// buys back at the NO-side value of the ask.
    pub async fn close_position(&self) -> Result<()> {
        let _guard = self.execution.lock().await;
        let top = self.market.top();
        let mut state = self.state.lock().expect("sim lock poisoned");
        state.open_orders.clear();

        if state.inventory > 0 {
            let proceeds = top.best_bid.to_f64() * state.inventory as f64;
            info!(
                target: "fills",
                count = state.inventory,
                price = %top.best_bid,
                "sim position closed"
            );
            state.balance += proceeds;
            state.inventory = 0;
        } else if state.inventory < 0 {
            let proceeds = top.best_ask.complement().to_f64() * (-state.inventory) as f64;
            info!(
                target: "fills",
                count = state.inventory,
                price = %top.best_ask.complement(),
                "sim position closed"
            );
            state.balance += proceeds;
            state.inventory = 0;
        }
        Ok(())
    }

    pub async fn cancel_all(&self) -> Result<()> {
        let _guard = self.execution.lock().await;
        self.state.lock().expect("sim lock poisoned").open_orders.clear();
        Ok(())
    }

    pub async fn place_batch(&self, orders: Vec<OrderRequest>) -> Result<()> {
        let _guard = self.execution.lock().await;
        self.place_sim(orders);
        Ok(())
    }
}

impl super::Execute for SimExecutor {
    fn on_fill(&self, fill: &FillMsg) -> std::result::Result<(), crate::error::RiskError> {
        self.handle_fill(fill);
        Ok(())
    }

    fn on_market_update(&self) {
        self.on_book_update();
    }

    /// Nothing to reconcile: the simulator's books are the source of truth.
    async fn reconcile(&self) -> Result<()> {
        Ok(())
    }

    async fn place_batch(&self, orders: Vec<OrderRequest>) -> Result<()> {
        SimExecutor::place_batch(self, orders).await
    }

    async fn cancel_all(&self) -> Result<()> {
        SimExecutor::cancel_all(self).await
    }

    async fn close_position(&self) -> Result<()> {
        SimExecutor::close_position(self).await
    }

    async fn get_balance(&self) -> Result<f64> {
        Ok(self.balance())
    }
}

impl crate::ws::FillSink for SimExecutor {
    fn on_fill(&self, fill: &FillMsg) -> std::result::Result<(), crate::error::RiskError> {
        self.handle_fill(fill);
        Ok(())
    }
}

impl crate::signal::TickSink for SimExecutor {
    fn on_tick(&self) {
        SimExecutor::on_tick(self);
    }
}

impl crate::market::MarketSink for SimExecutor {
    fn on_market_update(&self) {
        self.on_book_update();
    }
}

impl std::fmt::Debug for SimExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("sim lock poisoned");
        f.debug_struct("SimExecutor")
            .field("balance", &state.balance)
            .field("inventory", &state.inventory)
            .field("open_orders", &state.open_orders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::OrderBook;
    use crate::models::{Action, Side};
    use crate::price::FixedPrice;
    use crate::signal::CandleClient;

    fn sim() -> SimExecutor {
        sim_with_market(Market::new("KXETHD-X", 16))
    }

    fn sim_with_market(market: Market) -> SimExecutor {
        let client = CandleClient::with_base_url("http://unused").unwrap();
        let vol = Arc::new(AsyncMutex::new(VolatilityEstimator::new(client)));
        SimExecutor::new(
            market,
            RiskLimits {
                max_inventory: 50,
                minimum_balance: 0.0,
                max_inventory_dev: 5,
                max_balance_dev: 25.0,
            },
            PricingParams {
                strike: 3_500.0,
                expiry_ms: i64::MAX / 2,
                min_edge: 0.03,
                risk_free_rate: 0.0,
            },
            vol,
            SignalHandle::default(),
            1_000.0,
        )
    }

    fn top(bid: f64, no_bid: f64) -> TopOfBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            1,
            vec![(FixedPrice::from_dollars(bid), 100)],
            vec![(FixedPrice::from_dollars(no_bid), 100)],
        );
        TopOfBook::from_book(&book)
    }

    fn limit(side: Side, action: Action, count: i64, price: f64) -> OrderRequest {
        OrderRequest::limit(
            "KXETHD-X",
            side,
            action,
            count,
            FixedPrice::from_dollars(price),
        )
        .unwrap()
    }

    #[test]
    fn test_buy_fills_when_ask_crosses() {
        let sim = sim();
        sim.place_sim(vec![limit(Side::Yes, Action::Buy, 10, 0.42)]);
        assert_eq!(sim.open_order_count(), 1);

        // ask = 1 - 0.58 = 0.42 <= 0.42: fills
        sim.simulate_fills(&top(0.40, 0.58));
        assert_eq!(sim.open_order_count(), 0);
        assert_eq!(sim.inventory(), 10);
        assert!((sim.balance() - (1_000.0 - 4.2)).abs() < 1e-9);
    }

    #[test]
    fn test_order_rests_until_price_reached() {
        let sim = sim();
        sim.place_sim(vec![limit(Side::Yes, Action::Buy, 10, 0.40)]);
        // ask 0.42 > limit 0.40: rests
        sim.simulate_fills(&top(0.38, 0.58));
        assert_eq!(sim.open_order_count(), 1);
        assert_eq!(sim.inventory(), 0);
    }

    #[test]
    fn test_sell_fills_at_bid() {
        let sim = sim();
        // seed a long position
        sim.place_sim(vec![limit(Side::Yes, Action::Buy, 10, 0.42)]);
        sim.simulate_fills(&top(0.40, 0.58));
        assert_eq!(sim.inventory(), 10);

        sim.place_sim(vec![limit(Side::Yes, Action::Sell, 10, 0.44)]);
        // bid 0.45 >= 0.44: fills
        sim.simulate_fills(&top(0.45, 0.53));
        assert_eq!(sim.inventory(), 0);
        assert!((sim.balance() - (1_000.0 - 4.2 + 4.4)).abs() < 1e-9);
    }

    #[test]
    fn test_pair_redemption_on_offsetting_buy() {
        let sim = sim();
        // short 5 via flip: sell-yes with no inventory flips to buy-no
        sim.place_sim(vec![limit(Side::Yes, Action::Sell, 5, 0.40)]);
        {
            // the flipped order is buy NO at yes-price 0.40 -> cost 0.60
            sim.simulate_fills(&top(0.40, 0.58));
        }
        assert_eq!(sim.inventory(), -5);
        let balance_after_short = sim.balance();
        assert!((balance_after_short - (1_000.0 - 5.0 * 0.60)).abs() < 1e-9);

        // now buy YES 10: 5 pairs redeem at $1
        sim.place_sim(vec![limit(Side::Yes, Action::Buy, 10, 0.42)]);
        sim.simulate_fills(&top(0.40, 0.58));
        assert_eq!(sim.inventory(), 5);
        let expected = balance_after_short - 10.0 * 0.42 + 5.0;
        assert!((sim.balance() - expected).abs() < 1e-9, "{}", sim.balance());
    }

    #[test]
    fn test_flip_sale_applied_on_placement() {
        let sim = sim();
        // no inventory: sell-yes flips to buy-no
        sim.place_sim(vec![limit(Side::Yes, Action::Sell, 5, 0.40)]);
        assert_eq!(sim.open_order_count(), 1);
        // NO bid 0.58 means yes ask 0.42; short fill condition uses buy-no side
        sim.simulate_fills(&top(0.40, 0.58));
        assert_eq!(sim.inventory(), -5);
    }

    #[test]
    fn test_clamp_applied_on_placement() {
        let sim = sim();
        sim.place_sim(vec![limit(Side::Yes, Action::Buy, 100, 0.42)]);
        sim.simulate_fills(&top(0.40, 0.58));
        assert_eq!(sim.inventory(), 50);
    }

    #[tokio::test]
    async fn test_close_position_marks_to_book() {
        let market = Market::new("KXETHD-X", 16);
        let snapshot: crate::ws::OrderbookSnapshotMsg = serde_json::from_value(serde_json::json!({
            "market_ticker": "KXETHD-X",
            "yes_dollars": [[0.45, 100]],
            "no_dollars": [[0.53, 100]]
        }))
        .unwrap();
        market.apply(crate::market::BookUpdate::Snapshot {
            seq: 1,
            msg: snapshot,
        });

        let sim = sim_with_market(market);
        sim.place_sim(vec![limit(Side::Yes, Action::Buy, 10, 0.47)]);
        sim.simulate_fills(&sim.market.top());
        assert_eq!(sim.inventory(), 10);
        let pre_close = sim.balance();

        sim.close_position().await.unwrap();
        assert_eq!(sim.inventory(), 0);
        // long closes at the bid 0.45
        assert!((sim.balance() - (pre_close + 4.5)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancel_all_twice_is_noop() {
        let sim = sim();
        sim.place_sim(vec![limit(Side::Yes, Action::Buy, 10, 0.42)]);
        sim.cancel_all().await.unwrap();
        assert_eq!(sim.open_order_count(), 0);
        sim.cancel_all().await.unwrap();
        assert_eq!(sim.open_order_count(), 0);
    }
}
