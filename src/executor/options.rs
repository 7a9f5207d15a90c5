//! Options-style trading executor.
//!
//! Prices the binary market as a European binary option against the
//! underlying signal feed and trades the displayed bid/ask whenever the
//! model value clears the configured edge.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::book::TopOfBook;
use crate::error::{Result, RiskError};
use crate::market::MarketSink;
use crate::models::{Action, OrderRequest, Side};
use crate::pricer;
use crate::signal::{SignalHandle, TickSink};
use crate::sync::Event;
use crate::vol::VolatilityEstimator;
use crate::ws::{FillMsg, FillSink};

use super::live::LiveExecutor;

/// Milliseconds per year, for time-to-expiry conversion.
const MS_PER_YEAR: f64 = 3.156e10;

/// Maximum contracts per tick decision.
const ORDER_CLIP: i64 = 10;

/// Idle timeout after which the tick processor task exits.
const TICK_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Static parameters of the market being priced.
#[derive(Debug, Clone, Copy)]
pub struct PricingParams {
    /// Strike of the binary market in underlying-asset dollars.
    pub strike: f64,
    /// Expiry of the market, POSIX milliseconds.
    pub expiry_ms: i64,
    /// Minimum edge over the displayed price before trading.
    pub min_edge: f64,
    /// Risk-free rate for discounting.
    pub risk_free_rate: f64,
}

/// Model fair value of the market at `now_ms`, or `None` when the pricing
/// inputs are unusable (expired market, non-positive volatility or spot).
pub(crate) fn fair_value(
    params: &PricingParams,
    spot: f64,
    sigma: f64,
    now_ms: i64,
) -> Option<f64> {
    let t_years = (params.expiry_ms - now_ms) as f64 / MS_PER_YEAR;
    if t_years <= 0.0 || sigma <= 0.0 || spot <= 0.0 {
        return None;
    }
    Some(pricer::binary_call_price(
        spot,
        params.strike,
        t_years,
        sigma,
        params.risk_free_rate,
    ))
}

/// The single-side order implied by the model value versus the displayed
/// market, sized to `min(ORDER_CLIP, remaining capacity)`.
///
/// Orders are always expressed on the YES side: a buy lifts the ask, a
/// sell hits the bid.
pub(crate) fn edge_order(
    ticker: &str,
    top: &TopOfBook,
    fair: f64,
    min_edge: f64,
    inventory: i64,
    max_inventory: i64,
) -> Option<OrderRequest> {
    if fair > top.best_ask.to_f64() + min_edge {
        let space = (max_inventory - inventory).max(0);
        let count = space.min(ORDER_CLIP);
        if count == 0 || !top.best_ask.is_tradable() {
            return None;
        }
        OrderRequest::limit(ticker, Side::Yes, Action::Buy, count, top.best_ask).ok()
    } else if fair < top.best_bid.to_f64() - min_edge {
        let space = (inventory + max_inventory).max(0);
        let count = space.min(ORDER_CLIP);
        if count == 0 || !top.best_bid.is_tradable() {
            return None;
        }
        OrderRequest::limit(ticker, Side::Yes, Action::Sell, count, top.best_bid).ok()
    } else {
        None
    }
}

/// Live executor specialized for "underlying above strike at expiry"
/// markets.
///
/// Underlying ticks are conflated through a latched event with at most one
/// processor task: a burst of ticks produces one trading action per
/// quiescent window, and the processor exits after one idle second.
#[derive(Clone)]
pub struct OptionsExecutor {
    base: LiveExecutor,
    params: PricingParams,
    vol: Arc<AsyncMutex<VolatilityEstimator>>,
    signal: SignalHandle,
    tick_event: Arc<Event>,
    processor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl OptionsExecutor {
    pub fn new(
        base: LiveExecutor,
        params: PricingParams,
        vol: Arc<AsyncMutex<VolatilityEstimator>>,
        signal: SignalHandle,
    ) -> Self {
        Self {
            base,
            params,
            vol,
            signal,
            tick_event: Arc::new(Event::new()),
            processor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn base(&self) -> &LiveExecutor {
        &self.base
    }

    /// Tick signal: latch the pending-work event and make sure a processor
    /// task is running. Fire-and-forget; never blocks the feed.
    pub fn on_tick(&self) {
        self.tick_event.set();

        let mut slot = self.processor.lock().expect("processor lock poisoned");
        let running = slot.as_ref().is_some_and(|handle| !handle.is_finished());
        if !running {
            let me = self.clone();
            *slot = Some(tokio::spawn(async move { me.tick_processor().await }));
        }
    }

    /// Drain latched tick events until one idle timeout passes.
    async fn tick_processor(&self) {
        loop {
            if timeout(TICK_IDLE_TIMEOUT, self.tick_event.wait())
                .await
                .is_err()
            {
                debug!(target: "prices", "tick processor idle, exiting");
                return;
            }
            self.tick_event.clear();

            if let Err(e) = self.tick_action().await {
                error!(target: "prices", error = %e, "tick action failed");
                return;
            }
        }
    }

    /// One pricing pass under the execution lock: flatten quotes, refresh
    /// volatility if stale, and place the edge order for the freshest tick.
    async fn tick_action(&self) -> Result<()> {
        let _guard = self.base.execution_lock().lock().await;

        self.base.cancel_outstanding_locked().await?;

        {
            let mut vol = self.vol.lock().await;
            if vol.is_stale()
                && let Err(e) = vol.refresh().await
            {
                warn!(target: "prices", error = %e, "volatility refresh failed");
            }
        }

        let top = self.base.market().top();
        let snapshot = self.base.snapshot();

        let Some(tick) = self.signal.latest() else {
            return Ok(());
        };
        let spot = tick.price();

        let sigma = match self.vol.lock().await.rogers_satchell_estimate() {
            Ok(sigma) => sigma,
            Err(e) => {
                warn!(target: "prices", error = %e, "no volatility estimate");
                return Ok(());
            }
        };

        let now_ms = now_ms();
        let Some(fair) = fair_value(&self.params, spot, sigma, now_ms) else {
            debug!(target: "prices", spot, sigma, "pricing inputs unusable");
            return Ok(());
        };

        info!(
            target: "prices",
            fair,
            best_bid = %top.best_bid,
            best_ask = %top.best_ask,
            spot,
            sigma,
            "price decision"
        );

        if let Some(order) = edge_order(
            self.base.market().ticker(),
            &top,
            fair,
            self.params.min_edge,
            snapshot.inventory,
            self.base.limits().max_inventory,
        ) {
            self.base.place_batch_locked(vec![order]).await?;
        }

        Ok(())
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl super::Execute for OptionsExecutor {
    fn on_fill(&self, fill: &FillMsg) -> std::result::Result<(), RiskError> {
        self.base.handle_fill(fill)
    }

    /// The options strategy is tick-driven; book updates carry no signal.
    fn on_market_update(&self) {}

    async fn reconcile(&self) -> Result<()> {
        self.base.reconcile().await
    }

    async fn place_batch(&self, orders: Vec<OrderRequest>) -> Result<()> {
        self.base.place_batch(orders).await
    }

    async fn cancel_all(&self) -> Result<()> {
        self.base.cancel_all().await
    }

    async fn close_position(&self) -> Result<()> {
        self.base.close_position().await
    }

    async fn get_balance(&self) -> Result<f64> {
        self.base.get_balance().await
    }
}

impl FillSink for OptionsExecutor {
    fn on_fill(&self, fill: &FillMsg) -> std::result::Result<(), RiskError> {
        self.base.handle_fill(fill)
    }

    fn on_malformed_fill(&self) {
        // order state may have drifted; resync off the socket task
        let me = self.clone();
        tokio::spawn(async move {
            if let Err(e) = me.base.reconcile().await {
                error!(target: "state", error = %e, "resync after malformed fill failed");
            }
        });
    }
}

impl TickSink for OptionsExecutor {
    fn on_tick(&self) {
        OptionsExecutor::on_tick(self);
    }
}

impl MarketSink for OptionsExecutor {
    fn on_market_update(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::OrderBook;
    use crate::price::FixedPrice;

    fn top(bid: f64, bid_size: i64, no_bid: f64, ask_size: i64) -> TopOfBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            1,
            vec![(FixedPrice::from_dollars(bid), bid_size)],
            vec![(FixedPrice::from_dollars(no_bid), ask_size)],
        );
        TopOfBook::from_book(&book)
    }

    fn params() -> PricingParams {
        PricingParams {
            strike: 3_500.0,
            expiry_ms: 2_000_000_000_000,
            min_edge: 0.03,
            risk_free_rate: 0.0,
        }
    }

    #[test]
    fn test_fair_value_guards() {
        let p = params();
        // expired
        assert!(fair_value(&p, 3_600.0, 0.5, p.expiry_ms).is_none());
        assert!(fair_value(&p, 3_600.0, 0.5, p.expiry_ms + 1).is_none());
        // bad sigma / spot
        assert!(fair_value(&p, 3_600.0, 0.0, 0).is_none());
        assert!(fair_value(&p, 0.0, 0.5, 0).is_none());
        // usable
        let fair = fair_value(&p, 3_600.0, 0.5, p.expiry_ms - 86_400_000).unwrap();
        assert!(fair > 0.5, "spot above strike should price above 0.5");
    }

    #[test]
    fn test_edge_buy_at_ask() {
        // bid 0.40, NO bid 0.58 -> ask 0.42; fair 0.48 > 0.42 + 0.03
        let top = top(0.40, 10, 0.58, 10);
        let order = edge_order("T", &top, 0.48, 0.03, 0, 50).unwrap();
        assert_eq!(order.side, Side::Yes);
        assert_eq!(order.action, Action::Buy);
        assert_eq!(order.count, 10);
        assert_eq!(
            order.yes_price_dollars,
            Some(FixedPrice::from_dollars(0.42))
        );
    }

    #[test]
    fn test_edge_sell_at_bid() {
        // fair 0.36 < 0.40 - 0.03
        let top = top(0.40, 10, 0.58, 10);
        let order = edge_order("T", &top, 0.36, 0.03, 0, 50).unwrap();
        assert_eq!(order.action, Action::Sell);
        assert_eq!(
            order.yes_price_dollars,
            Some(FixedPrice::from_dollars(0.40))
        );
        assert_eq!(order.count, 10);
    }

    #[test]
    fn test_edge_inside_band_is_no_trade() {
        let top = top(0.40, 10, 0.58, 10);
        assert!(edge_order("T", &top, 0.43, 0.03, 0, 50).is_none());
        // boundary is exclusive
        assert!(edge_order("T", &top, 0.45, 0.03, 0, 50).is_none());
    }

    #[test]
    fn test_edge_size_clipped_by_capacity() {
        let top = top(0.40, 10, 0.58, 10);
        // long capacity 3
        let order = edge_order("T", &top, 0.48, 0.03, 47, 50).unwrap();
        assert_eq!(order.count, 3);
        // short capacity 3
        let order = edge_order("T", &top, 0.36, 0.03, -47, 50).unwrap();
        assert_eq!(order.count, 3);
    }

    #[test]
    fn test_edge_no_capacity_no_order() {
        let top = top(0.40, 10, 0.58, 10);
        assert!(edge_order("T", &top, 0.48, 0.03, 50, 50).is_none());
        assert!(edge_order("T", &top, 0.36, 0.03, -50, 50).is_none());
    }

    #[test]
    fn test_edge_empty_side_is_untradable() {
        // empty NO side: ask collapses to 1.00, not a placeable price
        let mut book = OrderBook::new();
        book.apply_snapshot(1, vec![(FixedPrice::from_dollars(0.40), 10)], vec![]);
        let top = TopOfBook::from_book(&book);
        assert!(edge_order("T", &top, 1.2, 0.03, 0, 50).is_none());
    }
}
