//! Shared portfolio accounting.
//!
//! The live and simulated executors both keep their books through this
//! state: inventory clamping, fill bookkeeping under the placement race,
//! and the exchange's flip-sale translation.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::error::RiskError;
use crate::models::{Action, OrderRequest, Side, next_client_order_id};
use crate::ws::FillMsg;

/// Immutable per-session risk limits.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    /// Maximum absolute inventory at any time.
    pub max_inventory: i64,
    /// Minimum permissible account balance in dollars.
    pub minimum_balance: f64,
    /// Largest tolerated |remote - local| inventory deviation.
    pub max_inventory_dev: i64,
    /// Largest tolerated |remote - local| balance deviation in dollars.
    pub max_balance_dev: f64,
}

/// Clamp an order's count so the post-fill inventory cannot exceed the
/// limit: long orders are bounded by remaining long capacity, short orders
/// by remaining short capacity.
pub fn clamp_order(order: &mut OrderRequest, inventory: i64, max_inventory: i64) {
    let max_delta = if order.is_long() {
        max_inventory - inventory
    } else {
        inventory + max_inventory
    };
    order.count = order.count.min(max_delta).max(0);
}

/// Locally tracked portfolio state.
///
/// The union of `resting_orders` and `unregistered_fills` always covers the
/// whole order state: a fill whose order id has not been registered yet
/// (the placement round-trip race) accumulates in `unregistered_fills` and
/// is netted out when the placement response arrives.
#[derive(Debug, Default)]
pub struct Portfolio {
    /// Net position: positive = long YES, negative = long NO.
    pub inventory: i64,
    /// Last synced balance in dollars.
    pub balance: f64,
    /// Timestamp of the most recent fill, POSIX ns.
    pub last_fill_ts: i64,
    /// order_id -> remaining contracts.
    pub resting_orders: HashMap<String, i64>,
    /// order_id -> contracts filled before the placement response landed.
    pub unregistered_fills: HashMap<String, i64>,
}

impl Portfolio {
    /// Apply one fill. The exchange-reported `post_position` is
    /// authoritative for inventory; local order tracking is adjusted by the
    /// fill count.
    pub fn apply_fill(&mut self, fill: &FillMsg) {
        self.last_fill_ts = fill.ts_ns();
        self.inventory = fill.post_position;

        match self.resting_orders.get(&fill.order_id).copied() {
            Some(remaining) => {
                let remaining = remaining - fill.count;
                if remaining <= 0 {
                    self.resting_orders.remove(&fill.order_id);
                } else {
                    self.resting_orders.insert(fill.order_id.clone(), remaining);
                }
            }
            None => {
                *self
                    .unregistered_fills
                    .entry(fill.order_id.clone())
                    .or_insert(0) += fill.count;
            }
        }
    }

    /// Register one order from a placement response. The resting count is
    /// the reported remaining count net of any fills that raced ahead of
    /// the response.
    pub fn register_placement(&mut self, order_id: &str, remaining_count: i64) {
        let unregistered = self.unregistered_fills.remove(order_id).unwrap_or(0);
        let net = remaining_count - unregistered;
        if net > 0 {
            self.resting_orders.insert(order_id.to_string(), net);
        }
    }

    /// Enforce the inventory limit.
    pub fn check_inventory(&self, max_inventory: i64) -> Result<(), RiskError> {
        if self.inventory.abs() > max_inventory {
            return Err(RiskError::PositionLimitExceeded {
                limit: max_inventory,
                inventory: self.inventory,
            });
        }
        Ok(())
    }

    /// Enforce the balance floor.
    pub fn check_balance(&self, minimum_balance: f64) -> Result<(), RiskError> {
        if self.balance < minimum_balance {
            return Err(RiskError::BalanceLimitExceeded {
                minimum: minimum_balance,
                balance: self.balance,
            });
        }
        Ok(())
    }

    /// Capture an immutable snapshot for a trading decision.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp_ns: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0),
            balance: self.balance,
            inventory: self.inventory,
            resting_order_ids: self.resting_orders.keys().cloned().collect(),
        }
    }
}

/// Portfolio state at a point in time.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub timestamp_ns: i64,
    pub balance: f64,
    pub inventory: i64,
    pub resting_order_ids: Vec<String>,
}

/// The exchange's flip-sale translation, applied locally by the simulator.
///
/// A sell that exceeds the coverable position splits into a covered sell
/// plus a buy of the opposite side for the remainder; a sell with nothing
/// to cover flips entirely into the opposite side's buy. Net signed
/// inventory change is preserved.
pub fn flip_sale(orders: Vec<OrderRequest>, inventory: i64) -> Vec<OrderRequest> {
    let mut result = Vec::with_capacity(orders.len());

    for mut order in orders {
        match (order.action, order.side) {
            (Action::Sell, Side::Yes) => {
                if order.count <= inventory {
                    result.push(order);
                } else if inventory > 0 {
                    let mut covered = order.clone();
                    covered.count = inventory;
                    covered.client_order_id = next_client_order_id();

                    let mut flipped = order;
                    flipped.count -= inventory;
                    flipped.side = Side::No;
                    flipped.action = Action::Buy;
                    flipped.client_order_id = next_client_order_id();

                    info!(
                        target: "orders",
                        covered = covered.count,
                        flipped = flipped.count,
                        "flip sale: splitting sell-yes"
                    );
                    result.push(covered);
                    result.push(flipped);
                } else {
                    order.side = Side::No;
                    order.action = Action::Buy;
                    result.push(order);
                }
            }
            (Action::Sell, Side::No) => {
                let short_position = -inventory;
                if short_position >= order.count {
                    result.push(order);
                } else if short_position > 0 {
                    let mut covered = order.clone();
                    covered.count = short_position;
                    covered.client_order_id = next_client_order_id();

                    let mut flipped = order;
                    flipped.count -= short_position;
                    flipped.side = Side::Yes;
                    flipped.action = Action::Buy;
                    flipped.client_order_id = next_client_order_id();

                    info!(
                        target: "orders",
                        covered = covered.count,
                        flipped = flipped.count,
                        "flip sale: splitting sell-no"
                    );
                    result.push(covered);
                    result.push(flipped);
                } else {
                    order.side = Side::Yes;
                    order.action = Action::Buy;
                    result.push(order);
                }
            }
            _ => result.push(order),
        }
    }

    result
}

/// The single market order that unwinds the whole position, if any.
pub fn unwind_order(ticker: &str, inventory: i64) -> Option<OrderRequest> {
    if inventory > 0 {
        OrderRequest::market(ticker, Side::Yes, Action::Sell, inventory).ok()
    } else if inventory < 0 {
        OrderRequest::market(ticker, Side::No, Action::Sell, -inventory).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::FixedPrice;

    fn limit(side: Side, action: Action, count: i64) -> OrderRequest {
        OrderRequest::limit("KXETHD-X", side, action, count, FixedPrice::from_dollars(0.40))
            .unwrap()
    }

    fn fill(order_id: &str, count: i64, post_position: i64) -> FillMsg {
        serde_json::from_value(serde_json::json!({
            "trade_id": "t",
            "order_id": order_id,
            "market_ticker": "KXETHD-X",
            "side": "yes",
            "purchased_side": "yes",
            "yes_price_dollars": 0.40,
            "count": count,
            "action": "buy",
            "post_position": post_position,
            "ts": 1_700_000_000
        }))
        .unwrap()
    }

    #[test]
    fn test_clamp_long_order_to_remaining_capacity() {
        let mut order = limit(Side::Yes, Action::Buy, 100);
        clamp_order(&mut order, 47, 50);
        assert_eq!(order.count, 3);
    }

    #[test]
    fn test_clamp_short_order_to_remaining_capacity() {
        // short capacity = inventory + max = -47 + 50 = 3
        let mut order = limit(Side::Yes, Action::Sell, 100);
        clamp_order(&mut order, -47, 50);
        assert_eq!(order.count, 3);
    }

    #[test]
    fn test_clamp_floors_at_zero() {
        let mut order = limit(Side::Yes, Action::Buy, 10);
        clamp_order(&mut order, 50, 50);
        assert_eq!(order.count, 0);
    }

    #[test]
    fn test_clamp_sell_no_counts_as_long() {
        let mut order = limit(Side::No, Action::Sell, 10);
        clamp_order(&mut order, 48, 50);
        assert_eq!(order.count, 2);
    }

    #[test]
    fn test_fill_decrements_resting_order() {
        let mut p = Portfolio::default();
        p.resting_orders.insert("o1".to_string(), 10);
        p.apply_fill(&fill("o1", 4, 4));
        assert_eq!(p.resting_orders["o1"], 6);
        assert_eq!(p.inventory, 4);
        assert_eq!(p.last_fill_ts, 1_700_000_000_000_000_000);
    }

    #[test]
    fn test_fill_removes_exhausted_order() {
        let mut p = Portfolio::default();
        p.resting_orders.insert("o1".to_string(), 4);
        p.apply_fill(&fill("o1", 4, 4));
        assert!(!p.resting_orders.contains_key("o1"));
    }

    #[test]
    fn test_fill_before_registration_accumulates() {
        let mut p = Portfolio::default();
        p.apply_fill(&fill("o1", 3, 3));
        p.apply_fill(&fill("o1", 1, 4));
        assert_eq!(p.unregistered_fills["o1"], 4);
        assert_eq!(p.inventory, 4);
    }

    #[test]
    fn test_placement_race_settles_to_net_count() {
        // buy 10 placed; a fill of 4 arrives before the placement response
        let mut p = Portfolio::default();
        p.apply_fill(&fill("o1", 4, 4));

        // placement response carries the placement-time remaining count
        p.register_placement("o1", 10);

        assert_eq!(p.resting_orders["o1"], 6);
        assert!(p.unregistered_fills.is_empty());
        assert_eq!(p.inventory, 4);
    }

    #[test]
    fn test_register_fully_filled_order_rests_nothing() {
        let mut p = Portfolio::default();
        p.apply_fill(&fill("o1", 10, 10));
        p.register_placement("o1", 10);
        assert!(p.resting_orders.is_empty());
        assert!(p.unregistered_fills.is_empty());
    }

    #[test]
    fn test_fill_is_idempotent_on_inventory() {
        let mut p = Portfolio::default();
        let f = fill("o1", 4, 4);
        p.apply_fill(&f);
        p.apply_fill(&f);
        assert_eq!(p.inventory, 4);
    }

    #[test]
    fn test_inventory_limit_check() {
        let mut p = Portfolio::default();
        p.inventory = 52;
        assert_eq!(
            p.check_inventory(50),
            Err(RiskError::PositionLimitExceeded {
                limit: 50,
                inventory: 52
            })
        );
        p.inventory = -50;
        assert!(p.check_inventory(50).is_ok());
    }

    #[test]
    fn test_balance_limit_check() {
        let mut p = Portfolio::default();
        p.balance = 99.0;
        assert!(p.check_balance(100.0).is_err());
        p.balance = 100.0;
        assert!(p.check_balance(100.0).is_ok());
    }

    #[test]
    fn test_flip_sale_covered_sell_passes_through() {
        let orders = flip_sale(vec![limit(Side::Yes, Action::Sell, 5)], 10);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::Yes);
        assert_eq!(orders[0].action, Action::Sell);
        assert_eq!(orders[0].count, 5);
    }

    #[test]
    fn test_flip_sale_splits_partially_covered_sell_yes() {
        let orders = flip_sale(vec![limit(Side::Yes, Action::Sell, 10)], 4);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, Side::Yes);
        assert_eq!(orders[0].action, Action::Sell);
        assert_eq!(orders[0].count, 4);
        assert_eq!(orders[1].side, Side::No);
        assert_eq!(orders[1].action, Action::Buy);
        assert_eq!(orders[1].count, 6);
        assert_ne!(orders[0].client_order_id, orders[1].client_order_id);
    }

    #[test]
    fn test_flip_sale_flips_uncovered_sell_yes() {
        let orders = flip_sale(vec![limit(Side::Yes, Action::Sell, 10)], -3);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::No);
        assert_eq!(orders[0].action, Action::Buy);
        assert_eq!(orders[0].count, 10);
    }

    #[test]
    fn test_flip_sale_splits_partially_covered_sell_no() {
        let orders = flip_sale(vec![limit(Side::No, Action::Sell, 10)], -4);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, Side::No);
        assert_eq!(orders[0].count, 4);
        assert_eq!(orders[1].side, Side::Yes);
        assert_eq!(orders[1].action, Action::Buy);
        assert_eq!(orders[1].count, 6);
    }

    #[test]
    fn test_flip_sale_leaves_buys_alone() {
        let orders = flip_sale(vec![limit(Side::Yes, Action::Buy, 10)], 0);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].action, Action::Buy);
        assert_eq!(orders[0].side, Side::Yes);
    }

    #[test]
    fn test_flip_sale_preserves_net_inventory_change() {
        // sell-yes of 10 from inventory 4: -4 (sell) + -6 (buy NO) = -10
        let orders = flip_sale(vec![limit(Side::Yes, Action::Sell, 10)], 4);
        let net: i64 = orders
            .iter()
            .map(|o| if o.is_long() { o.count } else { -o.count })
            .sum();
        assert_eq!(net, -10);
    }

    #[test]
    fn test_unwind_order_sides() {
        let long = unwind_order("T", 52).unwrap();
        assert_eq!(long.side, Side::Yes);
        assert_eq!(long.action, Action::Sell);
        assert_eq!(long.count, 52);
        assert!(long.yes_price_dollars.is_none());

        let short = unwind_order("T", -7).unwrap();
        assert_eq!(short.side, Side::No);
        assert_eq!(short.action, Action::Sell);
        assert_eq!(short.count, 7);

        assert!(unwind_order("T", 0).is_none());
    }

    #[test]
    fn test_snapshot_captures_state() {
        let mut p = Portfolio::default();
        p.inventory = 3;
        p.balance = 250.0;
        p.resting_orders.insert("o1".to_string(), 2);
        let snap = p.snapshot();
        assert_eq!(snap.inventory, 3);
        assert_eq!(snap.balance, 250.0);
        assert_eq!(snap.resting_order_ids, vec!["o1".to_string()]);
        assert!(snap.timestamp_ns > 0);
    }
}
