//! Order models, batch envelopes, and query parameters.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::price::FixedPrice;

use super::common::{Action, OrderStatus, OrderType, Side};
use super::query::QueryBuilder;

static ORDER_COUNTER: AtomicU64 = AtomicU64::new(1);
static SESSION_NONCE: OnceLock<u64> = OnceLock::new();

/// Process-unique client order id: a per-process random nonce plus a
/// monotone counter. Resubmitting the same id is rejected by the exchange,
/// which is what makes retried placements safe.
pub fn next_client_order_id() -> String {
    let nonce = SESSION_NONCE.get_or_init(|| {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    });
    let n = ORDER_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:016x}-{:08x}", nonce, n)
}

/// An order to be submitted to the exchange.
///
/// Prices are always expressed on the YES side; `side` + `action` control how
/// the order is interpreted.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub count: i64,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price_dollars: Option<FixedPrice>,
    pub client_order_id: String,
}

impl OrderRequest {
    /// A limit order at `price` (YES terms).
    ///
    /// # Errors
    /// Fails on non-positive count or a price outside [0.01, 0.99].
    pub fn limit(
        ticker: impl Into<String>,
        side: Side,
        action: Action,
        count: i64,
        price: FixedPrice,
    ) -> Result<Self> {
        if count <= 0 {
            return Err(Error::InvalidQuantity(count));
        }
        if !price.is_tradable() {
            return Err(Error::InvalidPrice(price.to_f64()));
        }
        Ok(Self {
            ticker: ticker.into(),
            side,
            action,
            count,
            order_type: OrderType::Limit,
            yes_price_dollars: Some(price),
            client_order_id: next_client_order_id(),
        })
    }

    /// A market order.
    ///
    /// # Errors
    /// Fails on non-positive count.
    pub fn market(
        ticker: impl Into<String>,
        side: Side,
        action: Action,
        count: i64,
    ) -> Result<Self> {
        if count <= 0 {
            return Err(Error::InvalidQuantity(count));
        }
        Ok(Self {
            ticker: ticker.into(),
            side,
            action,
            count,
            order_type: OrderType::Market,
            yes_price_dollars: None,
            client_order_id: next_client_order_id(),
        })
    }

    /// Whether the order increases net YES exposure (buy YES or sell NO).
    pub fn is_long(&self) -> bool {
        (self.action == Action::Buy) == (self.side == Side::Yes)
    }
}

/// An order as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    #[serde(default)]
    pub yes_price_dollars: Option<FixedPrice>,
    #[serde(default)]
    pub fill_count: i64,
    #[serde(default)]
    pub remaining_count: i64,
    #[serde(default)]
    pub initial_count: i64,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub last_update_time: Option<String>,
}

/// Response from the get_orders endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OrdersResponse {
    pub orders: Vec<Order>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Error payload attached to a rejected order within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiOrderError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCreateOrdersRequest {
    pub orders: Vec<OrderRequest>,
}

/// One entry in a batch-create response: either a placed order or an error.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchOrderResult {
    #[serde(default)]
    pub order: Option<Order>,
    #[serde(default)]
    pub error: Option<ApiOrderError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCreateOrdersResponse {
    pub orders: Vec<BatchOrderResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCancelOrdersRequest {
    pub ids: Vec<String>,
}

/// One entry in a batch-cancel response. The id may appear flat or nested
/// depending on the API revision.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchCancelResult {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order: Option<Order>,
    #[serde(default)]
    pub error: Option<ApiOrderError>,
}

impl BatchCancelResult {
    /// The cancelled order id, if the entry succeeded.
    pub fn order_id(&self) -> Option<&str> {
        if self.error.is_some() {
            return None;
        }
        self.order_id
            .as_deref()
            .or(self.order.as_ref().map(|o| o.order_id.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCancelOrdersResponse {
    pub orders: Vec<BatchCancelResult>,
}

/// Query parameters for the get_orders endpoint.
#[derive(Debug, Default, Clone)]
pub struct GetOrdersParams {
    pub ticker: Option<String>,
    pub status: Option<OrderStatus>,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

impl GetOrdersParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn min_ts(mut self, ts: i64) -> Self {
        self.min_ts = Some(ts);
        self
    }

    #[must_use]
    pub fn max_ts(mut self, ts: i64) -> Self {
        self.max_ts = Some(ts);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut qb = QueryBuilder::new();
        qb.push_opt("ticker", self.ticker.as_ref());
        qb.push_opt("status", self.status.map(|s| s.as_str()));
        qb.push_opt("min_ts", self.min_ts);
        qb.push_opt("max_ts", self.max_ts);
        qb.push_opt("limit", self.limit);
        qb.push_opt("cursor", self.cursor.as_ref());
        qb.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_order_ids_are_unique() {
        let a = next_client_order_id();
        let b = next_client_order_id();
        assert_ne!(a, b);
        // shared session nonce
        assert_eq!(a.split('-').next(), b.split('-').next());
    }

    #[test]
    fn test_limit_order_validation() {
        assert!(OrderRequest::limit(
            "T",
            Side::Yes,
            Action::Buy,
            0,
            FixedPrice::from_dollars(0.40)
        )
        .is_err());
        assert!(OrderRequest::limit(
            "T",
            Side::Yes,
            Action::Buy,
            1,
            FixedPrice::from_dollars(1.00)
        )
        .is_err());
        assert!(OrderRequest::limit(
            "T",
            Side::Yes,
            Action::Buy,
            1,
            FixedPrice::from_dollars(0.01)
        )
        .is_ok());
    }

    #[test]
    fn test_market_order_has_no_price() {
        let order = OrderRequest::market("T", Side::No, Action::Sell, 5).unwrap();
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("yes_price_dollars").is_none());
        assert_eq!(json["type"], "market");
    }

    #[test]
    fn test_is_long() {
        let buy_yes =
            OrderRequest::limit("T", Side::Yes, Action::Buy, 1, FixedPrice::from_dollars(0.5))
                .unwrap();
        let sell_no =
            OrderRequest::limit("T", Side::No, Action::Sell, 1, FixedPrice::from_dollars(0.5))
                .unwrap();
        let sell_yes =
            OrderRequest::limit("T", Side::Yes, Action::Sell, 1, FixedPrice::from_dollars(0.5))
                .unwrap();
        assert!(buy_yes.is_long());
        assert!(sell_no.is_long());
        assert!(!sell_yes.is_long());
    }

    #[test]
    fn test_order_request_serialization() {
        let order = OrderRequest::limit(
            "KXETHD-X",
            Side::Yes,
            Action::Buy,
            10,
            FixedPrice::from_dollars(0.40),
        )
        .unwrap();
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["ticker"], "KXETHD-X");
        assert_eq!(json["side"], "yes");
        assert_eq!(json["action"], "buy");
        assert_eq!(json["count"], 10);
        assert_eq!(json["yes_price_dollars"], 0.4);
        assert!(json["client_order_id"].is_string());
    }

    #[test]
    fn test_batch_create_response_parses_errors() {
        let json = r#"{
            "orders": [
                {"order": {"order_id": "o1", "ticker": "T", "side": "yes",
                           "action": "buy", "type": "limit", "status": "resting",
                           "remaining_count": 6}},
                {"error": {"code": "insufficient_balance", "message": "no funds"}}
            ]
        }"#;
        let resp: BatchCreateOrdersResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.orders.len(), 2);
        assert_eq!(resp.orders[0].order.as_ref().unwrap().order_id, "o1");
        assert_eq!(resp.orders[0].order.as_ref().unwrap().remaining_count, 6);
        assert_eq!(
            resp.orders[1].error.as_ref().unwrap().code,
            "insufficient_balance"
        );
    }

    #[test]
    fn test_batch_cancel_result_id_forms() {
        let flat: BatchCancelResult =
            serde_json::from_str(r#"{"order_id": "o1"}"#).unwrap();
        assert_eq!(flat.order_id(), Some("o1"));

        let nested: BatchCancelResult = serde_json::from_str(
            r#"{"order": {"order_id": "o2", "ticker": "T", "side": "yes",
                "action": "buy", "type": "limit", "status": "canceled"}}"#,
        )
        .unwrap();
        assert_eq!(nested.order_id(), Some("o2"));

        let failed: BatchCancelResult =
            serde_json::from_str(r#"{"order_id": "o3", "error": {"code": "x"}}"#).unwrap();
        assert_eq!(failed.order_id(), None);
    }

    #[test]
    fn test_orders_query_string() {
        let params = GetOrdersParams::new()
            .ticker("KXETHD-X")
            .status(OrderStatus::Resting);
        assert_eq!(params.to_query_string(), "?ticker=KXETHD-X&status=resting");
    }
}
