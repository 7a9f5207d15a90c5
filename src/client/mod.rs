//! Exchange REST client.

mod http;

pub use http::HttpClient;

use serde_json::Value as JsonValue;
use tracing::info;

use crate::{
    auth::Credentials,
    error::{Error, MAX_BATCH_SIZE, Result},
    models::{
        BalanceResponse, BatchCancelOrdersRequest, BatchCancelOrdersResponse,
        BatchCreateOrdersRequest, BatchCreateOrdersResponse, GetOrdersParams, GetPositionsParams,
        OrderRequest, OrdersResponse, PositionsResponse,
    },
};

/// Exchange environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Demo/paper environment.
    #[default]
    Demo,
    /// Production.
    Prod,
}

impl Environment {
    /// Base URL for REST requests.
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Demo => "https://demo-api.kalshi.co",
            Environment::Prod => "https://api.elections.kalshi.com",
        }
    }

    /// Path prefix shared by all REST endpoints, included in signatures.
    pub fn api_path_prefix(&self) -> &'static str {
        "/trade-api/v2"
    }

    /// WebSocket URL.
    pub fn ws_url(&self) -> &'static str {
        match self {
            Environment::Demo => "wss://demo-api.kalshi.co/trade-api/ws/v2",
            Environment::Prod => "wss://api.elections.kalshi.com/trade-api/ws/v2",
        }
    }
}

/// Authenticated client for the exchange REST API.
///
/// Holds one connection pool for the whole session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    http: HttpClient,
}

impl ExchangeClient {
    pub fn new(credentials: Credentials, environment: Environment) -> Result<Self> {
        let http = HttpClient::new(
            credentials,
            environment.base_url(),
            environment.api_path_prefix(),
        )?;
        Ok(Self { http })
    }

    /// Account balance. Values are in cents.
    pub async fn get_balance(&self) -> Result<BalanceResponse> {
        self.http.get("/portfolio/balance").await
    }

    /// Positions matching the given filters.
    pub async fn get_positions(&self, params: GetPositionsParams) -> Result<PositionsResponse> {
        let path = format!("/portfolio/positions{}", params.to_query_string());
        self.http.get(&path).await
    }

    /// Orders matching the given filters.
    pub async fn get_orders(&self, params: GetOrdersParams) -> Result<OrdersResponse> {
        let path = format!("/portfolio/orders{}", params.to_query_string());
        self.http.get(&path).await
    }

    /// REST snapshot of a market's orderbook.
    pub async fn get_orderbook(&self, ticker: &str, depth: i64) -> Result<JsonValue> {
        let path = format!("/markets/{}/orderbook?depth={}", ticker, depth);
        self.http.get(&path).await
    }

    /// Submit a batch of orders.
    ///
    /// # Errors
    /// Fails locally if the batch exceeds [`MAX_BATCH_SIZE`]; per-order
    /// rejections come back inside the response envelope.
    pub async fn batch_create_orders(
        &self,
        orders: Vec<OrderRequest>,
    ) -> Result<BatchCreateOrdersResponse> {
        if orders.len() > MAX_BATCH_SIZE {
            return Err(Error::BatchSizeExceeded(orders.len()));
        }
        for order in &orders {
            info!(
                target: "orders",
                ticker = %order.ticker,
                side = %order.side,
                action = %order.action,
                count = order.count,
                price = ?order.yes_price_dollars,
                "submitting order"
            );
        }
        let body = serde_json::to_value(BatchCreateOrdersRequest { orders })?;
        self.http.post("/portfolio/orders/batched", &body).await
    }

    /// Cancel a batch of orders by id.
    pub async fn batch_cancel_orders(
        &self,
        ids: Vec<String>,
    ) -> Result<BatchCancelOrdersResponse> {
        if ids.len() > MAX_BATCH_SIZE {
            return Err(Error::BatchSizeExceeded(ids.len()));
        }
        let body = serde_json::to_value(BatchCancelOrdersRequest { ids })?;
        self.http
            .delete_with_body("/portfolio/orders/batched", &body)
            .await
    }

    /// Event metadata.
    pub async fn get_event(&self, event_ticker: &str) -> Result<JsonValue> {
        let path = format!("/events/{}", event_ticker);
        self.http.get(&path).await
    }

    /// Market metadata.
    pub async fn get_market(&self, market_ticker: &str) -> Result<JsonValue> {
        let path = format!("/markets/{}", market_ticker);
        self.http.get(&path).await
    }

    /// Server-side timestamp of the user's portfolio data.
    pub async fn get_user_data_timestamp(&self) -> Result<JsonValue> {
        self.http.get("/exchange/user_data_timestamp").await
    }
}
