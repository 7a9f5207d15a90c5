//! REST data models.

mod balance;
mod common;
mod order;
mod position;
pub(crate) mod query;

pub use balance::BalanceResponse;
pub use common::{Action, OrderStatus, OrderType, Side, cents_to_dollars};
pub use order::{
    ApiOrderError, BatchCancelOrdersRequest, BatchCancelOrdersResponse, BatchCancelResult,
    BatchCreateOrdersRequest, BatchCreateOrdersResponse, BatchOrderResult, GetOrdersParams,
    Order, OrderRequest, OrdersResponse, next_client_order_id,
};
pub use position::{GetPositionsParams, MarketPosition, PositionsResponse};
