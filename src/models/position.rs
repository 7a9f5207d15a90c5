//! Position models and query parameters.

use serde::{Deserialize, Serialize};

use super::query::QueryBuilder;

/// Net position in one market. Positive = long YES, negative = long NO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPosition {
    pub ticker: String,
    pub position: i64,
    /// Cost basis in centi-cents.
    #[serde(default)]
    pub market_exposure: Option<i64>,
    #[serde(default)]
    pub realized_pnl: Option<i64>,
    #[serde(default)]
    pub fees_paid: Option<i64>,
    #[serde(default)]
    pub total_traded: Option<i64>,
    #[serde(default)]
    pub resting_orders_count: Option<i64>,
}

/// Response from the get_positions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionsResponse {
    #[serde(default)]
    pub market_positions: Vec<MarketPosition>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Query parameters for the get_positions endpoint.
#[derive(Debug, Default, Clone)]
pub struct GetPositionsParams {
    pub ticker: Option<String>,
    pub count_filter: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

impl GetPositionsParams {
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
    pub fn count_filter(mut self, filter: impl Into<String>) -> Self {
        self.count_filter = Some(filter.into());
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
        qb.push_opt("count_filter", self.count_filter.as_ref());
        qb.push_opt("limit", self.limit);
        qb.push_opt("cursor", self.cursor.as_ref());
        qb.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_response_parse() {
        let json = r#"{
            "market_positions": [
                {"ticker": "KXETHD-X", "position": -12, "market_exposure": 480}
            ],
            "cursor": null
        }"#;
        let resp: PositionsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.market_positions.len(), 1);
        assert_eq!(resp.market_positions[0].position, -12);
    }

    #[test]
    fn test_query_string() {
        let params = GetPositionsParams::new().ticker("KXETHD-X").limit(100);
        assert_eq!(params.to_query_string(), "?ticker=KXETHD-X&limit=100");
    }
}
