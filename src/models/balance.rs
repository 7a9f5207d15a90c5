//! Balance models.

use serde::Deserialize;

/// Response from the get_balance endpoint. All values in cents.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub balance: i64,
    #[serde(default)]
    pub portfolio_value: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cents_to_dollars;

    #[test]
    fn test_balance_parse() {
        let resp: BalanceResponse = serde_json::from_str(r#"{"balance": 102550}"#).unwrap();
        assert_eq!(resp.balance, 102_550);
        assert_eq!(cents_to_dollars(resp.balance), 1025.50);
    }
}
