//! Common exchange types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a position or order (Yes or No).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Action type for an order (Buy or Sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type (Limit or Market).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Resting,
    Canceled,
    Executed,
    Pending,
}

impl OrderStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Resting => "resting",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Executed => "executed",
            OrderStatus::Pending => "pending",
        }
    }
}

/// Convert cents to dollars.
///
/// The balance endpoint reports cents; local accounting is in dollars.
#[inline]
#[must_use]
pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_serde() {
        assert_eq!(serde_json::to_string(&Side::Yes).unwrap(), "\"yes\"");
        assert_eq!(serde_json::from_str::<Side>("\"no\"").unwrap(), Side::No);
    }

    #[test]
    fn test_side_other() {
        assert_eq!(Side::Yes.other(), Side::No);
        assert_eq!(Side::No.other(), Side::Yes);
    }

    #[test]
    fn test_action_serde() {
        assert_eq!(serde_json::to_string(&Action::Sell).unwrap(), "\"sell\"");
        assert_eq!(
            serde_json::from_str::<Action>("\"buy\"").unwrap(),
            Action::Buy
        );
    }

    #[test]
    fn test_cents_to_dollars() {
        assert_eq!(cents_to_dollars(12_345), 123.45);
        assert_eq!(cents_to_dollars(0), 0.0);
    }
}
