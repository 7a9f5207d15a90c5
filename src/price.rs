//! Fixed-point contract prices.
//!
//! Kalshi quotes binary contracts in dollars with sub-penny precision. All
//! book keys and order prices use [`FixedPrice`], an integer count of
//! 1/10000-dollar units, so that equal prices compare equal and map lookups
//! never suffer float drift.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of fixed-point units per dollar.
const UNITS: i64 = 10_000;

/// A price in [0.00, 1.00] quantized to 0.0001 dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPrice(i64);

/// $0.00
pub const ZERO: FixedPrice = FixedPrice(0);
/// $1.00
pub const ONE: FixedPrice = FixedPrice(UNITS);
/// Lowest tradable price, $0.01.
pub const MIN_PRICE: FixedPrice = FixedPrice(100);
/// Highest tradable price, $0.99.
pub const MAX_PRICE: FixedPrice = FixedPrice(9_900);
/// Default midpoint for an empty book, $0.50.
pub const MID_DEFAULT: FixedPrice = FixedPrice(5_000);

impl FixedPrice {
    /// Build from raw 1/10000-dollar units.
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// Build from a dollar amount, rounding to the nearest 0.0001.
    pub fn from_dollars(dollars: f64) -> Self {
        Self((dollars * UNITS as f64).round() as i64)
    }

    /// Raw unit count.
    pub const fn units(self) -> i64 {
        self.0
    }

    /// Dollar value as a float, for model math and display.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / UNITS as f64
    }

    /// The other side's equivalent price: 1 − p.
    pub const fn complement(self) -> Self {
        Self(UNITS - self.0)
    }

    /// Whether the price is within the tradable range [0.01, 0.99].
    pub fn is_tradable(self) -> bool {
        (MIN_PRICE..=MAX_PRICE).contains(&self)
    }

    /// Clamp into the tradable range.
    pub fn clamped(self) -> Self {
        self.max(MIN_PRICE).min(MAX_PRICE)
    }
}

impl Add for FixedPrice {
    type Output = FixedPrice;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for FixedPrice {
    type Output = FixedPrice;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul for FixedPrice {
    type Output = FixedPrice;
    fn mul(self, rhs: Self) -> Self {
        Self(self.0 * rhs.0 / UNITS)
    }
}

impl Div for FixedPrice {
    type Output = FixedPrice;
    fn div(self, rhs: Self) -> Self {
        Self(self.0 * UNITS / rhs.0)
    }
}

impl Div<i64> for FixedPrice {
    type Output = FixedPrice;
    fn div(self, rhs: i64) -> Self {
        Self(self.0 / rhs)
    }
}

impl Mul<i64> for FixedPrice {
    type Output = FixedPrice;
    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Neg for FixedPrice {
    type Output = FixedPrice;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for FixedPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:04}", sign, abs / UNITS, abs % UNITS)
    }
}

impl Serialize for FixedPrice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for FixedPrice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dollars = f64::deserialize(deserializer)?;
        Ok(FixedPrice::from_dollars(dollars))
    }
}
