//! Kalshi trading fee schedule.

/// Standard maker/taker fee rates with the exchange's cent-wise round-up.
///
/// Fees are charged per contract as `rate * price * (1 - price)`, with the
/// total rounded up to the next cent.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    /// Rate for trades filled immediately against resting orders.
    pub taker_fee_rate: f64,
    /// Rate for trades filled after resting on the book.
    pub maker_fee_rate: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            taker_fee_rate: 0.07,
            maker_fee_rate: 0.0175,
        }
    }
}

impl FeeSchedule {
    pub fn new(taker_fee_rate: f64, maker_fee_rate: f64) -> Self {
        Self {
            taker_fee_rate,
            maker_fee_rate,
        }
    }

    fn fees(rate: f64, price: f64, count: i64) -> f64 {
        let raw_dollars = rate * count as f64 * price * (1.0 - price);
        (100.0 * raw_dollars).ceil() / 100.0
    }

    /// Total taker fees for `count` contracts executed at `price`.
    pub fn taker_fees(&self, price: f64, count: i64) -> f64 {
        Self::fees(self.taker_fee_rate, price, count)
    }

    /// Total maker fees for `count` contracts executed at `price`.
    pub fn maker_fees(&self, price: f64, count: i64) -> f64 {
        Self::fees(self.maker_fee_rate, price, count)
    }

    /// Total fees for a trade where `count_made` contracts rested and
    /// `count_taken` crossed the spread.
    pub fn mixed_fees(&self, price: f64, count_made: i64, count_taken: i64) -> f64 {
        self.maker_fees(price, count_made) + self.taker_fees(price, count_taken)
    }

    /// Fee per contract for an order filled against a resting order.
    pub fn taker_fee_per_contract(&self, price: f64) -> f64 {
        Self::fees(self.taker_fee_rate, price, 1)
    }

    /// Fee per contract for an order filled after resting.
    pub fn maker_fee_per_contract(&self, price: f64) -> f64 {
        Self::fees(self.maker_fee_rate, price, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taker_fees_round_up() {
        let fees = FeeSchedule::default();
        // 0.07 * 10 * 0.5 * 0.5 = 0.175 -> rounds up to 0.18
        assert_eq!(fees.taker_fees(0.50, 10), 0.18);
    }

    #[test]
    fn test_maker_fees_round_up() {
        let fees = FeeSchedule::default();
        // 0.0175 * 100 * 0.3 * 0.7 = 0.3675 -> 0.37
        assert_eq!(fees.maker_fees(0.30, 100), 0.37);
    }

    #[test]
    fn test_mixed_fees_sum_components() {
        let fees = FeeSchedule::default();
        let expected = fees.maker_fees(0.40, 5) + fees.taker_fees(0.40, 3);
        assert_eq!(fees.mixed_fees(0.40, 5, 3), expected);
    }

    #[test]
    fn test_per_contract_minimum_one_cent() {
        let fees = FeeSchedule::default();
        // 0.0175 * 0.01 * 0.99 ~= 0.00017 -> still a full cent after round-up
        assert_eq!(fees.maker_fee_per_contract(0.01), 0.01);
        assert_eq!(fees.taker_fee_per_contract(0.50), 0.02);
    }

    #[test]
    fn test_zero_count_is_free() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.taker_fees(0.50, 0), 0.0);
        assert_eq!(fees.mixed_fees(0.50, 0, 0), 0.0);
    }
}
