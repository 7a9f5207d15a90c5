//! Two-sided incremental orderbook for a single binary market.

mod buffer;

pub use buffer::{PriceBuffer, PriceSample};

use std::collections::BTreeMap;

use crate::models::Side;
use crate::price::{self, FixedPrice};

/// Mutable orderbook updated by snapshot and delta messages.
///
/// Both sides are keyed by their own bid price; the YES-side ask is derived
/// from the best NO bid through the complement. `BTreeMap` gives O(log n)
/// insertion/removal and O(log n) max-key scans, with the best levels cached
/// and maintained incrementally.
///
/// The book is only valid after a snapshot has been applied.
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Sequence number of the latest applied message.
    seq: Option<i64>,
    /// POSIX ns timestamp of the latest applied delta. Snapshots carry no
    /// per-level time, so they reset this to `None`.
    timestamp: Option<i64>,
    /// YES side: bid price -> resting contracts.
    yes_levels: BTreeMap<FixedPrice, i64>,
    /// NO side: bid price -> resting contracts.
    no_levels: BTreeMap<FixedPrice, i64>,

    best_bid: FixedPrice,
    bid_size: i64,
    best_ask: FixedPrice,
    ask_size: i64,
    mid_price: FixedPrice,
    spread: FixedPrice,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            seq: None,
            timestamp: None,
            yes_levels: BTreeMap::new(),
            no_levels: BTreeMap::new(),
            best_bid: price::ZERO,
            bid_size: 0,
            // init above max so any real ask improves it
            best_ask: price::ONE,
            ask_size: 0,
            mid_price: price::MID_DEFAULT,
            spread: price::ZERO,
        }
    }

    /// Replace both sides from a snapshot. Duplicate prices are aggregated
    /// by summation and non-positive levels dropped.
    pub fn apply_snapshot<I, J>(&mut self, seq: i64, yes_levels: I, no_levels: J)
    where
        I: IntoIterator<Item = (FixedPrice, i64)>,
        J: IntoIterator<Item = (FixedPrice, i64)>,
    {
        self.seq = Some(seq);

        self.yes_levels = aggregate_levels(yes_levels);
        self.no_levels = aggregate_levels(no_levels);

        self.find_new_best_bid();
        self.find_new_best_ask();

        self.timestamp = None;
        self.recalc_derived();
    }

    /// Apply a signed size change at one price level.
    ///
    /// A level driven to zero or below is removed; a negative delta at an
    /// absent level is a no-op. The cached best is repaired incrementally:
    /// a removed best triggers a scan for the next best, an improving insert
    /// promotes itself.
    pub fn apply_delta(&mut self, seq: i64, side: Side, price: FixedPrice, delta: i64, ts: i64) {
        self.seq = Some(seq);

        match side {
            Side::Yes => match self.yes_levels.get(&price).copied() {
                Some(count) => {
                    let new_count = count + delta;
                    if new_count <= 0 {
                        self.yes_levels.remove(&price);
                        if price == self.best_bid {
                            self.find_new_best_bid();
                        }
                    } else {
                        self.yes_levels.insert(price, new_count);
                        if price == self.best_bid {
                            self.bid_size = new_count;
                        }
                    }
                }
                None => {
                    if delta > 0 {
                        self.yes_levels.insert(price, delta);
                        if price > self.best_bid || self.yes_levels.len() == 1 {
                            self.best_bid = price;
                            self.bid_size = delta;
                        }
                    }
                }
            },
            Side::No => match self.no_levels.get(&price).copied() {
                Some(count) => {
                    let new_count = count + delta;
                    if new_count <= 0 {
                        self.no_levels.remove(&price);
                        if price.complement() == self.best_ask {
                            self.find_new_best_ask();
                        }
                    } else {
                        self.no_levels.insert(price, new_count);
                        if price.complement() == self.best_ask {
                            self.ask_size = new_count;
                        }
                    }
                }
                None => {
                    if delta > 0 {
                        self.no_levels.insert(price, delta);
                        if price.complement() < self.best_ask || self.no_levels.len() == 1 {
                            self.best_ask = price.complement();
                            self.ask_size = delta;
                        }
                    }
                }
            },
        }

        self.timestamp = Some(ts);
        self.recalc_derived();
    }

    fn find_new_best_bid(&mut self) {
        match self.yes_levels.iter().next_back() {
            Some((&price, &count)) => {
                self.best_bid = price;
                self.bid_size = count;
            }
            None => {
                self.best_bid = price::ZERO;
                self.bid_size = 0;
            }
        }
    }

    fn find_new_best_ask(&mut self) {
        match self.no_levels.iter().next_back() {
            Some((&no_bid, &count)) => {
                self.best_ask = no_bid.complement();
                self.ask_size = count;
            }
            None => {
                self.best_ask = price::ONE;
                self.ask_size = 0;
            }
        }
    }

    fn recalc_derived(&mut self) {
        self.mid_price = self.calc_mid_price();
        self.spread = self.best_ask - self.best_bid;
    }

    /// Midpoint of the displayed market. Falls back to the present side when
    /// one side is empty, and to 0.50 for an empty book.
    fn calc_mid_price(&self) -> FixedPrice {
        let has_ask = self.best_ask < price::ONE;
        let has_bid = self.best_bid > price::ZERO;

        match (has_bid, has_ask) {
            (true, true) => (self.best_bid + self.best_ask) / 2,
            (false, true) => self.best_ask,
            (true, false) => self.best_bid,
            (false, false) => price::MID_DEFAULT,
        }
    }

    pub fn seq(&self) -> Option<i64> {
        self.seq
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn best_bid(&self) -> FixedPrice {
        self.best_bid
    }

    pub fn bid_size(&self) -> i64 {
        self.bid_size
    }

    pub fn best_ask(&self) -> FixedPrice {
        self.best_ask
    }

    pub fn ask_size(&self) -> i64 {
        self.ask_size
    }

    pub fn mid_price(&self) -> FixedPrice {
        self.mid_price
    }

    pub fn spread(&self) -> FixedPrice {
        self.spread
    }

    /// Resting contracts at one price level, zero when absent.
    pub fn depth_at(&self, side: Side, price: FixedPrice) -> i64 {
        let levels = match side {
            Side::Yes => &self.yes_levels,
            Side::No => &self.no_levels,
        };
        levels.get(&price).copied().unwrap_or(0)
    }

    pub fn yes_levels(&self) -> &BTreeMap<FixedPrice, i64> {
        &self.yes_levels
    }

    pub fn no_levels(&self) -> &BTreeMap<FixedPrice, i64> {
        &self.no_levels
    }
}

fn aggregate_levels<I>(levels: I) -> BTreeMap<FixedPrice, i64>
where
    I: IntoIterator<Item = (FixedPrice, i64)>,
{
    let mut map: BTreeMap<FixedPrice, i64> = BTreeMap::new();
    for (price, count) in levels {
        *map.entry(price).or_insert(0) += count;
    }
    map.retain(|_, count| *count > 0);
    map
}

/// Immutable top-of-book capture used by pricing decisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopOfBook {
    pub best_bid: FixedPrice,
    pub bid_size: i64,
    pub best_ask: FixedPrice,
    pub ask_size: i64,
    pub mid_price: FixedPrice,
    pub spread: FixedPrice,
    pub timestamp: Option<i64>,
}

impl TopOfBook {
    pub fn from_book(book: &OrderBook) -> Self {
        Self {
            best_bid: book.best_bid,
            bid_size: book.bid_size,
            best_ask: book.best_ask,
            ask_size: book.ask_size,
            mid_price: book.mid_price,
            spread: book.spread,
            timestamp: book.timestamp,
        }
    }
}
