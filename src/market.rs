//! A single binary market: orderbook, price history, and event fan-out.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::book::{OrderBook, PriceBuffer, TopOfBook};
use crate::fees::FeeSchedule;
use crate::ws::{OrderbookDeltaMsg, OrderbookSnapshotMsg};

/// Nanoseconds per year, for annualizing realized variance.
const NS_PER_YEAR: f64 = 1e9 * 60.0 * 60.0 * 24.0 * 365.25;

/// Capacity of the gap notification channel.
const GAP_CHANNEL_CAPACITY: usize = 64;

/// Notification that a delta arrived out of sequence.
#[derive(Debug, Clone)]
pub struct SequenceGap {
    pub ticker: String,
    pub expected: i64,
    pub received: i64,
}

/// Consumer of market update signals. Implementations must be cheap and
/// non-blocking; the signal fires after every applied book change.
pub trait MarketSink: Send + Sync {
    fn on_market_update(&self);
}

/// A book update routed from the exchange socket.
#[derive(Debug, Clone)]
pub enum BookUpdate {
    Snapshot { seq: i64, msg: OrderbookSnapshotMsg },
    Delta { seq: i64, msg: OrderbookDeltaMsg },
}

#[derive(Debug)]
struct MarketCore {
    book: OrderBook,
    prices: PriceBuffer,
    volatility: Option<f64>,
}

/// Shared handle to one market's state.
///
/// Clones share the underlying book. Updates are only applied by the socket
/// task; other tasks read snapshots through [`top`](Self::top) and
/// [`volatility`](Self::volatility).
#[derive(Clone)]
pub struct Market {
    ticker: Arc<str>,
    fee_schedule: FeeSchedule,
    volatility_window: usize,
    core: Arc<RwLock<MarketCore>>,
    gap_sender: broadcast::Sender<SequenceGap>,
    update_sink: Arc<RwLock<Option<Arc<dyn MarketSink>>>>,
}

impl Market {
    pub fn new(ticker: impl Into<String>, volatility_window: usize) -> Self {
        let (gap_sender, _) = broadcast::channel(GAP_CHANNEL_CAPACITY);
        Self {
            ticker: Arc::from(ticker.into()),
            fee_schedule: FeeSchedule::default(),
            volatility_window,
            core: Arc::new(RwLock::new(MarketCore {
                book: OrderBook::new(),
                prices: PriceBuffer::new(volatility_window),
                volatility: None,
            })),
            gap_sender,
            update_sink: Arc::new(RwLock::new(None)),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fee_schedule
    }

    /// Register the update signal consumer. Called once during wiring.
    pub fn set_update_sink(&self, sink: Arc<dyn MarketSink>) {
        *self.update_sink.write().expect("sink lock poisoned") = Some(sink);
    }

    /// Subscribe to sequence-gap notifications.
    pub fn gap_receiver(&self) -> broadcast::Receiver<SequenceGap> {
        self.gap_sender.subscribe()
    }

    /// Apply one book update.
    ///
    /// Snapshots replace the book and clear the price window (the sequential
    /// sample chain is broken by definition). Deltas are applied only when
    /// their sequence number extends the chain by exactly one; otherwise a
    /// gap notice is emitted and the book is left untouched.
    pub fn apply(&self, update: BookUpdate) {
        match update {
            BookUpdate::Snapshot { seq, msg } => {
                {
                    let mut core = self.core.write().expect("market lock poisoned");
                    core.prices.clear();
                    core.book
                        .apply_snapshot(seq, msg.yes_levels(), msg.no_levels());
                    core.volatility = None;
                }
                info!(target: "prices", ticker = %self.ticker, seq, "snapshot applied");
                self.notify_update();
            }
            BookUpdate::Delta { seq, msg } => {
                {
                    let mut core = self.core.write().expect("market lock poisoned");

                    if let Some(prev) = core.book.seq()
                        && seq != prev + 1
                    {
                        drop(core);
                        debug!(
                            target: "prices",
                            ticker = %self.ticker,
                            expected = prev + 1,
                            received = seq,
                            "sequence gap detected"
                        );
                        let _ = self.gap_sender.send(SequenceGap {
                            ticker: self.ticker.to_string(),
                            expected: prev + 1,
                            received: seq,
                        });
                        return;
                    }

                    core.book
                        .apply_delta(seq, msg.side, msg.price_dollars, msg.delta, msg.ts);
                    let mid = core.book.mid_price();
                    core.prices.push(mid, msg.ts);
                    core.volatility = realized_volatility(&core.prices, self.volatility_window);
                }
                self.notify_update();
            }
        }
    }

    fn notify_update(&self) {
        let sink = self
            .update_sink
            .read()
            .expect("sink lock poisoned")
            .clone();
        if let Some(sink) = sink {
            sink.on_market_update();
        }
    }

    /// Top-of-book capture.
    pub fn top(&self) -> TopOfBook {
        let core = self.core.read().expect("market lock poisoned");
        TopOfBook::from_book(&core.book)
    }

    /// Latest cached realized volatility, annualized. `None` until the
    /// window holds at least two sequential samples.
    pub fn volatility(&self) -> Option<f64> {
        self.core.read().expect("market lock poisoned").volatility
    }

    /// Timestamp (ns) of the latest applied delta, if any.
    pub fn book_timestamp(&self) -> Option<i64> {
        self.core.read().expect("market lock poisoned").book.timestamp()
    }

    /// Latest applied sequence number.
    pub fn book_seq(&self) -> Option<i64> {
        self.core.read().expect("market lock poisoned").book.seq()
    }

    #[cfg(test)]
    pub(crate) fn price_window_len(&self) -> usize {
        self.core.read().expect("market lock poisoned").prices.len()
    }
}

impl std::fmt::Debug for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.read().expect("market lock poisoned");
        f.debug_struct("Market")
            .field("ticker", &self.ticker)
            .field("seq", &core.book.seq())
            .field("samples", &core.prices.len())
            .finish()
    }
}

/// Realized annualized volatility over the sample window: the square root of
/// the mean of squared price moves per unit time.
fn realized_volatility(prices: &PriceBuffer, window: usize) -> Option<f64> {
    let samples = prices.last_n(window);
    let mut variance_values = Vec::with_capacity(samples.len().saturating_sub(1));

    for pair in samples.windows(2) {
        let dt_years = (pair[1].ts - pair[0].ts) as f64 / NS_PER_YEAR;
        if dt_years <= 0.0 {
            continue;
        }
        let price_return = pair[1].mid.to_f64() - pair[0].mid.to_f64();
        variance_values.push(price_return * price_return / dt_years);
    }

    if variance_values.is_empty() {
        return None;
    }

    let mean = variance_values.iter().sum::<f64>() / variance_values.len() as f64;
    Some(mean.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use crate::price::FixedPrice;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot_msg() -> OrderbookSnapshotMsg {
        serde_json::from_value(serde_json::json!({
            "market_ticker": "KXETHD-X",
            "yes_dollars": [[0.30, 5], [0.31, 7]],
            "no_dollars": [[0.68, 2]]
        }))
        .unwrap()
    }

    fn delta_msg(side: Side, price: f64, delta: i64, ts: i64) -> OrderbookDeltaMsg {
        OrderbookDeltaMsg {
            market_ticker: "KXETHD-X".to_string(),
            side,
            price_dollars: FixedPrice::from_dollars(price),
            delta,
            ts,
        }
    }

    struct CountingSink(AtomicUsize);

    impl MarketSink for CountingSink {
        fn on_market_update(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_snapshot_then_delta() {
        let market = Market::new("KXETHD-X", 16);
        market.apply(BookUpdate::Snapshot {
            seq: 10,
            msg: snapshot_msg(),
        });

        let top = market.top();
        assert_eq!(top.best_bid, FixedPrice::from_dollars(0.31));
        assert_eq!(top.bid_size, 7);
        assert_eq!(top.best_ask, FixedPrice::from_dollars(0.32));
        assert_eq!(top.ask_size, 2);
        assert_eq!(top.spread, FixedPrice::from_dollars(0.01));

        market.apply(BookUpdate::Delta {
            seq: 11,
            msg: delta_msg(Side::Yes, 0.31, -7, 1_000),
        });
        let top = market.top();
        assert_eq!(top.best_bid, FixedPrice::from_dollars(0.30));
        assert_eq!(top.bid_size, 5);
        assert_eq!(market.book_seq(), Some(11));
    }

    #[test]
    fn test_gap_suppresses_application() {
        let market = Market::new("KXETHD-X", 16);
        let mut gaps = market.gap_receiver();

        market.apply(BookUpdate::Snapshot {
            seq: 10,
            msg: snapshot_msg(),
        });
        market.apply(BookUpdate::Delta {
            seq: 11,
            msg: delta_msg(Side::Yes, 0.31, -7, 1_000),
        });

        // seq 13 skips 12
        market.apply(BookUpdate::Delta {
            seq: 13,
            msg: delta_msg(Side::Yes, 0.30, -5, 2_000),
        });

        // book unchanged by the gapped delta
        let top = market.top();
        assert_eq!(top.best_bid, FixedPrice::from_dollars(0.30));
        assert_eq!(top.bid_size, 5);
        assert_eq!(market.book_seq(), Some(11));

        let gap = gaps.try_recv().unwrap();
        assert_eq!(gap.ticker, "KXETHD-X");
        assert_eq!(gap.expected, 12);
        assert_eq!(gap.received, 13);
    }

    #[test]
    fn test_snapshot_clears_price_window() {
        let market = Market::new("KXETHD-X", 16);
        market.apply(BookUpdate::Snapshot {
            seq: 10,
            msg: snapshot_msg(),
        });
        market.apply(BookUpdate::Delta {
            seq: 11,
            msg: delta_msg(Side::Yes, 0.31, -2, 1_000),
        });
        assert_eq!(market.price_window_len(), 1);

        market.apply(BookUpdate::Snapshot {
            seq: 50,
            msg: snapshot_msg(),
        });
        assert_eq!(market.price_window_len(), 0);
        assert_eq!(market.book_seq(), Some(50));
        assert!(market.volatility().is_none());
    }

    #[test]
    fn test_update_sink_fires_on_applied_updates_only() {
        let market = Market::new("KXETHD-X", 16);
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        market.set_update_sink(sink.clone());

        market.apply(BookUpdate::Snapshot {
            seq: 10,
            msg: snapshot_msg(),
        });
        market.apply(BookUpdate::Delta {
            seq: 11,
            msg: delta_msg(Side::Yes, 0.31, -2, 1_000),
        });
        // gap: not applied, not signalled
        market.apply(BookUpdate::Delta {
            seq: 13,
            msg: delta_msg(Side::Yes, 0.31, -2, 2_000),
        });

        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_volatility_needs_two_samples() {
        let market = Market::new("KXETHD-X", 16);
        market.apply(BookUpdate::Snapshot {
            seq: 1,
            msg: snapshot_msg(),
        });
        assert!(market.volatility().is_none());

        market.apply(BookUpdate::Delta {
            seq: 2,
            msg: delta_msg(Side::Yes, 0.31, -2, 1_000_000_000),
        });
        assert!(market.volatility().is_none());

        market.apply(BookUpdate::Delta {
            seq: 3,
            msg: delta_msg(Side::Yes, 0.31, -5, 2_000_000_000),
        });
        assert!(market.volatility().is_some());
    }

    #[test]
    fn test_realized_volatility_value() {
        let mut prices = PriceBuffer::new(8);
        // one move of 0.01 over exactly one year
        prices.push(FixedPrice::from_dollars(0.50), 0);
        prices.push(FixedPrice::from_dollars(0.51), NS_PER_YEAR as i64);
        let vol = realized_volatility(&prices, 8).unwrap();
        assert!((vol - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_realized_volatility_skips_zero_dt() {
        let mut prices = PriceBuffer::new(8);
        prices.push(FixedPrice::from_dollars(0.50), 1_000);
        prices.push(FixedPrice::from_dollars(0.60), 1_000);
        assert!(realized_volatility(&prices, 8).is_none());
    }
}
