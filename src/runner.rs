//! Session supervision: build, wire, connect, and babysit the trading loop.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{error, info, warn};

use crate::auth::Credentials;
use crate::client::ExchangeClient;
use crate::config::{Mode, SessionConfig};
use crate::error::{DataError, Error, Result};
use crate::executor::{
    Execute, LiveExecutor, OptionsExecutor, PricingParams, SimExecutor,
};
use crate::market::{Market, MarketSink};
use crate::signal::{CandleClient, SignalSocket, TickSink};
use crate::sync::Event;
use crate::vol::VolatilityEstimator;
use crate::ws::{ExchangeSocket, FillSink};

/// Supervision poll period.
const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Hard timeout for the closing market order.
const CLOSE_POSITION_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-component timeout during teardown.
const COMPONENT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds every component from config, wires the event sinks, and runs the
/// supervisory loop until shutdown, terminal time, staleness, or a risk
/// limit ends the session. On every terminal path the position is closed
/// (bounded by [`CLOSE_POSITION_TIMEOUT`]) before sockets are torn down.
pub struct SessionRunner {
    config: SessionConfig,
}

impl SessionRunner {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Run one trading session to completion.
    ///
    /// Returns `Ok(())` on orderly shutdown and the terminal error when a
    /// risk limit or fatal transport problem ended the session (after the
    /// position close was attempted).
    pub async fn run(self, shutdown: Arc<Event>) -> Result<()> {
        let cfg = &self.config;
        let environment = cfg.environment();

        let credentials =
            Credentials::from_key_file(&cfg.auth.access_key, &cfg.auth.private_key_path)?;
        let client = ExchangeClient::new(credentials.clone(), environment)?;
        let market = Market::new(cfg.market.ticker.clone(), cfg.market.volatility_window);

        let mut estimator = VolatilityEstimator::new(CandleClient::new()?);
        estimator.prime().await?;
        info!(target: "runner", candles = estimator.candle_count(), "volatility estimator primed");
        let vol = Arc::new(AsyncMutex::new(estimator));

        let signal_socket = SignalSocket::new(cfg.signal.signal_channels.clone());
        let signal = signal_socket.handle();

        let params = PricingParams {
            strike: cfg.market.strike,
            expiry_ms: cfg.market.expiry_ms()?,
            min_edge: cfg.risk.trading_parameters.minimum_edge,
            risk_free_rate: 0.0,
        };
        let limits = cfg.risk.portfolio_limits.risk_limits();

        let exchange_socket =
            ExchangeSocket::new(credentials, environment, market.clone());

        match cfg.mode {
            Mode::Live => {
                info!(target: "runner", ticker = %cfg.market.ticker, "starting live session");
                let executor = OptionsExecutor::new(
                    LiveExecutor::new(client, market.clone(), limits),
                    params,
                    vol,
                    signal,
                );
                self.run_session(executor, market, exchange_socket, signal_socket, shutdown)
                    .await
            }
            Mode::Paper => {
                info!(target: "runner", ticker = %cfg.market.ticker, "starting paper session");
                let executor = SimExecutor::new(
                    market.clone(),
                    limits,
                    params,
                    vol,
                    signal,
                    cfg.market.starting_balance,
                );
                self.run_session(executor, market, exchange_socket, signal_socket, shutdown)
                    .await
            }
        }
    }

    async fn run_session<E>(
        &self,
        executor: E,
        market: Market,
        mut exchange_socket: ExchangeSocket,
        mut signal_socket: SignalSocket,
        shutdown: Arc<Event>,
    ) -> Result<()>
    where
        E: Execute + FillSink + MarketSink + TickSink,
    {
        // wire the event sinks before any message can arrive
        exchange_socket.set_fill_sink(Arc::new(executor.clone()));
        signal_socket.set_tick_sink(Arc::new(executor.clone()));
        market.set_update_sink(Arc::new(executor.clone()));

        exchange_socket.connect().await?;
        exchange_socket.subscribe_orderbook(market.ticker()).await?;
        exchange_socket.subscribe_fills().await?;
        executor.reconcile().await?;

        let mut exchange_task = Some(tokio::spawn(exchange_socket.run(shutdown.clone())));
        let mut signal_task = Some(tokio::spawn(signal_socket.run(shutdown.clone())));

        let outcome = self
            .supervise(
                &executor,
                &market,
                &mut exchange_task,
                &mut signal_task,
                &shutdown,
            )
            .await;

        shutdown.set();
        if let Some(task) = exchange_task {
            stop_task("exchange socket", task).await;
        }
        if let Some(task) = signal_task {
            stop_task("signal socket", task).await;
        }

        match &outcome {
            Ok(()) => info!(target: "runner", "session ended"),
            Err(e) => error!(target: "runner", error = %e, "session ended with error"),
        }
        outcome
    }

    /// The ≤1s poll loop: shutdown, task health, terminal time, periodic
    /// reconciliation, and book staleness, in that order.
    async fn supervise<E: Execute>(
        &self,
        executor: &E,
        market: &Market,
        exchange_task: &mut Option<JoinHandle<Result<()>>>,
        signal_task: &mut Option<JoinHandle<Result<()>>>,
        shutdown: &Arc<Event>,
    ) -> Result<()> {
        let limits = &self.config.risk;
        let terminal_exit = self.config.risk.portfolio_limits.terminal_exit();
        let reconciliation_period = limits.staleness_limits.reconciliation();
        let max_staleness = limits.staleness_limits.max_staleness();

        let started = Instant::now();
        let mut last_reconciliation = Instant::now();
        let mut poll = interval(POLL_PERIOD);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll.tick().await;

            if shutdown.is_set() {
                info!(target: "runner", "shutdown signal detected, closing position");
                self.safe_close_position(executor).await;
                return Ok(());
            }

            if exchange_task.as_ref().is_some_and(|t| t.is_finished()) {
                let result = join_result(exchange_task.take().expect("task present")).await;
                return self.finish_for_task("exchange socket", result, executor).await;
            }
            if signal_task.as_ref().is_some_and(|t| t.is_finished()) {
                let result = join_result(signal_task.take().expect("task present")).await;
                return self.finish_for_task("signal socket", result, executor).await;
            }

            if started.elapsed() >= terminal_exit {
                info!(target: "runner", "terminal time reached, closing position");
                self.safe_close_position(executor).await;
                return Ok(());
            }

            if last_reconciliation.elapsed() >= reconciliation_period {
                info!(target: "runner", "periodic reconciliation");
                match executor.reconcile().await {
                    Ok(()) => {}
                    Err(e @ Error::Risk(_)) => {
                        error!(target: "runner", error = %e, "risk limit during reconciliation");
                        self.safe_close_position(executor).await;
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(target: "runner", error = %e, "reconciliation failed");
                    }
                }
                last_reconciliation = Instant::now();
            }

            if let Some(book_ts) = market.book_timestamp() {
                let age = Duration::from_nanos(now_ns().saturating_sub(book_ts).max(0) as u64);
                if age > max_staleness {
                    let err = DataError::StaleOrderbook {
                        age_secs: age.as_secs_f64(),
                    };
                    error!(target: "runner", error = %err, "orderbook staleness exceeded, closing position");
                    self.safe_close_position(executor).await;
                    return Err(err.into());
                }
            }
        }
    }

    async fn finish_for_task<E: Execute>(
        &self,
        name: &str,
        result: Result<()>,
        executor: &E,
    ) -> Result<()> {
        match &result {
            Ok(()) => warn!(target: "runner", task = name, "task exited unexpectedly"),
            Err(e) => error!(target: "runner", task = name, error = %e, "task failed"),
        }
        self.safe_close_position(executor).await;
        result
    }

    /// Close the position with a hard timeout; failures are logged, never
    /// propagated, so teardown always proceeds.
    async fn safe_close_position<E: Execute>(&self, executor: &E) {
        match timeout(CLOSE_POSITION_TIMEOUT, executor.close_position()).await {
            Ok(Ok(())) => info!(target: "runner", "position closed"),
            Ok(Err(e)) => error!(target: "runner", error = %e, "position close failed"),
            Err(_) => error!(target: "runner", "position close timed out"),
        }
    }
}

/// Await a finished task, flattening panics into errors.
async fn join_result(task: JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(Error::Config(format!("task panicked: {}", e))),
    }
}

/// Stop a supervised task: give it a grace period, then abort.
async fn stop_task(name: &str, mut task: JoinHandle<Result<()>>) {
    match timeout(COMPONENT_CLOSE_TIMEOUT, &mut task).await {
        Ok(_) => info!(target: "runner", task = name, "stopped"),
        Err(_) => {
            warn!(target: "runner", task = name, "close timed out, aborting");
            task.abort();
            let _ = task.await;
        }
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
