//! Exchange WebSocket client: subscription state machine, gap rebuild,
//! reconnection, and message dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, error, info, warn};

use crate::auth::Credentials;
use crate::client::Environment;
use crate::error::{Error, ExecutionError, Result, RiskError, TransportError};
use crate::market::{BookUpdate, Market, SequenceGap};
use crate::sync::Event;

use super::message::{ERROR_CODE_AUTH, ErrorMsg, FillMsg, OrderbookDeltaMsg, OrderbookSnapshotMsg, SubscribedMsg};
use super::protocol::{self, IncomingMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Keepalive ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(10);
/// How long to wait for a pong before treating the connection as dead.
const PING_TIMEOUT: Duration = Duration::from_secs(10);
/// Reconnect backoff base.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Reconnect backoff cap.
const BACKOFF_MAX: Duration = Duration::from_secs(60);
/// Reconnect attempt ceiling.
const MAX_RETRIES: u32 = 5;

/// Consumer of fill events. `on_fill` is synchronous single-step
/// bookkeeping; a risk-limit breach propagates out of the socket loop.
pub trait FillSink: Send + Sync {
    fn on_fill(&self, fill: &FillMsg) -> std::result::Result<(), RiskError>;

    /// A fill frame failed validation; local order state may have drifted.
    fn on_malformed_fill(&self) {}
}

/// Lifecycle of one market subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    /// Subscribe request sent, awaiting the `subscribed` ack.
    PendingSubscribe,
    /// Receiving deltas.
    Active,
    /// Gap detected; deltas are dropped until a fresh snapshot lands.
    Rebuilding,
}

/// Pure subscription bookkeeping: ticker↔sid maps, in-flight requests, and
/// the rebuild flag. Kept free of I/O so the state machine is testable.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionBook {
    message_id: u64,
    ticker_to_sid: HashMap<String, i64>,
    sid_to_ticker: HashMap<i64, String>,
    pending_requests: HashMap<u64, String>,
    phases: HashMap<String, SubscriptionPhase>,
    pending_snapshot: bool,
    fills_subscribed: bool,
}

impl SubscriptionBook {
    fn next_id(&mut self) -> u64 {
        self.message_id += 1;
        self.message_id
    }

    /// Start an orderbook subscription; returns the frame to send.
    pub fn begin_orderbook_subscribe(&mut self, ticker: &str) -> String {
        let id = self.next_id();
        self.pending_requests.insert(id, ticker.to_string());
        // a rebuild in flight keeps its phase until the snapshot lands
        let phase = self
            .phases
            .entry(ticker.to_string())
            .or_insert(SubscriptionPhase::PendingSubscribe);
        if *phase != SubscriptionPhase::Rebuilding {
            *phase = SubscriptionPhase::PendingSubscribe;
        }
        protocol::build_subscribe_orderbook(id, ticker)
    }

    /// Start the fill-feed subscription; returns the frame to send.
    pub fn begin_fill_subscribe(&mut self) -> String {
        let id = self.next_id();
        self.fills_subscribed = true;
        protocol::build_subscribe_fills(id)
    }

    /// Start an unsubscribe for a ticker's book feed. Returns `None` when no
    /// sid is mapped. Sid state is dropped eagerly on send.
    pub fn begin_unsubscribe(&mut self, ticker: &str) -> Option<String> {
        let sid = self.ticker_to_sid.remove(ticker)?;
        self.sid_to_ticker.remove(&sid);
        let id = self.next_id();
        Some(protocol::build_unsubscribe(id, &[sid]))
    }

    /// Record a `subscribed` ack. Returns the ticker for orderbook
    /// subscriptions, `None` for account-level channels.
    pub fn ack_subscribed(&mut self, request_id: u64, sid: i64) -> Option<String> {
        let ticker = self.pending_requests.remove(&request_id)?;
        self.ticker_to_sid.insert(ticker.clone(), sid);
        self.sid_to_ticker.insert(sid, ticker.clone());
        if let Some(phase) = self.phases.get_mut(&ticker)
            && *phase == SubscriptionPhase::PendingSubscribe
        {
            *phase = SubscriptionPhase::Active;
        }
        Some(ticker)
    }

    /// Enter the rebuild state for a ticker: drop deltas until a snapshot.
    pub fn mark_gap(&mut self, ticker: &str) {
        self.pending_snapshot = true;
        self.phases
            .insert(ticker.to_string(), SubscriptionPhase::Rebuilding);
    }

    /// A snapshot landed: resume delta ingestion.
    pub fn on_snapshot(&mut self, ticker: &str) {
        self.pending_snapshot = false;
        self.phases
            .insert(ticker.to_string(), SubscriptionPhase::Active);
    }

    /// Whether delta envelopes should currently be dropped.
    pub fn dropping_deltas(&self) -> bool {
        self.pending_snapshot
    }

    pub fn phase(&self, ticker: &str) -> Option<SubscriptionPhase> {
        self.phases.get(ticker).copied()
    }

    /// Reset connection-scoped state, returning the tickers (and whether the
    /// fill feed) to resubscribe.
    pub fn reset_for_reconnect(&mut self) -> (Vec<String>, bool) {
        let tickers: Vec<String> = self.ticker_to_sid.keys().cloned().collect();
        self.ticker_to_sid.clear();
        self.sid_to_ticker.clear();
        self.pending_requests.clear();
        self.phases.clear();
        (tickers, self.fills_subscribed)
    }
}

/// WebSocket client for the exchange's streaming API.
///
/// Owns the connection, the subscription state machine, and the dispatch of
/// book updates to the [`Market`] and fills to the injected [`FillSink`].
/// Listens on the market's gap channel and runs the
/// unsubscribe/resubscribe rebuild protocol when the sequence chain breaks.
pub struct ExchangeSocket {
    credentials: Credentials,
    environment: Environment,
    market: Market,
    fill_sink: Option<Arc<dyn FillSink>>,
    subs: SubscriptionBook,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<SplitStream<WsStream>>,
    gap_rx: broadcast::Receiver<SequenceGap>,
    is_running: bool,
    last_pong: Instant,
    ping_pending: bool,
}

impl ExchangeSocket {
    pub fn new(credentials: Credentials, environment: Environment, market: Market) -> Self {
        let gap_rx = market.gap_receiver();
        Self {
            credentials,
            environment,
            market,
            fill_sink: None,
            subs: SubscriptionBook::default(),
            writer: None,
            reader: None,
            gap_rx,
            is_running: false,
            last_pong: Instant::now(),
            ping_pending: false,
        }
    }

    /// Inject the fill consumer. Must be called before `run`.
    pub fn set_fill_sink(&mut self, sink: Arc<dyn FillSink>) {
        self.fill_sink = Some(sink);
    }

    /// Establish the connection with exponential backoff.
    ///
    /// # Errors
    /// Fails with `RetriesExhausted` once the attempt ceiling is hit, or
    /// `AuthFailed`-class errors from the upgrade itself.
    pub async fn connect(&mut self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_connect().await {
                Ok(stream) => {
                    let (writer, reader) = stream.split();
                    self.writer = Some(writer);
                    self.reader = Some(reader);
                    self.last_pong = Instant::now();
                    self.ping_pending = false;
                    info!(target: "ks_websocket", url = self.environment.ws_url(), "connected");
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        error!(target: "ks_websocket", attempts = attempt, "connection retries exhausted");
                        return Err(Error::RetriesExhausted(attempt));
                    }
                    let delay = (BACKOFF_BASE * 2u32.saturating_pow(attempt - 1)).min(BACKOFF_MAX);
                    warn!(
                        target: "ks_websocket",
                        error = %e,
                        attempt,
                        delay_s = delay.as_secs(),
                        "connection failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<WsStream> {
        let ws_url = self.environment.ws_url();
        let timestamp_ms = Credentials::timestamp_ms();
        // sign the upgrade path, never the query
        let path = "/trade-api/ws/v2";
        let signature = self.credentials.sign(timestamp_ms, "GET", path)?;

        let mut request = ws_url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "KALSHI-ACCESS-KEY",
            HeaderValue::from_str(self.credentials.access_key())
                .map_err(|e| Error::InvalidHeaderValue(e.to_string()))?,
        );
        headers.insert(
            "KALSHI-ACCESS-SIGNATURE",
            HeaderValue::from_str(&signature)
                .map_err(|e| Error::InvalidHeaderValue(e.to_string()))?,
        );
        headers.insert(
            "KALSHI-ACCESS-TIMESTAMP",
            HeaderValue::from_str(&timestamp_ms.to_string())
                .map_err(|e| Error::InvalidHeaderValue(e.to_string()))?,
        );

        let (stream, response) = tokio_tungstenite::connect_async(request).await?;
        debug!(target: "ks_websocket", status = %response.status(), "upgrade complete");
        Ok(stream)
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        writer.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    /// Subscribe to a market's orderbook feed.
    pub async fn subscribe_orderbook(&mut self, ticker: &str) -> Result<()> {
        let frame = self.subs.begin_orderbook_subscribe(ticker);
        self.send(frame).await
    }

    /// Subscribe to the account fill feed.
    pub async fn subscribe_fills(&mut self) -> Result<()> {
        let frame = self.subs.begin_fill_subscribe();
        self.send(frame).await
    }

    /// Unsubscribe a market's orderbook feed.
    pub async fn unsubscribe_orderbook(&mut self, ticker: &str) -> Result<()> {
        match self.subs.begin_unsubscribe(ticker) {
            Some(frame) => self.send(frame).await,
            None => {
                warn!(target: "ks_websocket", ticker, "cannot unsubscribe: not subscribed");
                Ok(())
            }
        }
    }

    /// Rebuild protocol after a sequence gap: drop deltas and cycle the
    /// subscription so the server restates the book.
    async fn handle_gap(&mut self, ticker: &str) -> Result<()> {
        warn!(target: "ks_websocket", ticker, "sequence gap, rebuilding orderbook");
        self.subs.mark_gap(ticker);
        if let Some(frame) = self.subs.begin_unsubscribe(ticker) {
            self.send(frame).await?;
        }
        let frame = self.subs.begin_orderbook_subscribe(ticker);
        self.send(frame).await
    }

    /// Run the listen/dispatch loop until shutdown or a fatal error.
    ///
    /// Per-message failures are logged and the loop continues; risk-limit
    /// breaches from the fill sink and authentication failures propagate.
    /// A dropped connection reconnects and resubscribes while the shutdown
    /// event is unset.
    pub async fn run(mut self, shutdown: Arc<Event>) -> Result<()> {
        self.is_running = true;
        let mut ping = interval(PING_INTERVAL);

        loop {
            if self.reader.is_none() {
                if shutdown.is_set() {
                    return Ok(());
                }
                self.connect().await?;
                self.restore_subscriptions().await?;
            }

            let mut reader = self.reader.take().expect("connected");
            ping.reset();

            let disconnect = loop {
                tokio::select! {
                    _ = shutdown.wait() => {
                        info!(target: "ks_websocket", "shutdown requested");
                        self.is_running = false;
                        break None;
                    }

                    gap = self.gap_rx.recv() => {
                        match gap {
                            Ok(gap) => {
                                if let Err(e) = self.handle_gap(&gap.ticker).await {
                                    break Some(e);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(target: "ks_websocket", missed = n, "gap notifications lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => {}
                        }
                    }

                    _ = ping.tick() => {
                        if self.ping_pending && self.last_pong.elapsed() > PING_TIMEOUT {
                            break Some(Error::Transport(TransportError::TimedOut));
                        }
                        let frame = Message::Ping(b"keepalive".to_vec().into());
                        if let Some(writer) = self.writer.as_mut() {
                            if let Err(e) = writer.send(frame).await {
                                break Some(e.into());
                            }
                            self.ping_pending = true;
                        }
                    }

                    msg = reader.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(e) = self.handle_text(&text).await {
                                    if e.is_terminal() {
                                        error!(target: "ks_websocket", error = %e, "fatal error");
                                        return Err(e);
                                    }
                                    error!(target: "ks_websocket", error = %e, "failed to handle message");
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Some(writer) = self.writer.as_mut()
                                    && let Err(e) = writer.send(Message::Pong(data)).await
                                {
                                    break Some(e.into());
                                }
                            }
                            Some(Ok(Message::Pong(_))) => {
                                self.last_pong = Instant::now();
                                self.ping_pending = false;
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(target: "ks_websocket", ?frame, "server closed connection");
                                break None;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                break Some(e.into());
                            }
                            None => {
                                break None;
                            }
                        }
                    }
                }
            };

            drop(reader);
            if let Some(mut writer) = self.writer.take() {
                let _ = writer.close().await;
            }

            if !self.is_running || shutdown.is_set() {
                info!(target: "ks_websocket", "socket loop stopped");
                return Ok(());
            }

            match disconnect {
                Some(e) if e.is_terminal() => return Err(e),
                Some(e) => warn!(target: "ks_websocket", error = %e, "connection lost, reconnecting"),
                None => info!(target: "ks_websocket", "connection closed, reconnecting"),
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Restore orderbook and fill subscriptions after a reconnect.
    async fn restore_subscriptions(&mut self) -> Result<()> {
        let (tickers, fills) = self.subs.reset_for_reconnect();
        if !tickers.is_empty() {
            info!(target: "ks_websocket", count = tickers.len(), "restoring subscriptions");
        }
        for ticker in tickers {
            self.subscribe_orderbook(&ticker).await?;
        }
        if fills {
            let frame = self.subs.begin_fill_subscribe();
            self.send(frame).await?;
        }
        Ok(())
    }

    async fn handle_text(&mut self, text: &str) -> Result<()> {
        let incoming = match protocol::parse_incoming(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                error!(target: "ks_websocket", error = %e, "failed to parse frame");
                return Ok(());
            }
        };

        match incoming {
            IncomingMessage::Response { id, msg_type, msg } => {
                if msg_type == "subscribed" {
                    let ack: SubscribedMsg = serde_json::from_value(msg)?;
                    match self.subs.ack_subscribed(id, ack.sid) {
                        Some(ticker) => {
                            info!(
                                target: "ks_websocket",
                                channel = %ack.channel,
                                ticker = %ticker,
                                sid = ack.sid,
                                "subscribed"
                            );
                        }
                        None => {
                            info!(target: "ks_websocket", channel = %ack.channel, sid = ack.sid, "subscribed");
                        }
                    }
                } else {
                    debug!(target: "ks_websocket", id, msg_type = %msg_type, "response");
                }
            }

            IncomingMessage::Update {
                msg_type, seq, msg, ..
            } => match msg_type.as_str() {
                "orderbook_snapshot" => {
                    let Some(seq) = seq else {
                        warn!(target: "ks_websocket", "snapshot without sequence number");
                        return Ok(());
                    };
                    match serde_json::from_value::<OrderbookSnapshotMsg>(msg) {
                        Ok(snapshot) => {
                            self.subs.on_snapshot(&snapshot.market_ticker);
                            info!(target: "ks_websocket", seq, "orderbook snapshot received");
                            self.market.apply(BookUpdate::Snapshot { seq, msg: snapshot });
                        }
                        Err(e) => {
                            error!(target: "ks_websocket", error = %e, "invalid snapshot payload");
                            let ticker = self.market.ticker().to_string();
                            self.handle_gap(&ticker).await?;
                        }
                    }
                }

                "orderbook_delta" => {
                    if self.subs.dropping_deltas() {
                        debug!(target: "ks_websocket", "dropping delta while rebuilding");
                        return Ok(());
                    }
                    let Some(seq) = seq else {
                        warn!(target: "ks_websocket", "delta without sequence number");
                        return Ok(());
                    };
                    match serde_json::from_value::<OrderbookDeltaMsg>(msg) {
                        Ok(delta) => {
                            self.market.apply(BookUpdate::Delta { seq, msg: delta });
                        }
                        Err(e) => {
                            error!(target: "ks_websocket", error = %e, "invalid delta payload");
                            let ticker = self.market.ticker().to_string();
                            self.handle_gap(&ticker).await?;
                        }
                    }
                }

                "fill" => match serde_json::from_value::<FillMsg>(msg) {
                    Ok(fill) => {
                        info!(
                            target: "fills",
                            trade_id = %fill.trade_id,
                            order_id = %fill.order_id,
                            count = fill.count,
                            post_position = fill.post_position,
                            "fill received"
                        );
                        if let Some(sink) = &self.fill_sink {
                            sink.on_fill(&fill).map_err(Error::Risk)?;
                        }
                    }
                    Err(e) => {
                        let err = ExecutionError::MalformedFill(e.to_string());
                        error!(target: "fills", error = %err, "dropping fill");
                        if let Some(sink) = &self.fill_sink {
                            sink.on_malformed_fill();
                        }
                    }
                },

                other => {
                    debug!(target: "ks_websocket", msg_type = other, "ignoring update");
                }
            },

            IncomingMessage::Error { id, msg } => {
                let payload: ErrorMsg = serde_json::from_value(msg).unwrap_or(ErrorMsg {
                    code: 0,
                    msg: String::new(),
                });
                error!(
                    target: "ks_websocket",
                    code = payload.code,
                    msg = %payload.msg,
                    request_id = ?id,
                    "server error"
                );
                if payload.code == ERROR_CODE_AUTH {
                    return Err(Error::Transport(TransportError::AuthFailed));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_flow() {
        let mut subs = SubscriptionBook::default();
        let frame = subs.begin_orderbook_subscribe("KXETHD-X");
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let id = parsed["id"].as_u64().unwrap();
        assert_eq!(
            subs.phase("KXETHD-X"),
            Some(SubscriptionPhase::PendingSubscribe)
        );

        let ticker = subs.ack_subscribed(id, 42).unwrap();
        assert_eq!(ticker, "KXETHD-X");
        assert_eq!(subs.phase("KXETHD-X"), Some(SubscriptionPhase::Active));
        assert!(!subs.dropping_deltas());
    }

    #[test]
    fn test_message_ids_are_monotone() {
        let mut subs = SubscriptionBook::default();
        let f1 = subs.begin_orderbook_subscribe("A");
        let f2 = subs.begin_fill_subscribe();
        let id1 = serde_json::from_str::<serde_json::Value>(&f1).unwrap()["id"]
            .as_u64()
            .unwrap();
        let id2 = serde_json::from_str::<serde_json::Value>(&f2).unwrap()["id"]
            .as_u64()
            .unwrap();
        assert!(id2 > id1);
    }

    #[test]
    fn test_gap_protocol_drops_deltas_until_snapshot() {
        let mut subs = SubscriptionBook::default();
        let frame = subs.begin_orderbook_subscribe("KXETHD-X");
        let id = serde_json::from_str::<serde_json::Value>(&frame).unwrap()["id"]
            .as_u64()
            .unwrap();
        subs.ack_subscribed(id, 42);

        subs.mark_gap("KXETHD-X");
        assert!(subs.dropping_deltas());
        assert_eq!(subs.phase("KXETHD-X"), Some(SubscriptionPhase::Rebuilding));

        // unsubscribe drops the sid mapping
        let unsub = subs.begin_unsubscribe("KXETHD-X").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&unsub).unwrap();
        assert_eq!(parsed["params"]["sids"], serde_json::json!([42]));

        // resubscribe keeps the rebuilding phase until the snapshot lands
        let resub = subs.begin_orderbook_subscribe("KXETHD-X");
        let resub_id = serde_json::from_str::<serde_json::Value>(&resub).unwrap()["id"]
            .as_u64()
            .unwrap();
        assert_eq!(subs.phase("KXETHD-X"), Some(SubscriptionPhase::Rebuilding));
        subs.ack_subscribed(resub_id, 43);
        assert!(subs.dropping_deltas());
        assert_eq!(subs.phase("KXETHD-X"), Some(SubscriptionPhase::Rebuilding));

        subs.on_snapshot("KXETHD-X");
        assert!(!subs.dropping_deltas());
        assert_eq!(subs.phase("KXETHD-X"), Some(SubscriptionPhase::Active));
    }

    #[test]
    fn test_unsubscribe_unknown_ticker() {
        let mut subs = SubscriptionBook::default();
        assert!(subs.begin_unsubscribe("NOPE").is_none());
    }

    #[test]
    fn test_ack_for_unknown_request_returns_none() {
        let mut subs = SubscriptionBook::default();
        assert!(subs.ack_subscribed(99, 1).is_none());
    }

    #[test]
    fn test_reset_for_reconnect_returns_restore_set() {
        let mut subs = SubscriptionBook::default();
        let frame = subs.begin_orderbook_subscribe("KXETHD-X");
        let id = serde_json::from_str::<serde_json::Value>(&frame).unwrap()["id"]
            .as_u64()
            .unwrap();
        subs.ack_subscribed(id, 42);
        subs.begin_fill_subscribe();

        let (tickers, fills) = subs.reset_for_reconnect();
        assert_eq!(tickers, vec!["KXETHD-X".to_string()]);
        assert!(fills);
        assert!(subs.phase("KXETHD-X").is_none());
        assert!(subs.begin_unsubscribe("KXETHD-X").is_none());
    }
}
