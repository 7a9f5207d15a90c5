//! Signal provider WebSocket: streams underlying-asset ticks.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::sync::Event;

use super::message::{IndexTick, SignalTick, TickerUpdate};

const SIGNAL_WS_URL: &str = "wss://stream.crypto.com/exchange/v1/market";

const MAX_RETRIES: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Consumer of tick signals. Fired after each stored tick; must be cheap.
pub trait TickSink: Send + Sync {
    fn on_tick(&self);
}

#[derive(Debug, Default)]
struct SignalState {
    ticker: Option<TickerUpdate>,
    index: Option<IndexTick>,
}

/// Cloneable accessor for the freshest tick.
///
/// Prefers the ticker stream when both channel kinds are subscribed.
#[derive(Debug, Clone, Default)]
pub struct SignalHandle {
    state: Arc<RwLock<SignalState>>,
}

impl SignalHandle {
    pub fn latest(&self) -> Option<SignalTick> {
        let state = self.state.read().expect("signal lock poisoned");
        if let Some(ticker) = &state.ticker {
            return Some(SignalTick::Ticker(ticker.clone()));
        }
        state.index.as_ref().map(|t| SignalTick::Index(t.clone()))
    }

    fn store_ticker(&self, tick: TickerUpdate) {
        self.state.write().expect("signal lock poisoned").ticker = Some(tick);
    }

    fn store_index(&self, tick: IndexTick) {
        self.state.write().expect("signal lock poisoned").index = Some(tick);
    }
}

/// WebSocket client for the underlying-asset feed.
///
/// Subscribes to the configured channels, stores the freshest tick behind a
/// [`SignalHandle`], and signals the injected [`TickSink`] on every message.
pub struct SignalSocket {
    url: String,
    channels: Vec<String>,
    handle: SignalHandle,
    tick_sink: Option<Arc<dyn TickSink>>,
}

impl SignalSocket {
    pub fn new(channels: Vec<String>) -> Self {
        Self {
            url: SIGNAL_WS_URL.to_string(),
            channels,
            handle: SignalHandle::default(),
            tick_sink: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_url(channels: Vec<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channels,
            handle: SignalHandle::default(),
            tick_sink: None,
        }
    }

    /// Inject the tick consumer. Must be called before `run`.
    pub fn set_tick_sink(&mut self, sink: Arc<dyn TickSink>) {
        self.tick_sink = Some(sink);
    }

    /// Accessor handle for the freshest tick.
    pub fn handle(&self) -> SignalHandle {
        self.handle.clone()
    }

    /// Run the stream until shutdown. Reconnects with exponential backoff;
    /// fails once the retry ceiling is hit with no successful connection.
    pub async fn run(self, shutdown: Arc<Event>) -> Result<()> {
        let mut retries: u32 = 0;
        let mut delay = BACKOFF_BASE;

        while !shutdown.is_set() {
            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    info!(target: "signal_websocket", url = %self.url, "connected");
                    retries = 0;
                    delay = BACKOFF_BASE;

                    let (mut writer, mut reader) = stream.split();
                    if !self.channels.is_empty() {
                        let frame = serde_json::json!({
                            "id": 1,
                            "method": "subscribe",
                            "params": {"channels": self.channels}
                        });
                        writer.send(Message::Text(frame.to_string().into())).await?;
                        info!(target: "signal_websocket", channels = ?self.channels, "subscribed");
                    }

                    loop {
                        tokio::select! {
                            _ = shutdown.wait() => {
                                let _ = writer.close().await;
                                info!(target: "signal_websocket", "shutdown requested");
                                return Ok(());
                            }
                            msg = reader.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(reply) = self.handle_message(&text) {
                                        writer.send(Message::Text(reply.into())).await?;
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    writer.send(Message::Pong(data)).await?;
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    warn!(target: "signal_websocket", "connection closed");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(target: "signal_websocket", error = %e, "stream error");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "signal_websocket", error = %e, "connection failed");
                }
            }

            retries += 1;
            if retries >= MAX_RETRIES {
                return Err(Error::RetriesExhausted(retries));
            }
            sleep(delay).await;
            delay = (delay * 2).min(BACKOFF_MAX);
        }

        Ok(())
    }

    /// Parse one frame: store ticks and signal the sink; answer heartbeats.
    /// Returns a frame to send back when one is required.
    fn handle_message(&self, text: &str) -> Option<String> {
        let data: JsonValue = match serde_json::from_str(text) {
            Ok(data) => data,
            Err(e) => {
                warn!(target: "signal_websocket", error = %e, "unparseable frame");
                return None;
            }
        };

        // the provider disconnects clients that do not answer heartbeats
        if data.get("method").and_then(|m| m.as_str()) == Some("public/heartbeat") {
            let id = data.get("id").cloned().unwrap_or(JsonValue::from(0));
            return Some(
                serde_json::json!({"id": id, "method": "public/respond-heartbeat"}).to_string(),
            );
        }

        let result = data.get("result")?;
        let channel = result.get("channel").and_then(|c| c.as_str())?;
        let first = result.get("data").and_then(|d| d.as_array())?.first()?;

        match channel {
            "index" => match serde_json::from_value::<IndexTick>(first.clone()) {
                Ok(tick) => {
                    debug!(target: "signal_websocket", value = tick.v, "index tick");
                    self.handle.store_index(tick);
                    if let Some(sink) = &self.tick_sink {
                        sink.on_tick();
                    }
                }
                Err(e) => warn!(target: "signal_websocket", error = %e, "invalid index tick"),
            },
            "ticker" => match serde_json::from_value::<TickerUpdate>(first.clone()) {
                Ok(tick) => {
                    self.handle.store_ticker(tick);
                    if let Some(sink) = &self.tick_sink {
                        sink.on_tick();
                    }
                }
                Err(e) => warn!(target: "signal_websocket", error = %e, "invalid ticker tick"),
            },
            other => {
                debug!(target: "signal_websocket", channel = other, "ignoring channel");
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    impl TickSink for CountingSink {
        fn on_tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn socket_with_sink() -> (SignalSocket, Arc<CountingSink>) {
        let mut socket =
            SignalSocket::with_url(vec!["index.ETHUSD-INDEX".to_string()], "wss://unused");
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        socket.set_tick_sink(sink.clone());
        (socket, sink)
    }

    #[test]
    fn test_index_tick_stored_and_signalled() {
        let (socket, sink) = socket_with_sink();
        let frame = r#"{"id":-1,"method":"subscribe","code":0,
            "result":{"channel":"index","subscription":"index.ETHUSD-INDEX",
                      "data":[{"v":"3451.07","t":1700000000000}]}}"#;
        assert!(socket.handle_message(frame).is_none());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        let tick = socket.handle().latest().unwrap();
        assert_eq!(tick.price(), 3451.07);
    }

    #[test]
    fn test_ticker_preferred_over_index() {
        let (socket, _sink) = socket_with_sink();
        let index = r#"{"result":{"channel":"index","data":[{"v":"3451.0","t":1}]}}"#;
        let ticker = r#"{"result":{"channel":"ticker",
            "data":[{"b":"3449.0","k":"3451.0","t":2}]}}"#;
        socket.handle_message(index);
        socket.handle_message(ticker);

        match socket.handle().latest().unwrap() {
            SignalTick::Ticker(t) => assert_eq!(t.b, 3449.0),
            other => panic!("expected ticker tick, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_answered() {
        let (socket, sink) = socket_with_sink();
        let reply = socket
            .handle_message(r#"{"id":12345,"method":"public/heartbeat","code":0}"#)
            .expect("heartbeat must be answered");
        let parsed: JsonValue = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["method"], "public/respond-heartbeat");
        assert_eq!(parsed["id"], 12345);
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_garbage_frames_ignored() {
        let (socket, sink) = socket_with_sink();
        assert!(socket.handle_message("not json").is_none());
        assert!(socket.handle_message(r#"{"result":{}}"#).is_none());
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
        assert!(socket.handle().latest().is_none());
    }
}
