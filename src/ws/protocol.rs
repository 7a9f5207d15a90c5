//! WebSocket frame building and classification.

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Build a subscribe command for a market's orderbook feed.
pub fn build_subscribe_orderbook(id: u64, ticker: &str) -> String {
    serde_json::json!({
        "id": id,
        "cmd": "subscribe",
        "params": {
            "channels": ["orderbook_delta"],
            "market_ticker": ticker
        }
    })
    .to_string()
}

/// Build a subscribe command for the account's fill feed.
pub fn build_subscribe_fills(id: u64) -> String {
    serde_json::json!({
        "id": id,
        "cmd": "subscribe",
        "params": {
            "channels": ["fill"]
        }
    })
    .to_string()
}

/// Build an unsubscribe command for the given subscription ids.
pub fn build_unsubscribe(id: u64, sids: &[i64]) -> String {
    serde_json::json!({
        "id": id,
        "cmd": "unsubscribe",
        "params": {
            "sids": sids
        }
    })
    .to_string()
}

/// A classified incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Response to a command we sent (e.g. `subscribed`).
    Response {
        id: u64,
        msg_type: String,
        msg: JsonValue,
    },
    /// Subscription data pushed by the server.
    Update {
        msg_type: String,
        sid: i64,
        seq: Option<i64>,
        msg: JsonValue,
    },
    /// Server error frame.
    Error { id: Option<u64>, msg: JsonValue },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<u64>,
    #[serde(rename = "type")]
    msg_type: Option<String>,
    sid: Option<i64>,
    seq: Option<i64>,
    msg: Option<JsonValue>,
}

/// Classify an incoming frame by shape: error frames by type, responses by
/// the presence of a request id, updates by the presence of a sid.
pub fn parse_incoming(text: &str) -> Result<IncomingMessage, serde_json::Error> {
    let raw: RawMessage = serde_json::from_str(text)?;
    let msg = raw.msg.unwrap_or(JsonValue::Null);

    if raw.msg_type.as_deref() == Some("error") {
        return Ok(IncomingMessage::Error { id: raw.id, msg });
    }

    if let Some(id) = raw.id {
        return Ok(IncomingMessage::Response {
            id,
            msg_type: raw.msg_type.unwrap_or_default(),
            msg,
        });
    }

    if let Some(sid) = raw.sid {
        return Ok(IncomingMessage::Update {
            msg_type: raw.msg_type.unwrap_or_default(),
            sid,
            seq: raw.seq,
            msg,
        });
    }

    Ok(IncomingMessage::Response {
        id: 0,
        msg_type: raw.msg_type.unwrap_or_default(),
        msg,
    })
}
